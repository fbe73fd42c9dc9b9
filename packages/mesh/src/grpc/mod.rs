// packages/mesh/src/grpc/mod.rs
//! gRPC wire schema and host service
//!
//! - **proto**: types and service stubs generated from `proto/mesh.proto`
//! - **convert**: conversions between wire frames and the message model
//! - **service**: the `AgentHost` service served by the host

pub mod convert;
pub mod service;

pub use service::AgentHostService;

/// Generated protobuf types
pub mod proto {
    tonic::include_proto!("sentra.mesh.v1");

    /// Encoded file descriptor set, used by the reflection service
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("mesh_descriptor");
}
