// packages/mesh/src/lib.rs
//! Sentra Lab Agent Mesh Library
//!
//! A small distributed agent runtime: a central host routes typed envelopes
//! between worker processes, and each worker hosts agents that react to
//! published topics and direct messages.
//!
//! # Architecture
//!
//! The mesh is structured into several key modules:
//!
//! - **message**: Envelopes, payloads, topics and agent identities
//! - **runtime**: Worker-side agent registry, dispatch and lifecycle
//! - **host**: Subscription table, router and host lifecycle
//! - **transport**: Duplex frame channels between workers and the host
//! - **grpc**: Wire schema and the `AgentHost` service
//! - **observability**: Tracing, OTLP export and metrics
//! - **utils**: Configuration and errors

// Public module exports
pub mod grpc;
pub mod host;
pub mod message;
pub mod observability;
pub mod runtime;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use host::{HostHandle, HostState};
pub use message::{AgentId, Envelope, Message, MessageId, TopicId, TopicPattern};
pub use runtime::{Agent, AgentType, Handles, MessageContext, RuntimeState, WorkerHandle};
pub use utils::config::MeshConfig;
pub use utils::errors::{MeshError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
