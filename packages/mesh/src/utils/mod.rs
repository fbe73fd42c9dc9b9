// packages/mesh/src/utils/mod.rs
//! Common utilities: error types and configuration

pub mod config;
pub mod errors;

pub use config::{HostConfig, LoggingConfig, MeshConfig, MetricsConfig, WorkerConfig};
pub use errors::{MeshError, Result};
