// packages/mesh/src/utils/errors.rs
//! Error types for the agent mesh

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors raised by the host, the worker runtimes and the transport
#[derive(Debug, Error)]
pub enum MeshError {
    /// An agent type name was registered twice on the same worker,
    /// or is already owned by another worker connected to the host
    #[error("Agent type already registered: {0}")]
    DuplicateRegistration(String),

    /// No factory is registered for the requested agent type
    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    /// The connection to the peer is gone
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// The peer's outbound queue is full; the frame was dropped
    #[error("Peer is not keeping up: {0}")]
    Backpressure(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// Payload type tag does not match the type the handler accepts
    #[error("Serialization mismatch: expected {expected}, found {found}")]
    SerializationMismatch { expected: String, found: String },

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("RPC failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Timed out connecting to host at {0}")]
    ConnectTimeout(String),

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Observability setup failed: {0}")]
    ObservabilityError(String),
}

impl MeshError {
    /// Shorthand for an `InvalidState` error
    pub fn invalid_state(expected: &'static str, actual: impl std::fmt::Display) -> Self {
        MeshError::InvalidState {
            expected,
            actual: actual.to_string(),
        }
    }

    /// Whether the error means the connection to the peer is unusable
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, MeshError::TransportClosed(_) | MeshError::Transport(_))
    }
}

impl From<config::ConfigError> for MeshError {
    fn from(e: config::ConfigError) -> Self {
        MeshError::ConfigError(e.to_string())
    }
}
