// packages/mesh/src/runtime/mod.rs
//! Worker-side agent runtime
//!
//! This module hosts agents inside a worker process:
//!
//! - **Agent**: Agent trait, typed handlers and the per-type dispatch table
//! - **Context**: What a handler sees, and how it publishes follow-ups
//! - **Registry**: Agent types and lazily created instances
//! - **Worker Runtime**: Connection to the host and the worker lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Worker ────────────────────────────┐
//! │                                                                │
//! │   host frames ──▶ receive loop ──▶ registry.resolve(AgentId)   │
//! │                                          │                     │
//! │                     ┌────────────────────┼──────────────┐      │
//! │                     ▼                    ▼              ▼      │
//! │                ┌─────────┐          ┌─────────┐    ┌─────────┐ │
//! │                │ mailbox │          │ mailbox │    │ mailbox │ │
//! │                │ task    │          │ task    │    │ task    │ │
//! │                └────┬────┘          └────┬────┘    └────┬────┘ │
//! │                     └──── handler posts ─┴──────────────┘      │
//! │                                   │                            │
//! │                            outbound queue ──▶ pump ──▶ host    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod context;
pub mod registry;
pub mod stats;
pub mod worker_runtime;

// Re-export commonly used types
pub use agent::{Agent, AgentType, Handles};
pub use context::MessageContext;
pub use registry::{AgentInstance, AgentRegistry};
pub use stats::WorkerStats;
pub use worker_runtime::{RuntimeState, WorkerHandle};
