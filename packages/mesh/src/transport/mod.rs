// packages/mesh/src/transport/mod.rs
//! Transport layer between workers and the host
//!
//! Each worker holds one duplex gRPC stream (`AgentHost.OpenChannel`) to the
//! host. Both ends see the connection through the same two primitives:
//!
//! - **FrameSink**: ordered, fire-and-forget send side
//! - **drive**: the receive loop, one callback per frame in arrival order
//!
//! # Architecture
//!
//! ```text
//! Worker                                     Host
//! ┌──────────────┐   WorkerFrame stream   ┌──────────────┐
//! │ FrameSink ───┼───────────────────────▶│ drive(..)    │
//! │              │                        │   Router     │
//! │ drive(..) ◀──┼────────────────────────┼── FrameSink  │
//! └──────────────┘   HostFrame stream     └──────────────┘
//! ```

pub mod client;
pub mod frame_sink;
pub mod receiver;

pub use client::{connect, WorkerChannel};
pub use frame_sink::{channel, FrameSink};
pub use receiver::{drive, CloseReason, Flow};
