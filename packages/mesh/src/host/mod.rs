// packages/mesh/src/host/mod.rs
//! Host side of the mesh
//!
//! - **Subscription Table**: which agent types receive which topics
//! - **Router**: worker connections and envelope fan-out
//! - **Host Runtime**: the gRPC listener and its lifecycle

pub mod host_runtime;
pub mod router;
pub mod subscription_table;

pub use host_runtime::{HostHandle, HostState};
pub use router::{ConnectionId, ConnectionState, DeliveryReport, Router};
pub use subscription_table::{Subscription, SubscriptionTable};
