// packages/mesh/src/observability/metrics.rs
//! Metric names and recording helpers

use ::metrics::{counter, describe_counter, gauge};

pub const ENVELOPES_PUBLISHED: &str = "mesh_envelopes_published_total";
pub const ENVELOPES_ROUTED: &str = "mesh_envelopes_routed_total";
pub const DELIVERIES_FAILED: &str = "mesh_deliveries_failed_total";
pub const HANDLER_INVOCATIONS: &str = "mesh_handler_invocations_total";
pub const HANDLER_FAILURES: &str = "mesh_handler_failures_total";
pub const CONNECTIONS: &str = "mesh_connections_total";
pub const ACTIVE_CONNECTIONS: &str = "mesh_active_connections";

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_counter!(ENVELOPES_PUBLISHED, "Envelopes handed to the transport by workers");
    describe_counter!(ENVELOPES_ROUTED, "Envelope deliveries forwarded by the host");
    describe_counter!(DELIVERIES_FAILED, "Host deliveries that failed for one subscriber");
    describe_counter!(HANDLER_INVOCATIONS, "Agent handler invocations");
    describe_counter!(HANDLER_FAILURES, "Agent handler invocations that returned an error");
    describe_counter!(CONNECTIONS, "Worker connections accepted by the host");
}

pub fn record_published(kind: &'static str) {
    counter!(ENVELOPES_PUBLISHED, "kind" => kind).increment(1);
}

pub fn record_routed(kind: &'static str, delivered: usize, failed: usize) {
    counter!(ENVELOPES_ROUTED, "kind" => kind).increment(delivered as u64);
    if failed > 0 {
        counter!(DELIVERIES_FAILED, "kind" => kind).increment(failed as u64);
    }
}

pub fn record_handler(agent_type: &str, ok: bool) {
    counter!(HANDLER_INVOCATIONS, "agent_type" => agent_type.to_string()).increment(1);
    if !ok {
        counter!(HANDLER_FAILURES, "agent_type" => agent_type.to_string()).increment(1);
    }
}

pub fn record_connection_opened() {
    counter!(CONNECTIONS).increment(1);
    gauge!(ACTIVE_CONNECTIONS).increment(1.0);
}

pub fn record_connection_closed() {
    gauge!(ACTIVE_CONNECTIONS).decrement(1.0);
}
