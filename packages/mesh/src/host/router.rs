// packages/mesh/src/host/router.rs
//! Host router: connection registry and subscription fan-out
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting ──Hello──▶ Registered ──Welcome sent──▶ Active ──disconnect──▶ Closed
//! ```
//!
//! All router state (connections, agent-type ownership, the subscription
//! table) sits behind one lock. Routing snapshots the target sinks first and
//! delivers afterwards without waiting on any of them: a subscriber whose
//! queue is full or closed is skipped and reported, and its siblings still
//! receive the envelope.

use crate::grpc::proto;
use crate::host::subscription_table::{Subscription, SubscriptionTable};
use crate::message::{AgentId, TopicId};
use crate::observability::metrics as mesh_metrics;
use crate::transport::FrameSink;
use crate::utils::errors::{MeshError, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tonic::Status;
use tracing::{debug, info, warn};

/// Send half of a host -> worker stream
pub type HostSink = FrameSink<std::result::Result<proto::HostFrame, Status>>;

/// Host-assigned connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of one worker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Active,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Registered => "Registered",
            ConnectionState::Active => "Active",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Host view of one worker
pub struct WorkerConnection {
    pub id: ConnectionId,
    pub peer: String,
    pub worker_name: String,
    pub state: ConnectionState,
    pub agent_types: Vec<String>,
    sink: HostSink,
}

/// Outcome of routing one envelope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ConnectionId>,
    pub failed: Vec<ConnectionId>,
}

#[derive(Default)]
struct RouterState {
    connections: HashMap<ConnectionId, WorkerConnection>,
    owners: HashMap<String, ConnectionId>,
    subscriptions: SubscriptionTable,
}

/// Routes envelopes between worker connections
pub struct Router {
    state: RwLock<RouterState>,
    next_id: AtomicU64,
    deliver_to_origin: bool,
}

impl Router {
    /// Create a router; `deliver_to_origin` controls self-delivery of broadcasts
    pub fn new(deliver_to_origin: bool) -> Self {
        Self {
            state: RwLock::new(RouterState::default()),
            next_id: AtomicU64::new(1),
            deliver_to_origin,
        }
    }

    /// Track a new connection in `Connecting` state
    pub fn open(&self, peer: impl Into<String>, sink: HostSink) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let peer = peer.into();

        debug!("Connection {} opened from {}", id, peer);
        mesh_metrics::record_connection_opened();

        self.state.write().connections.insert(
            id,
            WorkerConnection {
                id,
                peer,
                worker_name: String::new(),
                state: ConnectionState::Connecting,
                agent_types: vec![],
                sink,
            },
        );
        id
    }

    /// Handle the `Hello` frame: record agent types, merge subscriptions,
    /// then greet the worker and mark the connection `Active`
    pub async fn register(&self, id: ConnectionId, hello: proto::Hello) -> Result<()> {
        let subscriptions = hello
            .subscriptions
            .into_iter()
            .map(Subscription::try_from)
            .collect::<Result<Vec<_>>>()?;

        let mut declared = HashSet::new();
        for agent_type in &hello.agent_types {
            if !declared.insert(agent_type.as_str()) {
                return Err(MeshError::DuplicateRegistration(agent_type.clone()));
            }
        }
        if let Some(orphan) = subscriptions
            .iter()
            .find(|s| !declared.contains(s.agent_type.as_str()))
        {
            return Err(MeshError::Protocol(format!(
                "Subscription {} names an agent type the worker did not register",
                orphan
            )));
        }

        let sink = {
            let mut state = self.state.write();
            let RouterState {
                connections,
                owners,
                subscriptions: table,
            } = &mut *state;

            let connection = connections
                .get_mut(&id)
                .ok_or_else(|| MeshError::TransportClosed(id.to_string()))?;

            if connection.state != ConnectionState::Connecting {
                return Err(MeshError::invalid_state("Connecting", connection.state));
            }

            if let Some(taken) = hello
                .agent_types
                .iter()
                .find(|t| owners.get(t.as_str()).is_some_and(|owner| *owner != id))
            {
                return Err(MeshError::DuplicateRegistration(taken.clone()));
            }

            for agent_type in &hello.agent_types {
                owners.insert(agent_type.clone(), id);
            }
            for subscription in subscriptions {
                if table.subscribe(subscription.clone()) {
                    debug!("Added subscription {}", subscription);
                }
            }

            connection.worker_name = hello.worker_name.clone();
            connection.agent_types = hello.agent_types.clone();
            connection.state = ConnectionState::Registered;
            connection.sink.clone()
        };

        let welcome = proto::HostFrame {
            frame: Some(proto::host_frame::Frame::Welcome(proto::Welcome {
                connection_id: id.to_string(),
            })),
        };
        if let Err(e) = sink.send(Ok(welcome)).await {
            self.close(id);
            return Err(e);
        }

        if let Some(connection) = self.state.write().connections.get_mut(&id) {
            connection.state = ConnectionState::Active;
        }

        info!(
            "Worker '{}' registered on {} with agent types {:?}",
            hello.worker_name, id, hello.agent_types
        );
        Ok(())
    }

    /// Forward an envelope to every connection that should receive it
    ///
    /// Topic envelopes go to each connection owning a subscribed agent type,
    /// once per connection, in subscription order. Direct envelopes go to the
    /// owner of the recipient's agent type. The envelope is forwarded as-is.
    pub fn route(&self, origin: ConnectionId, envelope: proto::Envelope) -> Result<DeliveryReport> {
        let (kind, targets) = {
            let state = self.state.read();

            match state.connections.get(&origin).map(|c| c.state) {
                Some(ConnectionState::Active) => {}
                Some(other) => return Err(MeshError::invalid_state("Active", other)),
                None => return Err(MeshError::TransportClosed(origin.to_string())),
            }

            match &envelope.destination {
                Some(proto::envelope::Destination::Topic(topic)) => {
                    let topic = TopicId::from(topic.clone());
                    ("publish", self.topic_targets(&state, origin, &topic))
                }
                Some(proto::envelope::Destination::Recipient(recipient)) => {
                    let recipient = AgentId::from(recipient.clone());
                    ("direct", vec![Self::direct_target(&state, &recipient)?])
                }
                None => {
                    return Err(MeshError::Protocol(format!(
                        "Envelope {} has no destination",
                        envelope.message_id
                    )))
                }
            }
        };

        let message_id = envelope.message_id.clone();
        let frame = proto::HostFrame {
            frame: Some(proto::host_frame::Frame::Envelope(envelope)),
        };

        let mut report = DeliveryReport::default();
        for (id, sink) in targets {
            match sink.try_send(Ok(frame.clone())) {
                Ok(()) => report.delivered.push(id),
                Err(e) => {
                    warn!("Failed to deliver {} to {}: {}", message_id, id, e);
                    report.failed.push(id);
                }
            }
        }

        mesh_metrics::record_routed(kind, report.delivered.len(), report.failed.len());
        debug!(
            "Routed {} {} from {}: {} delivered, {} failed",
            kind,
            message_id,
            origin,
            report.delivered.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn topic_targets(
        &self,
        state: &RouterState,
        origin: ConnectionId,
        topic: &TopicId,
    ) -> Vec<(ConnectionId, HostSink)> {
        let mut seen = HashSet::new();
        let mut targets = vec![];

        for subscription in state.subscriptions.subscribers_for(topic) {
            let Some(&id) = state.owners.get(&subscription.agent_type) else {
                continue;
            };
            if id == origin && !self.deliver_to_origin {
                continue;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(connection) = state.connections.get(&id) {
                if connection.state == ConnectionState::Active {
                    targets.push((id, connection.sink.clone()));
                }
            }
        }
        targets
    }

    fn direct_target(state: &RouterState, recipient: &AgentId) -> Result<(ConnectionId, HostSink)> {
        state
            .owners
            .get(&recipient.agent_type)
            .and_then(|id| state.connections.get(id))
            .filter(|c| c.state == ConnectionState::Active)
            .map(|c| (c.id, c.sink.clone()))
            .ok_or_else(|| MeshError::UnknownAgentType(recipient.agent_type.clone()))
    }

    /// Send a control frame (rejections) to a single connection
    pub fn send_to(&self, id: ConnectionId, frame: proto::HostFrame) -> Result<()> {
        let sink = self
            .state
            .read()
            .connections
            .get(&id)
            .map(|c| c.sink.clone())
            .ok_or_else(|| MeshError::TransportClosed(id.to_string()))?;
        sink.try_send(Ok(frame))
    }

    /// Forget a connection and release its agent types
    pub fn close(&self, id: ConnectionId) -> Option<WorkerConnection> {
        let mut state = self.state.write();
        let mut connection = state.connections.remove(&id)?;
        state.owners.retain(|_, owner| *owner != id);
        connection.state = ConnectionState::Closed;

        info!(
            "Connection {} closed (worker '{}', peer {})",
            id, connection.worker_name, connection.peer
        );
        mesh_metrics::record_connection_closed();
        Some(connection)
    }

    /// Drop every connection; their outbound streams end
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.state.read().connections.keys().copied().collect();
        ids.into_iter().filter(|id| self.close(*id).is_some()).count()
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.state.read().connections.get(&id).map(|c| c.state)
    }

    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Connection currently hosting `agent_type`
    pub fn owner_of(&self, agent_type: &str) -> Option<ConnectionId> {
        self.state.read().owners.get(agent_type).copied()
    }

    /// Snapshot of the subscription table
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.state.read().subscriptions.iter().cloned().collect()
    }
}
