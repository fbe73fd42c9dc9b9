// packages/mesh/src/runtime/registry.rs
//! Per-worker agent registry
//!
//! Holds the agent types a worker declared and the instances created from
//! them. Instances are created lazily on first resolve, exactly once per
//! `AgentId`, and each one owns a mailbox task so handler invocations for an
//! instance never overlap. Different instances run concurrently.
//!
//! Mailboxes and the outbound queue are bounded: a full mailbox holds up the
//! worker's receive loop, which in turn holds up the host stream.
//!
//! The type list is frozen once it has been announced to the host and
//! reopens when the registry is deactivated.

use crate::grpc::proto;
use crate::host::Subscription;
use crate::message::{AgentId, Envelope, TopicId};
use crate::observability::metrics as mesh_metrics;
use crate::runtime::agent::{Agent, AgentFactory, AgentType, RegisteredType};
use crate::runtime::context::MessageContext;
use crate::runtime::stats::WorkerCounters;
use crate::utils::errors::{MeshError, Result};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue of envelopes posted by handlers, drained towards the host
pub(crate) type OutboundQueue = mpsc::Sender<Envelope>;

#[derive(Clone)]
struct Activation {
    outbound: OutboundQueue,
    counters: Arc<WorkerCounters>,
    mailbox_capacity: usize,
}

/// A live agent: its identity, mailbox and handler task
pub struct AgentInstance {
    id: AgentId,
    mailbox: Mutex<Option<mpsc::Sender<Envelope>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentInstance {
    fn spawn(id: AgentId, factory: &dyn AgentFactory, activation: Activation) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(activation.mailbox_capacity);
        let mut agent = factory.instantiate();
        let agent_id = id.clone();

        let task = tokio::spawn(async move {
            let Activation { outbound, counters, .. } = activation;

            while let Some(envelope) = rx.recv().await {
                let ctx = MessageContext::for_envelope(agent_id.clone(), &envelope);
                let message_id = envelope.message_id.clone();

                let result = agent.dispatch(envelope.payload, &ctx).await;
                mesh_metrics::record_handler(&agent_id.agent_type, result.is_ok());

                match result {
                    Ok(()) => {
                        WorkerCounters::incr(&counters.handled);
                        for posted in ctx.take_posted() {
                            if outbound.send(posted).await.is_err() {
                                warn!("Outbound queue closed; dropping envelope posted by {}", agent_id);
                            }
                        }
                    }
                    Err(e) => {
                        WorkerCounters::incr(&counters.handler_failures);
                        error!("Handler for {} failed on {}: {}", agent_id, message_id, e);
                    }
                }
            }

            debug!("Mailbox for {} closed", agent_id);
        });

        Self {
            id,
            mailbox: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Queue an envelope for this instance, waiting while the mailbox is full
    pub async fn deliver(&self, envelope: Envelope) -> Result<()> {
        let tx = self
            .mailbox
            .lock()
            .clone()
            .ok_or_else(|| MeshError::invalid_state("Running", "mailbox closed"))?;
        tx.send(envelope)
            .await
            .map_err(|_| MeshError::invalid_state("Running", "mailbox closed"))
    }

    fn close(&self) -> Option<JoinHandle<()>> {
        self.mailbox.lock().take();
        self.task.lock().take()
    }
}

/// Agent types and instances hosted by one worker
pub struct AgentRegistry {
    types: RwLock<Vec<Arc<dyn AgentFactory>>>,
    index: RwLock<HashMap<String, usize>>,
    instances: DashMap<AgentId, Arc<AgentInstance>>,
    activation: RwLock<Option<Activation>>,
    announced: AtomicBool,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(vec![]),
            index: RwLock::new(HashMap::new()),
            instances: DashMap::new(),
            activation: RwLock::new(None),
            announced: AtomicBool::new(false),
        }
    }

    /// Declare an agent type; names are unique per worker
    pub fn register<A: Agent>(&self, agent_type: AgentType<A>) -> Result<()> {
        let mut index = self.index.write();
        if self.announced.load(Ordering::Acquire) {
            return Err(MeshError::invalid_state(
                "agent types not yet announced",
                format!("announced before '{}' was registered", agent_type.name()),
            ));
        }
        if index.contains_key(agent_type.name()) {
            return Err(MeshError::DuplicateRegistration(agent_type.name().to_string()));
        }

        let registered: Arc<dyn AgentFactory> = Arc::new(RegisteredType::from(agent_type));
        let mut types = self.types.write();
        index.insert(registered.name().to_string(), types.len());
        info!(
            "Registered agent type '{}' handling {:?}",
            registered.name(),
            registered.handled_types()
        );
        types.push(registered);
        Ok(())
    }

    pub fn contains(&self, agent_type: &str) -> bool {
        self.index.read().contains_key(agent_type)
    }

    /// Registered type names, in registration order
    pub fn agent_types(&self) -> Vec<String> {
        self.types.read().iter().map(|t| t.name().to_string()).collect()
    }

    fn factory(&self, agent_type: &str) -> Option<Arc<dyn AgentFactory>> {
        let index = self.index.read();
        let position = *index.get(agent_type)?;
        self.types.read().get(position).cloned()
    }

    /// Return the instance for `id`, creating it on first use
    pub fn resolve(&self, id: &AgentId) -> Result<Arc<AgentInstance>> {
        if let Some(instance) = self.instances.get(id) {
            return Ok(Arc::clone(instance.value()));
        }

        let factory = self
            .factory(&id.agent_type)
            .ok_or_else(|| MeshError::UnknownAgentType(id.agent_type.clone()))?;
        let activation = self
            .activation
            .read()
            .clone()
            .ok_or_else(|| MeshError::invalid_state("Running", "Stopped"))?;

        let instance = self.instances.entry(id.clone()).or_insert_with(|| {
            debug!("Creating agent instance {}", id);
            Arc::new(AgentInstance::spawn(id.clone(), factory.as_ref(), activation))
        });
        Ok(Arc::clone(instance.value()))
    }

    /// Local agents a topic envelope should reach, one per matching type
    pub fn local_recipients(&self, topic: &TopicId) -> Vec<AgentId> {
        self.types
            .read()
            .iter()
            .filter_map(|t| {
                t.subscriptions()
                    .iter()
                    .find_map(|pattern| pattern.recipient(t.name(), topic))
            })
            .collect()
    }

    /// Registration frame announcing this worker's types and subscriptions
    ///
    /// Freezes the type list: later `register` calls fail with `InvalidState`
    /// until `deactivate`.
    pub fn announce(&self, worker_name: &str) -> proto::Hello {
        // Holding the index lock orders this against in-flight registrations
        let _index = self.index.write();
        self.announced.store(true, Ordering::Release);
        let types = self.types.read();
        proto::Hello {
            worker_name: worker_name.to_string(),
            agent_types: types.iter().map(|t| t.name().to_string()).collect(),
            subscriptions: types
                .iter()
                .flat_map(|t| {
                    t.subscriptions()
                        .iter()
                        .map(|pattern| Subscription::new(t.name(), pattern.clone()).into())
                })
                .collect(),
        }
    }

    pub fn is_announced(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Allow instance creation; handler posts go to `outbound`
    pub(crate) fn activate(
        &self,
        outbound: OutboundQueue,
        counters: Arc<WorkerCounters>,
        mailbox_capacity: usize,
    ) {
        *self.activation.write() = Some(Activation {
            outbound,
            counters,
            mailbox_capacity,
        });
    }

    /// Close every mailbox and wait up to `grace` for handlers to finish
    pub(crate) async fn deactivate(&self, grace: Duration) {
        self.activation.write().take();
        self.announced.store(false, Ordering::Release);

        let instances: Vec<Arc<AgentInstance>> =
            self.instances.iter().map(|e| Arc::clone(e.value())).collect();
        self.instances.clear();

        let tasks: Vec<JoinHandle<()>> = instances.iter().filter_map(|i| i.close()).collect();
        if tasks.is_empty() {
            return;
        }

        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let count = tasks.len();
        if tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!("{} agent instances still busy after {:?}, aborting", count, grace);
            for abort in aborts {
                abort.abort();
            }
        } else {
            debug!("Stopped {} agent instances", count);
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
