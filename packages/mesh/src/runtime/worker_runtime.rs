// packages/mesh/src/runtime/worker_runtime.rs
//! Worker runtime: one connection to the host, many agents
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start──▶ Starting ──Welcome──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!    ▲                   │
//!    └───── failure ─────┘
//! ```
//!
//! Agent types are registered while `Stopped`, or while `Starting` until the
//! `Hello` frame has been built; later registrations fail with
//! `InvalidState`. Everything an agent publishes travels through the host,
//! including envelopes for agents on this same worker.

use crate::grpc::convert::{rejection_to_error, worker_envelope_frame};
use crate::grpc::proto::{self, host_frame, worker_frame, HostFrame, WorkerFrame};
use crate::message::{AgentId, Envelope, Message, MessageId, Payload, TopicId};
use crate::observability::metrics as mesh_metrics;
use crate::runtime::agent::{Agent, AgentType};
use crate::runtime::registry::AgentRegistry;
use crate::runtime::stats::{WorkerCounters, WorkerStats};
use crate::transport::{self, CloseReason, FrameSink, Flow, WorkerChannel};
use crate::utils::config::WorkerConfig;
use crate::utils::errors::{MeshError, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Streaming;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(state_name(*self))
    }
}

type SinkSlot = Arc<RwLock<Option<FrameSink<WorkerFrame>>>>;

struct Session {
    connection_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct WorkerInner {
    config: WorkerConfig,
    name: String,
    state: RwLock<RuntimeState>,
    registry: Arc<AgentRegistry>,
    sink: SinkSlot,
    session: Mutex<Option<Session>>,
    counters: Arc<WorkerCounters>,
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Handle to a worker runtime; cheap to clone
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl WorkerHandle {
    pub fn new(config: WorkerConfig) -> Self {
        let name = if config.name.is_empty() {
            format!("worker-{}", Ulid::new().to_string().to_lowercase())
        } else {
            config.name.clone()
        };

        Self {
            inner: Arc::new(WorkerInner {
                config,
                name,
                state: RwLock::new(RuntimeState::Stopped),
                registry: Arc::new(AgentRegistry::new()),
                sink: Arc::new(RwLock::new(None)),
                session: Mutex::new(None),
                counters: Arc::new(WorkerCounters::default()),
            }),
        }
    }

    /// Worker with default settings for the host at `host_address`
    pub fn connect_to(host_address: impl Into<String>) -> Self {
        Self::new(WorkerConfig::for_host(host_address))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> RuntimeState {
        *self.inner.state.read()
    }

    pub fn stats(&self) -> WorkerStats {
        self.inner.counters.snapshot()
    }

    /// Host-assigned connection id while running
    pub fn connection_id(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.connection_id.clone())
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    /// Declare an agent type; only valid before the worker is running
    pub fn register<A: Agent>(&self, agent_type: AgentType<A>) -> Result<()> {
        // Held across registration so `start` cannot race past `Starting`
        let state = self.inner.state.read();
        match *state {
            RuntimeState::Stopped | RuntimeState::Starting => self.inner.registry.register(agent_type),
            other => Err(MeshError::invalid_state("Stopped or Starting", other)),
        }
    }

    fn transition(&self, from: RuntimeState, to: RuntimeState) -> Result<()> {
        let mut state = self.inner.state.write();
        if *state != from {
            return Err(MeshError::invalid_state(state_name(from), *state));
        }
        debug!("Worker '{}' {} -> {}", self.inner.name, *state, to);
        *state = to;
        Ok(())
    }

    fn set_state(&self, to: RuntimeState) {
        *self.inner.state.write() = to;
    }

    /// Connect to the host, announce agent types and wait for `Welcome`
    pub async fn start(&self) -> Result<()> {
        self.transition(RuntimeState::Stopped, RuntimeState::Starting)?;

        match self.open_session().await {
            Ok(connection_id) => {
                self.set_state(RuntimeState::Running);
                info!(
                    "Worker '{}' running as {} with agent types {:?}",
                    self.inner.name,
                    connection_id,
                    self.inner.registry.agent_types()
                );
                Ok(())
            }
            Err(e) => {
                warn!("Worker '{}' failed to start: {}", self.inner.name, e);
                self.inner.sink.write().take();
                self.inner.registry.deactivate(self.inner.config.shutdown_grace()).await;
                self.set_state(RuntimeState::Stopped);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<String> {
        let inner = &self.inner;
        let WorkerChannel { sink, mut inbound } = transport::connect(&inner.config).await?;

        let hello = inner.registry.announce(&inner.name);
        sink.send(WorkerFrame {
            frame: Some(worker_frame::Frame::Hello(hello)),
        })
        .await?;

        let connection_id = tokio::time::timeout(inner.config.connect_timeout(), await_welcome(&mut inbound))
            .await
            .map_err(|_| MeshError::ConnectTimeout(inner.config.endpoint_uri()))??;

        let (outbound_tx, outbound_rx) = mpsc::channel(inner.config.outbound_capacity);
        inner.registry.activate(
            outbound_tx,
            Arc::clone(&inner.counters),
            inner.config.mailbox_capacity,
        );

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_outbound(
            outbound_rx,
            sink.clone(),
            cancel.clone(),
            Arc::clone(&inner.counters),
        ));
        let receiver = tokio::spawn(receive_from_host(
            inbound,
            cancel.clone(),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.sink),
            Arc::clone(&inner.counters),
            inner.config.endpoint_uri(),
        ));

        *inner.sink.write() = Some(sink);
        *inner.session.lock() = Some(Session {
            connection_id: connection_id.clone(),
            cancel,
            tasks: vec![pump, receiver],
        });

        Ok(connection_id)
    }

    /// Publish `message` on `topic` via the host
    pub async fn publish<M: Message>(&self, message: M, topic: TopicId) -> Result<MessageId> {
        self.submit(Envelope::publish(Payload::encode(&message), topic)).await
    }

    /// Send `message` to a single agent via the host
    pub async fn send_message<M: Message>(&self, message: M, recipient: AgentId) -> Result<MessageId> {
        self.submit(Envelope::direct(Payload::encode(&message), recipient)).await
    }

    /// Hand a prepared envelope to the host
    pub async fn submit(&self, envelope: Envelope) -> Result<MessageId> {
        let state = self.state();
        if state != RuntimeState::Running {
            return Err(MeshError::invalid_state("Running", state));
        }

        let sink = self
            .inner
            .sink
            .read()
            .clone()
            .ok_or_else(|| MeshError::TransportClosed(self.inner.config.endpoint_uri()))?;

        let message_id = envelope.message_id.clone();
        let kind = envelope.kind();
        sink.send(worker_envelope_frame(envelope)).await?;

        WorkerCounters::incr(&self.inner.counters.published);
        mesh_metrics::record_published(kind);
        debug!("Worker '{}' submitted {} {}", self.inner.name, kind, message_id);
        Ok(message_id)
    }

    /// Close the connection and stop every agent instance
    pub async fn stop(&self) -> Result<()> {
        self.transition(RuntimeState::Running, RuntimeState::Stopping)?;
        let grace = self.inner.config.shutdown_grace();

        // Dropping the last sink ends the request stream towards the host
        self.inner.sink.write().take();
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            join_or_abort(session.tasks, grace).await;
        }

        self.inner.registry.deactivate(grace).await;
        self.set_state(RuntimeState::Stopped);
        info!("Worker '{}' stopped", self.inner.name);
        Ok(())
    }
}

fn state_name(state: RuntimeState) -> &'static str {
    match state {
        RuntimeState::Stopped => "Stopped",
        RuntimeState::Starting => "Starting",
        RuntimeState::Running => "Running",
        RuntimeState::Stopping => "Stopping",
    }
}

async fn join_or_abort(tasks: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
    if tokio::time::timeout(grace, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!("Worker tasks did not finish within {:?}, aborting", grace);
        for abort in aborts {
            abort.abort();
        }
    }
}

/// The host answers `Hello` with `Welcome` or a rejection
async fn await_welcome(inbound: &mut Streaming<HostFrame>) -> Result<String> {
    match inbound.message().await? {
        Some(HostFrame {
            frame: Some(host_frame::Frame::Welcome(welcome)),
        }) => Ok(welcome.connection_id),
        Some(HostFrame {
            frame: Some(host_frame::Frame::Rejection(rejection)),
        }) => Err(rejection_to_error(&rejection)),
        Some(_) => Err(MeshError::Protocol(
            "expected Welcome as the first host frame".to_string(),
        )),
        None => Err(MeshError::TransportClosed(
            "host closed the channel during registration".to_string(),
        )),
    }
}

/// Drain handler posts to the host in queue order
async fn pump_outbound(
    mut queue: mpsc::Receiver<Envelope>,
    sink: FrameSink<WorkerFrame>,
    cancel: CancellationToken,
    counters: Arc<WorkerCounters>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let kind = envelope.kind();
        let message_id = envelope.message_id.clone();
        match sink.send(worker_envelope_frame(envelope)).await {
            Ok(()) => {
                WorkerCounters::incr(&counters.published);
                mesh_metrics::record_published(kind);
            }
            Err(e) => warn!("Dropping posted {} {}: {}", kind, message_id, e),
        }
    }
    debug!("Outbound pump stopped");
}

async fn receive_from_host(
    inbound: Streaming<HostFrame>,
    cancel: CancellationToken,
    registry: Arc<AgentRegistry>,
    sink: SinkSlot,
    counters: Arc<WorkerCounters>,
    peer: String,
) {
    let reason = transport::drive(inbound, cancel, &peer, |frame: HostFrame| {
        let registry = Arc::clone(&registry);
        let counters = Arc::clone(&counters);
        async move {
            handle_host_frame(&registry, &counters, frame).await;
            Flow::Continue
        }
    })
    .await;

    if reason != CloseReason::Cancelled {
        warn!("Connection to host {} lost: {:?}", peer, reason);
        sink.write().take();
    }
}

async fn handle_host_frame(registry: &AgentRegistry, counters: &WorkerCounters, frame: HostFrame) {
    match frame.frame {
        Some(host_frame::Frame::Envelope(wire)) => {
            WorkerCounters::incr(&counters.received);
            match Envelope::try_from(wire) {
                Ok(envelope) => dispatch_local(registry, counters, envelope).await,
                Err(e) => warn!("Discarding malformed envelope from host: {}", e),
            }
        }
        Some(host_frame::Frame::Rejection(rejection)) => {
            WorkerCounters::incr(&counters.rejected);
            warn!(
                "Host rejected {}: {}",
                display_id(&rejection),
                rejection_to_error(&rejection)
            );
        }
        Some(host_frame::Frame::Welcome(welcome)) => {
            debug!("Ignoring repeated Welcome ({})", welcome.connection_id);
        }
        None => warn!("Host sent an empty frame"),
    }
}

fn display_id(rejection: &proto::Rejection) -> &str {
    if rejection.message_id.is_empty() {
        "registration"
    } else {
        &rejection.message_id
    }
}

/// Waits on full mailboxes, which holds up further frames from the host
async fn dispatch_local(registry: &AgentRegistry, counters: &WorkerCounters, envelope: Envelope) {
    let recipients = match envelope.recipient() {
        Some(recipient) => vec![recipient.clone()],
        None => match envelope.topic() {
            Some(topic) => registry.local_recipients(topic),
            None => vec![],
        },
    };

    if recipients.is_empty() {
        debug!("No local recipient for {}", envelope.message_id);
        return;
    }

    for id in recipients {
        let delivered = match registry.resolve(&id) {
            Ok(instance) => instance.deliver(envelope.clone()).await,
            Err(e) => Err(e),
        };
        match delivered {
            Ok(()) => WorkerCounters::incr(&counters.delivered),
            Err(e) => warn!("Could not deliver {} to {}: {}", envelope.message_id, id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::proto::agent_host_server::{AgentHost, AgentHostServer};
    use crate::message::envelope::tests::Ping;
    use crate::runtime::agent::Handles;
    use crate::runtime::context::MessageContext;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
    use tonic::transport::Server;
    use tonic::{Request, Response, Status};

    struct Quiet;

    impl Agent for Quiet {}

    #[async_trait]
    impl Handles<Ping> for Quiet {
        async fn handle(&mut self, _message: Ping, _ctx: &MessageContext) -> Result<()> {
            Ok(())
        }
    }

    fn quiet(name: &str) -> AgentType<Quiet> {
        AgentType::new(name, || Quiet)
            .with_default_subscription()
            .handles::<Ping>()
    }

    fn unreachable_worker() -> WorkerHandle {
        WorkerHandle::new(WorkerConfig {
            connect_timeout_ms: 300,
            ..WorkerConfig::for_host("127.0.0.1:1")
        })
    }

    #[test]
    fn test_generated_name() {
        let worker = WorkerHandle::connect_to("127.0.0.1:1");
        assert!(worker.name().starts_with("worker-"));

        let named = WorkerHandle::new(WorkerConfig::for_host("127.0.0.1:1").with_name("alpha"));
        assert_eq!(named.name(), "alpha");
    }

    #[tokio::test]
    async fn test_publish_before_start_is_invalid() {
        let worker = unreachable_worker();
        let err = worker
            .publish(Ping::default(), TopicId::default_topic())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_invalid() {
        let worker = unreachable_worker();
        assert!(matches!(worker.stop().await, Err(MeshError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_failed_start_returns_to_stopped() {
        let worker = unreachable_worker();
        worker.register(quiet("quiet")).unwrap();

        assert!(worker.start().await.is_err());
        assert_eq!(worker.state(), RuntimeState::Stopped);

        // Registration is still open after a failed start
        worker.register(quiet("other")).unwrap();
        assert_eq!(
            worker.registry().agent_types(),
            vec!["quiet".to_string(), "other".to_string()]
        );
    }

    /// Host that holds its Welcome back for `delay` after reading Hello
    struct SlowWelcome {
        hello_seen: Arc<Notify>,
        delay: Duration,
    }

    #[tonic::async_trait]
    impl AgentHost for SlowWelcome {
        type OpenChannelStream = ReceiverStream<std::result::Result<HostFrame, Status>>;

        async fn open_channel(
            &self,
            request: Request<Streaming<WorkerFrame>>,
        ) -> std::result::Result<Response<Self::OpenChannelStream>, Status> {
            let mut inbound = request.into_inner();
            let (tx, rx) = mpsc::channel(4);
            let hello_seen = Arc::clone(&self.hello_seen);
            let delay = self.delay;

            tokio::spawn(async move {
                if let Ok(Some(_hello)) = inbound.message().await {
                    hello_seen.notify_one();
                    tokio::time::sleep(delay).await;
                    let welcome = HostFrame {
                        frame: Some(host_frame::Frame::Welcome(proto::Welcome {
                            connection_id: "conn-slow".to_string(),
                        })),
                    };
                    let _ = tx.send(Ok(welcome)).await;
                }
                while let Ok(Some(_)) = inbound.message().await {}
            });

            Ok(Response::new(ReceiverStream::new(rx)))
        }
    }

    #[tokio::test]
    async fn test_register_while_awaiting_welcome_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hello_seen = Arc::new(Notify::new());
        let host = SlowWelcome {
            hello_seen: Arc::clone(&hello_seen),
            delay: Duration::from_millis(200),
        };
        let server = tokio::spawn(
            Server::builder()
                .add_service(AgentHostServer::new(host))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        let worker = WorkerHandle::new(WorkerConfig {
            connect_timeout_ms: 2_000,
            ..WorkerConfig::for_host(addr.to_string())
        });
        worker.register(quiet("early")).unwrap();

        let starting = tokio::spawn({
            let worker = worker.clone();
            async move { worker.start().await }
        });
        tokio::time::timeout(Duration::from_secs(2), hello_seen.notified())
            .await
            .unwrap();

        assert_eq!(worker.state(), RuntimeState::Starting);
        assert!(matches!(
            worker.register(quiet("late")),
            Err(MeshError::InvalidState { .. })
        ));

        starting.await.unwrap().unwrap();
        assert_eq!(worker.state(), RuntimeState::Running);
        assert_eq!(worker.connection_id().as_deref(), Some("conn-slow"));
        assert_eq!(worker.registry().agent_types(), vec!["early".to_string()]);

        worker.stop().await.unwrap();
        server.abort();
    }

    #[test]
    fn test_duplicate_type_rejected_locally() {
        let worker = unreachable_worker();
        worker.register(quiet("quiet")).unwrap();
        assert!(matches!(
            worker.register(quiet("quiet")),
            Err(MeshError::DuplicateRegistration(_))
        ));
    }
}
