// packages/mesh/src/runtime/agent.rs
//! Agent definitions and typed dispatch
//!
//! An agent type bundles a factory, its topic subscriptions and a dispatch
//! table from payload type tag to handler. The table is built once when the
//! type is declared; delivery is a lookup, not runtime type inspection.
//!
//! ```rust,ignore
//! let greeter = AgentType::new("greeter", || Greeter::default())
//!     .with_default_subscription()
//!     .handles::<Greeting>()
//!     .handles::<Farewell>();
//! worker.register(greeter)?;
//! ```

use crate::message::{Message, Payload, TopicPattern};
use crate::runtime::context::MessageContext;
use crate::utils::errors::{MeshError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Behavior with private state, owned by one worker
pub trait Agent: Send + 'static {}

/// Handler for one message type
#[async_trait]
pub trait Handles<M: Message>: Agent {
    async fn handle(&mut self, message: M, ctx: &MessageContext) -> Result<()>;
}

type HandlerFn<A> = for<'a> fn(&'a mut A, Payload, &'a MessageContext) -> BoxFuture<'a, Result<()>>;

fn dispatch_to<'a, A, M>(agent: &'a mut A, payload: Payload, ctx: &'a MessageContext) -> BoxFuture<'a, Result<()>>
where
    A: Handles<M>,
    M: Message,
{
    Box::pin(async move {
        let message = payload.decode::<M>()?;
        agent.handle(message, ctx).await
    })
}

/// Declaration of an agent type: name, factory, subscriptions, handlers
pub struct AgentType<A: Agent> {
    name: String,
    factory: Arc<dyn Fn() -> A + Send + Sync>,
    subscriptions: Vec<TopicPattern>,
    handlers: HashMap<&'static str, HandlerFn<A>>,
}

impl<A: Agent> AgentType<A> {
    pub fn new(name: impl Into<String>, factory: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            subscriptions: vec![],
            handlers: HashMap::new(),
        }
    }

    /// Subscribe to the default topic type
    pub fn with_default_subscription(self) -> Self {
        self.subscribe(TopicPattern::default_subscription())
    }

    /// Subscribe to every topic of `topic_type`
    pub fn subscribe_to_type(self, topic_type: impl Into<String>) -> Self {
        self.subscribe(TopicPattern::Type(topic_type.into()))
    }

    pub fn subscribe(mut self, pattern: TopicPattern) -> Self {
        if !self.subscriptions.contains(&pattern) {
            self.subscriptions.push(pattern);
        }
        self
    }

    /// Route payloads tagged `M::TYPE_NAME` to `<A as Handles<M>>::handle`
    pub fn handles<M: Message>(mut self) -> Self
    where
        A: Handles<M>,
    {
        self.handlers.insert(M::TYPE_NAME, dispatch_to::<A, M> as HandlerFn<A>);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Type-erased agent type, as stored by the registry
pub(crate) trait AgentFactory: Send + Sync {
    fn name(&self) -> &str;
    fn subscriptions(&self) -> &[TopicPattern];
    fn handled_types(&self) -> Vec<&'static str>;
    fn instantiate(&self) -> Box<dyn ErasedAgent>;
}

/// Type-erased agent instance
#[async_trait]
pub(crate) trait ErasedAgent: Send {
    async fn dispatch(&mut self, payload: Payload, ctx: &MessageContext) -> Result<()>;
}

pub(crate) struct RegisteredType<A: Agent> {
    name: String,
    factory: Arc<dyn Fn() -> A + Send + Sync>,
    subscriptions: Vec<TopicPattern>,
    handlers: Arc<HashMap<&'static str, HandlerFn<A>>>,
}

impl<A: Agent> From<AgentType<A>> for RegisteredType<A> {
    fn from(agent_type: AgentType<A>) -> Self {
        Self {
            name: agent_type.name,
            factory: agent_type.factory,
            subscriptions: agent_type.subscriptions,
            handlers: Arc::new(agent_type.handlers),
        }
    }
}

impl<A: Agent> AgentFactory for RegisteredType<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriptions(&self) -> &[TopicPattern] {
        &self.subscriptions
    }

    fn handled_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn instantiate(&self) -> Box<dyn ErasedAgent> {
        Box::new(TypedAgent {
            agent: (self.factory)(),
            handlers: Arc::clone(&self.handlers),
        })
    }
}

struct TypedAgent<A: Agent> {
    agent: A,
    handlers: Arc<HashMap<&'static str, HandlerFn<A>>>,
}

#[async_trait]
impl<A: Agent> ErasedAgent for TypedAgent<A> {
    async fn dispatch(&mut self, payload: Payload, ctx: &MessageContext) -> Result<()> {
        let handler = match self.handlers.get(payload.type_name.as_str()) {
            Some(handler) => *handler,
            None => {
                let mut accepted: Vec<_> = self.handlers.keys().copied().collect();
                accepted.sort_unstable();
                return Err(MeshError::SerializationMismatch {
                    expected: accepted.join(" | "),
                    found: payload.type_name,
                });
            }
        };
        handler(&mut self.agent, payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::tests::{Ping, Pong};
    use crate::message::{AgentId, Envelope, TopicId};

    #[derive(Default)]
    struct Recorder {
        pings: Vec<String>,
        pongs: Vec<u32>,
    }

    impl Agent for Recorder {}

    #[async_trait]
    impl Handles<Ping> for Recorder {
        async fn handle(&mut self, message: Ping, _ctx: &MessageContext) -> Result<()> {
            self.pings.push(message.content);
            Ok(())
        }
    }

    #[async_trait]
    impl Handles<Pong> for Recorder {
        async fn handle(&mut self, message: Pong, _ctx: &MessageContext) -> Result<()> {
            self.pongs.push(message.count);
            Ok(())
        }
    }

    fn context() -> MessageContext {
        let envelope = Envelope::publish(Payload::encode(&Ping::default()), TopicId::default_topic());
        MessageContext::for_envelope(AgentId::new("recorder", "default"), &envelope)
    }

    #[tokio::test]
    async fn test_dispatch_by_type_tag() {
        let mut agent = TypedAgent {
            agent: Recorder::default(),
            handlers: RegisteredType::from(
                AgentType::new("recorder", Recorder::default)
                    .handles::<Ping>()
                    .handles::<Pong>(),
            )
            .handlers,
        };
        let ctx = context();

        agent
            .dispatch(Payload::encode(&Ping { content: "a".into() }), &ctx)
            .await
            .unwrap();
        agent
            .dispatch(Payload::encode(&Pong { count: 3 }), &ctx)
            .await
            .unwrap();

        assert_eq!(agent.agent.pings, vec!["a".to_string()]);
        assert_eq!(agent.agent.pongs, vec![3]);
    }

    #[tokio::test]
    async fn test_unhandled_type_is_mismatch() {
        let registered = RegisteredType::from(AgentType::new("recorder", Recorder::default).handles::<Ping>());
        let mut agent = registered.instantiate();

        let err = agent
            .dispatch(Payload::encode(&Pong { count: 1 }), &context())
            .await
            .unwrap_err();
        match err {
            MeshError::SerializationMismatch { expected, found } => {
                assert_eq!(expected, "test.Ping");
                assert_eq!(found, "test.Pong");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_subscriptions_deduplicated() {
        let agent_type = AgentType::new("recorder", Recorder::default)
            .with_default_subscription()
            .with_default_subscription()
            .subscribe_to_type("HelloTopic");
        let registered = RegisteredType::from(agent_type);

        assert_eq!(
            registered.subscriptions(),
            &[
                TopicPattern::default_subscription(),
                TopicPattern::Type("HelloTopic".into())
            ]
        );
    }

    #[test]
    fn test_handled_types_sorted() {
        let registered = RegisteredType::from(
            AgentType::new("recorder", Recorder::default)
                .handles::<Pong>()
                .handles::<Ping>(),
        );
        assert_eq!(registered.handled_types(), vec!["test.Ping", "test.Pong"]);
    }
}
