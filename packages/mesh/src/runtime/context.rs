// packages/mesh/src/runtime/context.rs
//! Per-delivery handler context

use crate::message::{AgentId, Envelope, Message, MessageId, Payload, TopicId};
use parking_lot::Mutex;

/// What a handler sees about the envelope it is processing, plus a way to
/// post follow-up envelopes.
///
/// Posted envelopes are held until the handler returns. They are handed to
/// the worker's outbound queue only if the handler succeeded, in the order
/// they were posted.
pub struct MessageContext {
    agent_id: AgentId,
    message_id: MessageId,
    sender: Option<AgentId>,
    topic: Option<TopicId>,
    correlation_id: String,
    posted: Mutex<Vec<Envelope>>,
}

impl MessageContext {
    pub(crate) fn for_envelope(agent_id: AgentId, envelope: &Envelope) -> Self {
        Self {
            agent_id,
            message_id: envelope.message_id.clone(),
            sender: envelope.sender.clone(),
            topic: envelope.topic().cloned(),
            correlation_id: envelope.correlation_root().to_string(),
            posted: Mutex::new(vec![]),
        }
    }

    /// Identity of the agent handling the envelope
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn sender(&self) -> Option<&AgentId> {
        self.sender.as_ref()
    }

    /// Topic the envelope was published on; `None` for direct messages
    pub fn topic(&self) -> Option<&TopicId> {
        self.topic.as_ref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Publish `message` on `topic` once this handler returns
    pub fn publish<M: Message>(&self, message: M, topic: TopicId) -> MessageId {
        self.post(Envelope::publish(Payload::encode(&message), topic))
    }

    /// Send `message` directly to `recipient` once this handler returns
    pub fn send<M: Message>(&self, message: M, recipient: AgentId) -> MessageId {
        self.post(Envelope::direct(Payload::encode(&message), recipient))
    }

    fn post(&self, envelope: Envelope) -> MessageId {
        let envelope = envelope
            .with_sender(self.agent_id.clone())
            .with_correlation_id(self.correlation_id.clone());
        let id = envelope.message_id.clone();
        self.posted.lock().push(envelope);
        id
    }

    pub(crate) fn take_posted(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.posted.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::tests::{Ping, Pong};
    use crate::message::Destination;

    #[test]
    fn test_context_from_topic_envelope() {
        let envelope = Envelope::publish(Payload::encode(&Ping::default()), TopicId::default_topic())
            .with_sender(AgentId::new("origin", "default"));
        let ctx = MessageContext::for_envelope(AgentId::new("echo", "default"), &envelope);

        assert_eq!(ctx.agent_id(), &AgentId::new("echo", "default"));
        assert_eq!(ctx.message_id(), &envelope.message_id);
        assert_eq!(ctx.sender(), Some(&AgentId::new("origin", "default")));
        assert_eq!(ctx.topic(), Some(&TopicId::default_topic()));
        assert_eq!(ctx.correlation_id(), envelope.message_id.as_str());
    }

    #[test]
    fn test_posted_envelopes_carry_sender_and_correlation() {
        let envelope = Envelope::direct(Payload::encode(&Ping::default()), AgentId::new("echo", "k"))
            .with_correlation_id("root-1");
        let ctx = MessageContext::for_envelope(AgentId::new("echo", "k"), &envelope);
        assert!(ctx.topic().is_none());

        let first = ctx.publish(Pong { count: 1 }, TopicId::default_topic());
        let second = ctx.send(Pong { count: 2 }, AgentId::new("counter", "k"));

        let posted = ctx.take_posted();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].message_id, first);
        assert_eq!(posted[1].message_id, second);
        for envelope in &posted {
            assert_eq!(envelope.sender, Some(AgentId::new("echo", "k")));
            assert_eq!(envelope.correlation_id.as_deref(), Some("root-1"));
        }
        assert!(matches!(posted[1].destination, Destination::Agent(_)));
        assert_eq!(posted[1].payload.decode::<Pong>().unwrap().count, 2);

        assert!(ctx.take_posted().is_empty());
    }
}
