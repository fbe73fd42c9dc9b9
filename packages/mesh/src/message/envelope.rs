// packages/mesh/src/message/envelope.rs
//! Envelopes and schema-encoded payloads
//!
//! Payloads are protobuf-encoded (`prost`) and tagged with the message's
//! stable type name, so any language with the schema can produce and
//! consume them. Handler dispatch keys on that tag.

use crate::message::topic::{AgentId, TopicId};
use crate::utils::errors::{MeshError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use ulid::Ulid;

/// Content type of protobuf payloads
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// A message type that can travel through the mesh
///
/// ```rust,ignore
/// #[derive(Clone, PartialEq, prost::Message)]
/// pub struct Greeting {
///     #[prost(string, tag = "1")]
///     pub content: String,
/// }
///
/// impl Message for Greeting {
///     const TYPE_NAME: &'static str = "demo.Greeting";
/// }
/// ```
pub trait Message: prost::Message + Default + Send + Sync + 'static {
    /// Stable type tag carried on the wire
    const TYPE_NAME: &'static str;
}

/// Unique message identifier (ULID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoded message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub type_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Payload {
    /// Encode a message
    pub fn encode<M: Message>(message: &M) -> Self {
        Self {
            type_name: M::TYPE_NAME.to_string(),
            content_type: PROTOBUF_CONTENT_TYPE.to_string(),
            data: Bytes::from(message.encode_to_vec()),
        }
    }

    /// Whether the payload carries an `M`
    pub fn is<M: Message>(&self) -> bool {
        self.type_name == M::TYPE_NAME
    }

    /// Decode into `M`, checking the type tag first
    pub fn decode<M: Message>(&self) -> Result<M> {
        if !self.is::<M>() {
            return Err(MeshError::SerializationMismatch {
                expected: M::TYPE_NAME.to_string(),
                found: self.type_name.clone(),
            });
        }
        if !self.content_type.is_empty() && self.content_type != PROTOBUF_CONTENT_TYPE {
            return Err(MeshError::SerializationMismatch {
                expected: PROTOBUF_CONTENT_TYPE.to_string(),
                found: self.content_type.clone(),
            });
        }

        Ok(M::decode(self.data.clone())?)
    }
}

/// Where an envelope goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every agent subscribed to the topic
    Topic(TopicId),

    /// One agent, bypassing subscriptions
    Agent(AgentId),
}

/// Payload plus routing metadata
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_id: MessageId,
    pub destination: Destination,
    pub sender: Option<AgentId>,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub published_at: SystemTime,
    pub payload: Payload,
}

impl Envelope {
    fn new(payload: Payload, destination: Destination) -> Self {
        Self {
            message_id: MessageId::generate(),
            destination,
            sender: None,
            correlation_id: None,
            metadata: HashMap::new(),
            published_at: SystemTime::now(),
            payload,
        }
    }

    /// Envelope broadcast on a topic
    pub fn publish(payload: Payload, topic: TopicId) -> Self {
        Self::new(payload, Destination::Topic(topic))
    }

    /// Envelope addressed to a single agent
    pub fn direct(payload: Payload, recipient: AgentId) -> Self {
        Self::new(payload, Destination::Agent(recipient))
    }

    pub fn with_sender(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn topic(&self) -> Option<&TopicId> {
        match &self.destination {
            Destination::Topic(topic) => Some(topic),
            Destination::Agent(_) => None,
        }
    }

    pub fn recipient(&self) -> Option<&AgentId> {
        match &self.destination {
            Destination::Agent(agent) => Some(agent),
            Destination::Topic(_) => None,
        }
    }

    /// `publish` or `direct`
    pub fn kind(&self) -> &'static str {
        match self.destination {
            Destination::Topic(_) => "publish",
            Destination::Agent(_) => "direct",
        }
    }

    /// Correlation id for envelopes caused by this one
    pub fn correlation_root(&self) -> &str {
        self.correlation_id
            .as_deref()
            .unwrap_or_else(|| self.message_id.as_str())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Ping {
        #[prost(string, tag = "1")]
        pub content: String,
    }

    impl Message for Ping {
        const TYPE_NAME: &'static str = "test.Ping";
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Pong {
        #[prost(uint32, tag = "1")]
        pub count: u32,
    }

    impl Message for Pong {
        const TYPE_NAME: &'static str = "test.Pong";
    }

    #[test]
    fn test_payload_decode() {
        let payload = Payload::encode(&Ping {
            content: "hello".to_string(),
        });
        assert_eq!(payload.type_name, "test.Ping");
        assert_eq!(payload.content_type, PROTOBUF_CONTENT_TYPE);
        assert!(payload.is::<Ping>());

        let ping: Ping = payload.decode().unwrap();
        assert_eq!(ping.content, "hello");
    }

    #[test]
    fn test_payload_type_mismatch() {
        let payload = Payload::encode(&Ping::default());
        let err = payload.decode::<Pong>().unwrap_err();
        match err {
            MeshError::SerializationMismatch { expected, found } => {
                assert_eq!(expected, "test.Pong");
                assert_eq!(found, "test.Ping");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_payload_content_type_mismatch() {
        let mut payload = Payload::encode(&Ping::default());
        payload.content_type = "application/json".to_string();
        assert!(matches!(
            payload.decode::<Ping>(),
            Err(MeshError::SerializationMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_corrupt_bytes() {
        let payload = Payload {
            type_name: Ping::TYPE_NAME.to_string(),
            content_type: PROTOBUF_CONTENT_TYPE.to_string(),
            data: Bytes::from_static(&[0xff, 0xff, 0xff]),
        };
        assert!(matches!(payload.decode::<Ping>(), Err(MeshError::Decode(_))));
    }

    #[test]
    fn test_envelope_destinations() {
        let topic = Envelope::publish(Payload::encode(&Ping::default()), TopicId::default_topic());
        assert_eq!(topic.kind(), "publish");
        assert_eq!(topic.topic(), Some(&TopicId::default_topic()));
        assert!(topic.recipient().is_none());

        let direct = Envelope::direct(Payload::encode(&Ping::default()), AgentId::new("a", "b"));
        assert_eq!(direct.kind(), "direct");
        assert!(direct.topic().is_none());
        assert_eq!(direct.recipient(), Some(&AgentId::new("a", "b")));
    }

    #[test]
    fn test_correlation_root() {
        let envelope = Envelope::publish(Payload::encode(&Ping::default()), TopicId::default_topic());
        assert_eq!(envelope.correlation_root(), envelope.message_id.as_str());

        let envelope = envelope.with_correlation_id("chain-1");
        assert_eq!(envelope.correlation_root(), "chain-1");
    }

    #[test]
    fn test_message_ids_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
