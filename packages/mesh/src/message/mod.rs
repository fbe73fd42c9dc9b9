// packages/mesh/src/message/mod.rs
//! Message envelope and topic model
//!
//! - **AgentId**: (agent type, key) identity of one agent instance
//! - **TopicId**: (topic type, source) broadcast channel
//! - **TopicPattern**: what an agent type subscribes to
//! - **Payload**: schema-encoded message body with its type tag
//! - **Envelope**: payload plus routing metadata, one per publish/send

pub mod envelope;
pub mod topic;

pub use envelope::{Destination, Envelope, Message, MessageId, Payload, PROTOBUF_CONTENT_TYPE};
pub use topic::{AgentId, TopicId, TopicPattern, DEFAULT_TOPIC_SOURCE, DEFAULT_TOPIC_TYPE};
