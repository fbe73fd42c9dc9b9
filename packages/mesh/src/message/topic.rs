// packages/mesh/src/message/topic.rs
//! Agent and topic identities

use std::fmt;

/// Topic type used by the default subscription
pub const DEFAULT_TOPIC_TYPE: &str = "default";

/// Source of the default topic, and therefore the key of default-subscribed agents
pub const DEFAULT_TOPIC_SOURCE: &str = "default";

/// Identity of one agent instance, unique across every worker on a host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId {
    pub agent_type: String,
    pub key: String,
}

impl AgentId {
    pub fn new(agent_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

/// A broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicId {
    pub topic_type: String,
    pub source: String,
}

impl TopicId {
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            topic_type: topic_type.into(),
            source: source.into(),
        }
    }

    /// `("default", "default")`
    pub fn default_topic() -> Self {
        Self::new(DEFAULT_TOPIC_TYPE, DEFAULT_TOPIC_SOURCE)
    }

    /// Topic of the given type with the default source
    pub fn of_type(topic_type: impl Into<String>) -> Self {
        Self::new(topic_type, DEFAULT_TOPIC_SOURCE)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}

/// Subscription pattern. Both forms compare strings exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Any topic of this type; the topic source becomes the recipient's key
    Type(String),

    /// Only this (type, source) pair
    Exact(TopicId),
}

impl TopicPattern {
    /// The pattern declared by a default subscription
    pub fn default_subscription() -> Self {
        TopicPattern::Type(DEFAULT_TOPIC_TYPE.to_string())
    }

    pub fn matches(&self, topic: &TopicId) -> bool {
        match self {
            TopicPattern::Type(topic_type) => *topic_type == topic.topic_type,
            TopicPattern::Exact(exact) => exact == topic,
        }
    }

    /// Agent that receives `topic` on behalf of `agent_type`, or `None` when
    /// this pattern does not cover `topic`
    pub fn recipient(&self, agent_type: &str, topic: &TopicId) -> Option<AgentId> {
        self.matches(topic)
            .then(|| AgentId::new(agent_type, topic.source.clone()))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicPattern::Type(topic_type) => write!(f, "{}/*", topic_type),
            TopicPattern::Exact(topic) => write!(f, "{}", topic),
        }
    }
}
