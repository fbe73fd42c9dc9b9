// packages/mesh/src/host/subscription_table.rs
//! Host-wide subscription table
//!
//! Maps topic patterns to agent types. Lookups return matches in
//! registration order so fan-out is reproducible.

use crate::grpc::proto;
use crate::message::{TopicId, TopicPattern};
use crate::utils::errors::{MeshError, Result};
use std::collections::HashSet;
use std::fmt;

/// Binding of a topic pattern to an agent type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub agent_type: String,
    pub pattern: TopicPattern,
}

impl Subscription {
    pub fn new(agent_type: impl Into<String>, pattern: TopicPattern) -> Self {
        Self {
            agent_type: agent_type.into(),
            pattern,
        }
    }

    /// Subscription to the default topic type
    pub fn default_for(agent_type: impl Into<String>) -> Self {
        Self::new(agent_type, TopicPattern::default_subscription())
    }

    pub fn matches(&self, topic: &TopicId) -> bool {
        self.pattern.matches(topic)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.pattern, self.agent_type)
    }
}

impl From<Subscription> for proto::Subscription {
    fn from(subscription: Subscription) -> Self {
        proto::Subscription {
            agent_type: subscription.agent_type,
            pattern: Some(subscription.pattern.into()),
        }
    }
}

impl TryFrom<proto::Subscription> for Subscription {
    type Error = MeshError;

    fn try_from(subscription: proto::Subscription) -> Result<Self> {
        let pattern = subscription.pattern.ok_or_else(|| {
            MeshError::Protocol(format!(
                "Subscription for {} has no topic pattern",
                subscription.agent_type
            ))
        })?;
        Ok(Subscription::new(subscription.agent_type, pattern.into()))
    }
}

/// Ordered, duplicate-free set of subscriptions
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
    seen: HashSet<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription; returns false if it was already present
    pub fn subscribe(&mut self, subscription: Subscription) -> bool {
        if self.seen.contains(&subscription) {
            return false;
        }
        self.seen.insert(subscription.clone());
        self.entries.push(subscription);
        true
    }

    /// Subscriptions matching `topic`, in registration order
    pub fn subscribers_for(&self, topic: &TopicId) -> Vec<&Subscription> {
        self.entries.iter().filter(|s| s.matches(topic)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut table = SubscriptionTable::new();
        assert!(table.subscribe(Subscription::default_for("worker1")));
        assert!(!table.subscribe(Subscription::default_for("worker1")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_subscribers_in_registration_order() {
        let mut table = SubscriptionTable::new();
        table.subscribe(Subscription::default_for("b"));
        table.subscribe(Subscription::new("x", TopicPattern::Type("other".into())));
        table.subscribe(Subscription::default_for("a"));

        let agent_types: Vec<_> = table
            .subscribers_for(&TopicId::default_topic())
            .into_iter()
            .map(|s| s.agent_type.as_str())
            .collect();
        assert_eq!(agent_types, vec!["b", "a"]);
    }

    #[test]
    fn test_exact_subscription_ignores_other_sources() {
        let mut table = SubscriptionTable::new();
        table.subscribe(Subscription::new(
            "greeter",
            TopicPattern::Exact(TopicId::new("HelloTopic", "room-1")),
        ));

        assert_eq!(table.subscribers_for(&TopicId::new("HelloTopic", "room-1")).len(), 1);
        assert!(table.subscribers_for(&TopicId::new("HelloTopic", "room-2")).is_empty());
    }

    #[test]
    fn test_proto_subscription_requires_pattern() {
        let wire = proto::Subscription {
            agent_type: "greeter".into(),
            pattern: None,
        };
        assert!(Subscription::try_from(wire).is_err());

        let wire: proto::Subscription = Subscription::default_for("greeter").into();
        assert_eq!(
            Subscription::try_from(wire).unwrap(),
            Subscription::default_for("greeter")
        );
    }

    proptest! {
        #[test]
        fn prop_order_is_first_registration(agent_types in proptest::collection::vec("[a-d]", 0..32)) {
            let mut table = SubscriptionTable::new();
            let mut expected: Vec<String> = vec![];
            for agent_type in &agent_types {
                table.subscribe(Subscription::default_for(agent_type.clone()));
                if !expected.contains(agent_type) {
                    expected.push(agent_type.clone());
                }
            }

            let found: Vec<String> = table
                .subscribers_for(&TopicId::default_topic())
                .into_iter()
                .map(|s| s.agent_type.clone())
                .collect();
            prop_assert_eq!(found, expected);
        }
    }
}
