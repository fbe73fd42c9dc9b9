// packages/mesh/src/grpc/convert.rs
//! Conversions between wire frames and the message model

use crate::grpc::proto;
use crate::message::{AgentId, Destination, Envelope, MessageId, Payload, TopicId, TopicPattern};
use crate::utils::errors::{MeshError, Result};
use std::time::SystemTime;

impl From<AgentId> for proto::AgentId {
    fn from(id: AgentId) -> Self {
        proto::AgentId {
            agent_type: id.agent_type,
            key: id.key,
        }
    }
}

impl From<proto::AgentId> for AgentId {
    fn from(id: proto::AgentId) -> Self {
        AgentId::new(id.agent_type, id.key)
    }
}

impl From<TopicId> for proto::TopicId {
    fn from(topic: TopicId) -> Self {
        proto::TopicId {
            topic_type: topic.topic_type,
            source: topic.source,
        }
    }
}

impl From<proto::TopicId> for TopicId {
    fn from(topic: proto::TopicId) -> Self {
        TopicId::new(topic.topic_type, topic.source)
    }
}

impl From<Payload> for proto::Payload {
    fn from(payload: Payload) -> Self {
        proto::Payload {
            type_name: payload.type_name,
            content_type: payload.content_type,
            data: payload.data,
        }
    }
}

impl From<proto::Payload> for Payload {
    fn from(payload: proto::Payload) -> Self {
        Payload {
            type_name: payload.type_name,
            content_type: payload.content_type,
            data: payload.data,
        }
    }
}

impl From<TopicPattern> for proto::subscription::Pattern {
    fn from(pattern: TopicPattern) -> Self {
        match pattern {
            TopicPattern::Type(topic_type) => proto::subscription::Pattern::TopicType(topic_type),
            TopicPattern::Exact(topic) => proto::subscription::Pattern::Exact(topic.into()),
        }
    }
}

impl From<proto::subscription::Pattern> for TopicPattern {
    fn from(pattern: proto::subscription::Pattern) -> Self {
        match pattern {
            proto::subscription::Pattern::TopicType(topic_type) => TopicPattern::Type(topic_type),
            proto::subscription::Pattern::Exact(topic) => TopicPattern::Exact(topic.into()),
        }
    }
}

impl From<Envelope> for proto::Envelope {
    fn from(envelope: Envelope) -> Self {
        let destination = match envelope.destination {
            Destination::Topic(topic) => proto::envelope::Destination::Topic(topic.into()),
            Destination::Agent(agent) => proto::envelope::Destination::Recipient(agent.into()),
        };

        proto::Envelope {
            message_id: envelope.message_id.to_string(),
            destination: Some(destination),
            sender: envelope.sender.map(Into::into),
            correlation_id: envelope.correlation_id.unwrap_or_default(),
            metadata: envelope.metadata,
            published_at: Some(prost_types::Timestamp::from(envelope.published_at)),
            payload: Some(envelope.payload.into()),
        }
    }
}

impl TryFrom<proto::Envelope> for Envelope {
    type Error = MeshError;

    fn try_from(envelope: proto::Envelope) -> Result<Self> {
        let destination = match envelope.destination {
            Some(proto::envelope::Destination::Topic(topic)) => Destination::Topic(topic.into()),
            Some(proto::envelope::Destination::Recipient(agent)) => Destination::Agent(agent.into()),
            None => {
                return Err(MeshError::Protocol(format!(
                    "Envelope {} has no destination",
                    envelope.message_id
                )))
            }
        };

        let payload = envelope.payload.ok_or_else(|| {
            MeshError::Protocol(format!("Envelope {} has no payload", envelope.message_id))
        })?;

        let published_at = envelope
            .published_at
            .and_then(|ts| SystemTime::try_from(ts).ok())
            .unwrap_or_else(SystemTime::now);

        let correlation_id = if envelope.correlation_id.is_empty() {
            None
        } else {
            Some(envelope.correlation_id)
        };

        Ok(Envelope {
            message_id: MessageId::from(envelope.message_id),
            destination,
            sender: envelope.sender.map(Into::into),
            correlation_id,
            metadata: envelope.metadata,
            published_at,
            payload: payload.into(),
        })
    }
}

/// Wrap an envelope into a worker frame
pub fn worker_envelope_frame(envelope: Envelope) -> proto::WorkerFrame {
    proto::WorkerFrame {
        frame: Some(proto::worker_frame::Frame::Envelope(envelope.into())),
    }
}

/// Map a host rejection onto the matching error
pub fn rejection_to_error(rejection: &proto::Rejection) -> MeshError {
    match proto::RejectionKind::try_from(rejection.kind).unwrap_or(proto::RejectionKind::Unspecified) {
        proto::RejectionKind::DuplicateRegistration => {
            MeshError::DuplicateRegistration(rejection.message.clone())
        }
        proto::RejectionKind::UnknownAgentType => MeshError::UnknownAgentType(rejection.message.clone()),
        proto::RejectionKind::InvalidState => MeshError::InvalidState {
            expected: "Active",
            actual: rejection.message.clone(),
        },
        proto::RejectionKind::Protocol | proto::RejectionKind::Unspecified => {
            MeshError::Protocol(rejection.message.clone())
        }
    }
}

/// Build a rejection frame for an error raised by the host
pub fn rejection_frame(error: &MeshError, message_id: impl Into<String>) -> proto::HostFrame {
    let kind = match error {
        MeshError::DuplicateRegistration(_) => proto::RejectionKind::DuplicateRegistration,
        MeshError::UnknownAgentType(_) => proto::RejectionKind::UnknownAgentType,
        MeshError::InvalidState { .. } => proto::RejectionKind::InvalidState,
        _ => proto::RejectionKind::Protocol,
    };

    // Carry the bare name for registry errors so the worker can rebuild them
    let message = match error {
        MeshError::DuplicateRegistration(name) | MeshError::UnknownAgentType(name) => name.clone(),
        MeshError::InvalidState { actual, .. } => actual.clone(),
        other => other.to_string(),
    };

    proto::HostFrame {
        frame: Some(proto::host_frame::Frame::Rejection(proto::Rejection {
            kind: kind as i32,
            message,
            message_id: message_id.into(),
        })),
    }
}
