use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types supported by the system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Motion gate
    MotionTriggered,
    TriggerDropped,

    // Pipeline outcomes
    EventCreated,
    PipelineFailed,

    // Conversation
    ConversationTurnAdded,

    // System events
    SystemStartup,
    SystemShutdown,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MotionTriggered => write!(f, "motion.triggered"),
            Self::TriggerDropped => write!(f, "motion.trigger_dropped"),
            Self::EventCreated => write!(f, "pipeline.event_created"),
            Self::PipelineFailed => write!(f, "pipeline.failed"),
            Self::ConversationTurnAdded => write!(f, "conversation.turn_added"),
            Self::SystemStartup => write!(f, "system.startup"),
            Self::SystemShutdown => write!(f, "system.shutdown"),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique message ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Source ID (e.g. the security event the message is about)
    pub source_id: Option<Uuid>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    /// Create a new event message
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Get the routing key for the event
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}

/// Topic-style match: `*` matches one dot-separated word, `#` any suffix.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let mut keys = routing_key.split('.');
    for part in pattern.split('.') {
        match part {
            "#" => return true,
            "*" => {
                if keys.next().is_none() {
                    return false;
                }
            }
            literal => {
                if keys.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    keys.next().is_none()
}
