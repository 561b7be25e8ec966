use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One question/answer exchange anchored to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub event_id: Uuid,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    /// Zero-based, gapless per event
    pub turn_index: u32,
}

impl ConversationTurn {
    pub fn new(
        event_id: Uuid,
        turn_index: u32,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            event_id,
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
            turn_index,
        }
    }
}
