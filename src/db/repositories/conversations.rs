use crate::db::models::ConversationTurn;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct TurnRow {
    event_id: Uuid,
    turn_index: i32,
    question: String,
    answer: String,
    timestamp: DateTime<Utc>,
}

impl From<TurnRow> for ConversationTurn {
    fn from(row: TurnRow) -> Self {
        ConversationTurn {
            event_id: row.event_id,
            question: row.question,
            answer: row.answer,
            timestamp: row.timestamp,
            turn_index: row.turn_index.max(0) as u32,
        }
    }
}

/// Conversation turns repository
#[derive(Clone)]
pub struct ConversationsRepository {
    pool: Arc<PgPool>,
}

impl ConversationsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Append a turn.
    ///
    /// The insert only succeeds when `turn_index` equals the current turn
    /// count of the event, so a stale index can never leave a gap.
    pub async fn append(&self, turn: &ConversationTurn) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_turns (event_id, turn_index, question, answer, timestamp)
            SELECT $1, $2, $3, $4, $5
            WHERE EXISTS (SELECT 1 FROM events WHERE id = $1)
              AND (SELECT COUNT(*) FROM conversation_turns WHERE event_id = $1) = $6
            "#,
        )
        .bind(turn.event_id)
        .bind(turn.turn_index as i32)
        .bind(&turn.question)
        .bind(&turn.answer)
        .bind(turn.timestamp)
        .bind(turn.turn_index as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to append conversation turn: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::Persistence(format!(
                "Turn {} rejected for event {}",
                turn.turn_index, turn.event_id
            )));
        }

        Ok(())
    }

    /// Get all turns for an event, oldest first
    pub async fn get_by_event(&self, event_id: &Uuid) -> Result<Vec<ConversationTurn>, Error> {
        let rows = sqlx::query_as::<_, TurnRow>(
            r#"
            SELECT event_id, turn_index, question, answer, timestamp
            FROM conversation_turns
            WHERE event_id = $1
            ORDER BY turn_index ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get conversation turns: {}", e)))?;

        Ok(rows.into_iter().map(ConversationTurn::from).collect())
    }
}
