use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub mod conversations;
pub mod events;

use super::models::{ConversationTurn, Event};
use super::EventStore;
use crate::error::Error;
use conversations::ConversationsRepository;
use events::EventsRepository;

/// Postgres-backed event store
#[derive(Clone)]
pub struct PgEventStore {
    events: EventsRepository,
    conversations: ConversationsRepository,
}

impl PgEventStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            events: EventsRepository::new(pool.clone()),
            conversations: ConversationsRepository::new(pool),
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, event: &Event) -> Result<Uuid, Error> {
        self.events.create(event).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>, Error> {
        self.events.get_by_id(&id).await
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), Error> {
        self.conversations.append(turn).await
    }

    async fn turns(&self, event_id: Uuid) -> Result<Vec<ConversationTurn>, Error> {
        self.conversations.get_by_event(&event_id).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>, Error> {
        self.events.get_recent(limit as i64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use crate::db::models::{DetectionResult, ThreatAssessment, ThreatLevel};
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;

    async fn connect() -> Option<PgEventStore> {
        let url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                println!("Skipping Postgres test. Set TEST_DATABASE_URL to run.");
                return None;
            }
        };
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        Some(PgEventStore::new(Arc::new(pool)))
    }

    #[tokio::test]
    async fn round_trips_event_and_turns() {
        let Some(store) = connect().await else {
            return;
        };

        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            frame_ref: None,
            motion_level: 0.3,
            detections: vec![DetectionResult::degraded_vision()],
            summary: "A person walked past the gate.".into(),
            summary_degraded: true,
            threat: ThreatAssessment {
                level: ThreatLevel::Low,
                suspicious: false,
                reason: "No faces".into(),
            },
        };

        store.save(&event).await.unwrap();
        let loaded = store.get(event.id).await.unwrap().unwrap();
        assert_eq!(loaded.summary, event.summary);
        assert_eq!(loaded.detections, event.detections);

        store
            .append_turn(&ConversationTurn::new(event.id, 0, "who?", "nobody known"))
            .await
            .unwrap();
        assert!(store
            .append_turn(&ConversationTurn::new(event.id, 5, "gap", "gap"))
            .await
            .is_err());

        let turns = store.turns(event.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn_index, 0);
    }
}
