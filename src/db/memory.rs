use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{ConversationTurn, Event};
use super::EventStore;
use crate::error::Error;

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    order: Vec<Uuid>,
    turns: HashMap<Uuid, Vec<ConversationTurn>>,
}

/// Process-local event store
#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn save(&self, event: &Event) -> Result<Uuid, Error> {
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.id) {
            return Err(Error::Persistence(format!(
                "Event {} already exists",
                event.id
            )));
        }
        inner.events.insert(event.id, event.clone());
        inner.order.push(event.id);
        debug!("Stored event {}", event.id);
        Ok(event.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>, Error> {
        Ok(self.inner.read().await.events.get(&id).cloned())
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), Error> {
        let mut inner = self.inner.write().await;
        if !inner.events.contains_key(&turn.event_id) {
            return Err(Error::NotFound(format!("Event {}", turn.event_id)));
        }

        let turns = inner.turns.entry(turn.event_id).or_default();
        let expected = turns.len() as u32;
        if turn.turn_index != expected {
            return Err(Error::Persistence(format!(
                "Turn index {} for event {} is out of order, expected {}",
                turn.turn_index, turn.event_id, expected
            )));
        }
        turns.push(turn.clone());
        Ok(())
    }

    async fn turns(&self, event_id: Uuid) -> Result<Vec<ConversationTurn>, Error> {
        Ok(self
            .inner
            .read()
            .await
            .turns
            .get(&event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Event>, Error> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.events.get(id).cloned())
            .collect())
    }
}
