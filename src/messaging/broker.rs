use crate::error::Error;
use crate::messaging::event::{topic_matches, EventMessage, EventType};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Callback function type for event handling
pub type EventCallback = Arc<dyn Fn(EventMessage) -> Result<()> + Send + Sync>;

const DEFAULT_CAPACITY: usize = 256;

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish an event
    async fn publish<T: Serialize + Send>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<()>;

    /// Subscribe to an event type
    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String>;

    /// Subscribe to a specific routing pattern
    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String>;

    /// Unsubscribe from a subscription
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// In-process message broker on a broadcast channel
pub struct MessageBroker {
    sender: broadcast::Sender<EventMessage>,
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl MessageBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[cfg(test)]
    pub(crate) fn receiver(&self) -> broadcast::Receiver<EventMessage> {
        self.sender.subscribe()
    }

    /// Start a consumer task for the given routing pattern and callback
    async fn start_consumer(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        let mut receiver = self.sender.subscribe();
        let subscription_id = Uuid::new_v4().to_string();

        let subscription_id_clone = subscription_id.clone();
        let pattern_owned = pattern.to_string();

        let handle = tokio::spawn(async move {
            debug!(
                "Started consumer for pattern: {} (subscription: {})",
                pattern_owned, subscription_id_clone
            );

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if !topic_matches(&pattern_owned, &event.routing_key()) {
                            continue;
                        }
                        if let Err(e) = callback(event) {
                            error!("Error processing event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Subscription {} lagged, {} events skipped",
                            subscription_id_clone, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            debug!(
                "Consumer stopped for pattern: {} (subscription: {})",
                pattern_owned, subscription_id_clone
            );
        });

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), handle);

        Ok(subscription_id)
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBrokerTrait for MessageBroker {
    async fn publish<T: Serialize + Send>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<()> {
        let event = EventMessage::new(event_type, source_id, payload)?;
        let routing_key = event.routing_key();

        // Nobody listening is not an error
        match self.sender.send(event) {
            Ok(receivers) => debug!("Published {} to {} receivers", routing_key, receivers),
            Err(_) => debug!("Published {} with no receivers", routing_key),
        }

        Ok(())
    }

    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String> {
        let pattern = format!("{}.#", event_type);
        self.start_consumer(&pattern, callback).await
    }

    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        self.start_consumer(pattern, callback).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(handle) = subscriptions.remove(subscription_id) {
            handle.abort();
            info!("Unsubscribed: {}", subscription_id);
            Ok(())
        } else {
            Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into())
        }
    }
}

/// Create a message broker service
pub fn create_message_broker() -> Arc<MessageBroker> {
    Arc::new(MessageBroker::default())
}
