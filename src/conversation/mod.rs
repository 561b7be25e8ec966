//! Follow-up questions about persisted events.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ConversationConfig;
use crate::db::models::{ConversationTurn, DetectionResult, Event};
use crate::db::EventStore;
use crate::error::Error;
use crate::llm::LlmClient;
use crate::messaging::{EventType, MessageBroker, MessageBrokerTrait};

/// Reply to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// The question could not be answered; nothing was recorded
    pub degraded: bool,
    /// Index of the recorded turn
    pub turn_index: Option<u32>,
}

pub struct ConversationManager {
    store: Arc<dyn EventStore>,
    llm: Arc<dyn LlmClient>,
    context_window: usize,
    answer_timeout: Duration,
    /// Serializes asks per event so turn indexes stay gapless
    event_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    broker: Option<Arc<MessageBroker>>,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn EventStore>,
        llm: Arc<dyn LlmClient>,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            store,
            llm,
            context_window: config.context_window,
            answer_timeout: Duration::from_millis(config.answer_timeout_ms),
            event_locks: Mutex::new(HashMap::new()),
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Answer `question` from the stored context of `event_id` and record
    /// the exchange as the event's next turn.
    pub async fn ask(&self, event_id: Uuid, question: &str) -> Result<Answer, Error> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidRequest("question must not be empty".into()));
        }

        let lock = self.event_lock(event_id).await;
        let result = {
            let _serial = lock.lock().await;
            self.ask_serialized(event_id, question).await
        };
        self.release_lock(event_id, lock).await;

        result
    }

    async fn ask_serialized(&self, event_id: Uuid, question: &str) -> Result<Answer, Error> {
        let event = self.load_event(event_id).await?;
        let turns = self.store.turns(event_id).await?;
        let window = &turns[turns.len().saturating_sub(self.context_window)..];
        let context = Self::build_context(&event, window);

        debug!(
            "Asking about event {} with {} of {} prior turns",
            event_id,
            window.len(),
            turns.len()
        );

        let reply = tokio::time::timeout(self.answer_timeout, self.llm.complete(question, Some(&context)))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Llm(format!(
                    "no answer within {:?}",
                    self.answer_timeout
                )))
            })
            .and_then(|text| {
                let text = text.trim().to_string();
                if text.is_empty() {
                    Err(Error::Llm("empty answer".into()))
                } else {
                    Ok(text)
                }
            });

        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                let failure = Error::ConversationAnswerFailure(format!("event {}: {}", event_id, e));
                warn!("{}", failure);
                return Ok(Self::degraded_answer(event_id));
            }
        };

        let turn_index = u32::try_from(turns.len())
            .map_err(|_| Error::Internal(format!("event {} has too many turns", event_id)))?;
        let turn = ConversationTurn::new(event_id, turn_index, question, text.clone());
        self.store.append_turn(&turn).await?;
        info!("Recorded turn {} for event {}", turn_index, event_id);

        if let Some(broker) = &self.broker {
            if let Err(e) = broker
                .publish(EventType::ConversationTurnAdded, Some(event_id), &turn)
                .await
            {
                warn!("Failed to publish turn for event {}: {}", event_id, e);
            }
        }

        Ok(Answer {
            text,
            degraded: false,
            turn_index: Some(turn_index),
        })
    }

    /// All recorded turns of an event, oldest first
    pub async fn history(&self, event_id: Uuid) -> Result<Vec<ConversationTurn>, Error> {
        self.load_event(event_id).await?;
        self.store.turns(event_id).await
    }

    /// System context handed to the LLM: event facts, detections and the
    /// selected prior turns.
    pub fn build_context(event: &Event, turns: &[ConversationTurn]) -> String {
        let mut context = String::from(
            "You are a security camera AI assistant. Answer the user's question based on this security event information.\n\nEvent Information:\n",
        );
        let _ = writeln!(context, "- Event ID: {}", event.id);
        let _ = writeln!(context, "- Timestamp: {}", event.timestamp.to_rfc3339());
        let _ = writeln!(context, "- Summary: {}", event.summary);
        let _ = writeln!(context, "- Motion level: {:.3}", event.motion_level);
        let _ = writeln!(
            context,
            "- Alert Level: {} (suspicious: {})",
            event.threat.level, event.threat.suspicious
        );
        let _ = writeln!(context, "- Reason: {}", event.threat.reason);

        for detection in &event.detections {
            match detection {
                DetectionResult::Vision(v) if v.degraded => {
                    context.push_str("- Scene analysis: unavailable\n");
                }
                DetectionResult::Vision(v) => {
                    let _ = writeln!(context, "- Scene Description: {}", v.scene_description);
                    let labels: Vec<&str> = v.objects.iter().map(|o| o.label.as_str()).collect();
                    let _ = writeln!(context, "- Detected Objects: {}", labels.join(", "));
                }
                DetectionResult::Face(f) if f.degraded => {
                    context.push_str("- Face analysis: unavailable\n");
                }
                DetectionResult::Face(f) => {
                    let _ = writeln!(context, "- Faces Detected: {}", f.faces.len());
                    for face in &f.faces {
                        let who = face.identity.as_deref().unwrap_or("unknown person");
                        let _ = write!(context, "  - {} ({:.2})", who, face.confidence);
                        if let Some(emotion) = &face.emotion {
                            let _ = write!(context, ", {}", emotion);
                        }
                        if let Some(age) = face.estimated_age {
                            let _ = write!(context, ", about {} years old", age);
                        }
                        context.push('\n');
                    }
                }
            }
        }

        if !turns.is_empty() {
            context.push_str("\nPrevious questions:\n");
            for turn in turns {
                let _ = writeln!(context, "Q: {}\nA: {}", turn.question, turn.answer);
            }
        }

        context.push_str(
            "\nProvide clear, specific answers based on the information above. If you don't have enough information to answer, say so.",
        );
        context
    }

    fn degraded_answer(event_id: Uuid) -> Answer {
        Answer {
            text: format!(
                "Sorry, your question about event {} could not be processed right now. Please try again later.",
                event_id
            ),
            degraded: true,
            turn_index: None,
        }
    }

    async fn load_event(&self, event_id: Uuid) -> Result<Event, Error> {
        self.store
            .get(event_id)
            .await?
            .ok_or_else(|| Error::ContextExpired(format!("event {} is not available", event_id)))
    }

    async fn event_lock(&self, event_id: Uuid) -> Arc<Mutex<()>> {
        self.event_locks
            .lock()
            .await
            .entry(event_id)
            .or_default()
            .clone()
    }

    async fn release_lock(&self, event_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.event_locks.lock().await;
        // map entry plus ours: nobody else is waiting
        let idle = Arc::strong_count(&lock) == 2;
        drop(lock);
        if idle {
            locks.remove(&event_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FaceObservation, FaceResult, ThreatAssessment, ThreatLevel, VisionResult};
    use crate::db::MemoryEventStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingLlm {
        reply: Result<String, Error>,
        delay: Duration,
        contexts: StdMutex<Vec<String>>,
    }

    impl RecordingLlm {
        fn new(reply: Result<String, Error>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                contexts: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, prompt: &str, context: Option<&str>) -> Result<String, Error> {
            self.contexts
                .lock()
                .unwrap()
                .push(context.unwrap_or_default().to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map(|answer| format!("{} [{}]", answer, prompt))
        }
    }

    fn event() -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            frame_ref: None,
            motion_level: 0.25,
            detections: vec![
                DetectionResult::Vision(VisionResult {
                    objects: vec![],
                    scene_description: "a courier holding a parcel".into(),
                    degraded: false,
                }),
                DetectionResult::Face(FaceResult {
                    faces: vec![FaceObservation {
                        identity: Some("sam".into()),
                        confidence: 0.88,
                        emotion: Some("happy".into()),
                        estimated_age: None,
                        estimated_gender: None,
                    }],
                    degraded: false,
                }),
            ],
            summary: "Sam delivered a parcel.".into(),
            summary_degraded: false,
            threat: ThreatAssessment {
                level: ThreatLevel::Low,
                suspicious: false,
                reason: "Authorized person(s): sam".into(),
            },
        }
    }

    async fn setup(llm: Arc<RecordingLlm>, window: usize) -> (ConversationManager, Arc<MemoryEventStore>, Uuid) {
        let store = Arc::new(MemoryEventStore::new());
        let event = event();
        store.save(&event).await.unwrap();
        let config = ConversationConfig {
            context_window: window,
            ..ConversationConfig::default()
        };
        (ConversationManager::new(store.clone(), llm, &config), store, event.id)
    }

    #[tokio::test]
    async fn ask_records_sequential_turns() {
        let (manager, _store, id) = setup(RecordingLlm::new(Ok("It was Sam".into())), 6).await;

        let first = manager.ask(id, "Who was at the door?").await.unwrap();
        let second = manager.ask(id, "What did they carry?").await.unwrap();

        assert_eq!(first.turn_index, Some(0));
        assert_eq!(second.turn_index, Some(1));
        assert!(!first.degraded);
        assert_eq!(first.text, "It was Sam [Who was at the door?]");

        let history = manager.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].question, "What did they carry?");
    }

    #[tokio::test]
    async fn repeated_question_appends_independent_turns() {
        let llm = RecordingLlm::new(Ok("Sam".into()));
        let (manager, _store, id) = setup(llm.clone(), 6).await;

        manager.ask(id, "Who?").await.unwrap();
        manager.ask(id, "Who?").await.unwrap();

        assert_eq!(manager.history(id).await.unwrap().len(), 2);
        assert_eq!(llm.contexts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_event_is_context_expired() {
        let (manager, _store, _id) = setup(RecordingLlm::new(Ok("x".into())), 6).await;
        let err = manager.ask(Uuid::new_v4(), "Anyone there?").await.unwrap_err();
        assert!(matches!(err, Error::ContextExpired(_)));
        assert!(matches!(
            manager.history(Uuid::new_v4()).await,
            Err(Error::ContextExpired(_))
        ));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let (manager, _store, id) = setup(RecordingLlm::new(Ok("x".into())), 6).await;
        assert!(matches!(
            manager.ask(id, "   ").await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn llm_failure_returns_degraded_answer_without_turn() {
        let (manager, _store, id) =
            setup(RecordingLlm::new(Err(Error::Llm("down".into()))), 6).await;

        let answer = manager.ask(id, "Who was it?").await.unwrap();
        assert!(answer.degraded);
        assert_eq!(answer.turn_index, None);
        assert!(answer.text.contains(&id.to_string()));
        assert!(manager.history(id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_llm_times_out_to_degraded_answer() {
        let llm = Arc::new(RecordingLlm {
            reply: Ok("late".into()),
            delay: Duration::from_secs(120),
            contexts: StdMutex::new(Vec::new()),
        });
        let (manager, _store, id) = setup(llm, 6).await;

        let answer = manager.ask(id, "Who was it?").await.unwrap();
        assert!(answer.degraded);
        assert!(manager.history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_holds_only_recent_turns() {
        let llm = RecordingLlm::new(Ok("ok".into()));
        let (manager, _store, id) = setup(llm.clone(), 2).await;

        for question in ["first?", "second?", "third?", "fourth?"] {
            manager.ask(id, question).await.unwrap();
        }

        let contexts = llm.contexts.lock().unwrap();
        let last = contexts.last().unwrap();
        assert!(!last.contains("Q: first?"));
        assert!(last.contains("Q: second?"));
        assert!(last.contains("Q: third?"));
        assert!(!last.contains("Q: fourth?"));
        assert!(last.contains("Sam delivered a parcel."));
        assert!(last.contains("a courier holding a parcel"));
        assert!(last.contains("sam (0.88), happy"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_asks_keep_turns_gapless() {
        let (manager, _store, id) = setup(RecordingLlm::new(Ok("ok".into())), 6).await;
        let manager = Arc::new(manager);

        let asks = (0..16).map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ask(id, &format!("question {}", i)).await })
        });
        for result in futures::future::join_all(asks).await {
            assert!(!result.unwrap().unwrap().degraded);
        }

        let indexes: Vec<u32> = manager
            .history(id)
            .await
            .unwrap()
            .iter()
            .map(|turn| turn.turn_index)
            .collect();
        assert_eq!(indexes, (0..16).collect::<Vec<u32>>());
        assert!(manager.event_locks.lock().await.is_empty());
    }

    #[test]
    fn context_marks_degraded_modalities() {
        let mut event = event();
        event.detections = vec![
            DetectionResult::degraded_vision(),
            DetectionResult::degraded_face(),
        ];
        let context = ConversationManager::build_context(&event, &[]);
        assert!(context.contains("Scene analysis: unavailable"));
        assert!(context.contains("Face analysis: unavailable"));
        assert!(!context.contains("Previous questions"));
    }
}
