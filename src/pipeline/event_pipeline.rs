use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{error::Elapsed, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::summary::SummaryComposer;
use super::threat::assess_threat;
use crate::analysis::{FaceAnalyzer, VisionAnalyzer};
use crate::capture::Frame;
use crate::config::Config;
use crate::db::models::{DetectionResult, Event, Modality};
use crate::db::{EventStore, FrameWriter};
use crate::error::Error;
use crate::llm::LlmClient;
use crate::messaging::{
    EventCreatedPayload, EventType, MessageBroker, MessageBrokerTrait, PipelineFailedPayload,
};

/// Stage of the single in-flight pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Capturing = 1,
    Analyzing = 2,
    Composing = 3,
    Persisting = 4,
    Failed = 5,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Capturing,
            2 => PipelineState::Analyzing,
            3 => PipelineState::Composing,
            4 => PipelineState::Persisting,
            5 => PipelineState::Failed,
            _ => PipelineState::Idle,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Composing => "composing",
            PipelineState::Persisting => "persisting",
            PipelineState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Exclusive claim on the pipeline. Returns the state to `Idle` on drop,
/// whichever way the run ended.
pub struct RunGuard {
    state: Arc<AtomicU8>,
}

impl RunGuard {
    fn set(&self, next: PipelineState) {
        let previous = PipelineState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        debug!("Pipeline {} -> {}", previous, next);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let previous = PipelineState::from_u8(self.state.swap(PipelineState::Idle as u8, Ordering::SeqCst));
        debug!("Pipeline {} -> idle", previous);
    }
}

/// Run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PipelineStats {
    pub events_created: u64,
    pub runs_failed: u64,
}

/// Turns one triggered frame into a persisted, summarized event.
pub struct EventPipeline {
    vision: Arc<dyn VisionAnalyzer>,
    face: Arc<dyn FaceAnalyzer>,
    composer: SummaryComposer,
    store: Arc<dyn EventStore>,
    frames: Option<FrameWriter>,
    broker: Option<Arc<MessageBroker>>,
    vision_timeout: Duration,
    face_timeout: Duration,
    max_run: Duration,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    events_created: AtomicU64,
    runs_failed: AtomicU64,
}

impl EventPipeline {
    pub fn new(
        config: &Config,
        vision: Arc<dyn VisionAnalyzer>,
        face: Arc<dyn FaceAnalyzer>,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let frames = config
            .storage
            .store_images
            .then(|| FrameWriter::new(config.storage.image_directory.clone()));

        Self {
            vision,
            face,
            composer: SummaryComposer::from_config(llm, &config.summary),
            store,
            frames,
            broker: None,
            vision_timeout: config.analysis.vision_timeout(),
            face_timeout: config.analysis.face_timeout(),
            max_run: config.analysis.max_run(),
            state: Arc::new(AtomicU8::new(PipelineState::Idle as u8)),
            cancel: CancellationToken::new(),
            events_created: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
        }
    }

    pub fn with_broker(mut self, broker: Arc<MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Abort in-flight runs when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            events_created: self.events_created.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
        }
    }

    /// Claim the pipeline (`Idle -> Capturing`). `None` while another run
    /// is in flight.
    pub fn try_start(&self) -> Option<RunGuard> {
        self.state
            .compare_exchange(
                PipelineState::Idle as u8,
                PipelineState::Capturing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| {
                debug!("Pipeline idle -> capturing");
                RunGuard {
                    state: self.state.clone(),
                }
            })
    }

    /// Run the pipeline for `frame` on the current task.
    pub async fn run(&self, frame: &Frame, motion_level: f64) -> Result<Uuid, Error> {
        let guard = self.try_start().ok_or_else(|| {
            Error::PipelineBusy(format!("pipeline is {}", self.state()))
        })?;
        self.run_claimed(guard, frame, motion_level).await
    }

    /// Claim the pipeline and run it as a task on `handle`. Returns `None`
    /// without spawning when a run is already in flight.
    pub fn spawn(
        self: &Arc<Self>,
        handle: &Handle,
        frame: &Frame,
        motion_level: f64,
    ) -> Option<JoinHandle<Result<Uuid, Error>>> {
        let guard = self.try_start()?;
        let pipeline = Arc::clone(self);
        let snapshot = frame.snapshot();
        Some(handle.spawn(async move {
            pipeline.run_claimed(guard, &snapshot, motion_level).await
        }))
    }

    async fn run_claimed(&self, guard: RunGuard, frame: &Frame, motion_level: f64) -> Result<Uuid, Error> {
        let snapshot = frame.snapshot();
        let event_id = Uuid::new_v4();
        debug!("Captured frame {} for analysis", snapshot.id);

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::RunAborted("pipeline cancelled".into())),
            result = timeout(self.max_run, self.execute(&guard, event_id, &snapshot, motion_level)) => {
                result.unwrap_or_else(|_| {
                    Err(Error::RunAborted(format!("run exceeded {:?}", self.max_run)))
                })
            }
        };

        match outcome {
            Ok(event) => {
                self.events_created.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Event {} persisted (threat {}, summary degraded: {})",
                    event.id, event.threat.level, event.summary_degraded
                );
                self.publish(
                    EventType::EventCreated,
                    Some(event.id),
                    EventCreatedPayload::from_event(&event),
                )
                .await;
                Ok(event.id)
            }
            Err(e) => {
                guard.set(PipelineState::Failed);
                self.runs_failed.fetch_add(1, Ordering::Relaxed);
                error!("Pipeline run failed: {}", e);
                self.discard_frame(event_id).await;
                self.publish(
                    EventType::PipelineFailed,
                    None,
                    PipelineFailedPayload {
                        reason: e.to_string(),
                        motion_level,
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        guard: &RunGuard,
        id: Uuid,
        frame: &Frame,
        motion_level: f64,
    ) -> Result<Event, Error> {
        guard.set(PipelineState::Analyzing);
        let detections = self.analyze(frame).await?;

        guard.set(PipelineState::Composing);
        let (summary, summary_degraded) = self.composer.compose(&detections).await;
        let threat = assess_threat(&detections);

        guard.set(PipelineState::Persisting);
        let frame_ref = self.store_frame(id, frame).await;

        let event = Event {
            id,
            timestamp: frame.captured_at,
            frame_ref,
            motion_level,
            detections,
            summary,
            summary_degraded,
            threat,
        };
        self.persist(&event).await?;

        Ok(event)
    }

    /// Both modalities run concurrently under their own timeouts. A single
    /// failure degrades that modality, losing both fails the run.
    async fn analyze(&self, frame: &Frame) -> Result<Vec<DetectionResult>, Error> {
        let (vision, face) = tokio::join!(
            timeout(self.vision_timeout, self.vision.analyze(frame)),
            timeout(self.face_timeout, self.face.analyze(frame)),
        );

        let vision = settle(Modality::Vision, vision, self.vision_timeout);
        let face = settle(Modality::Face, face, self.face_timeout);

        match (vision, face) {
            (Err(v), Err(f)) => Err(Error::DualAnalysisFailure(format!(
                "vision: {}; face: {}",
                v, f
            ))),
            (vision, face) => {
                let vision = vision
                    .map(|analysis| DetectionResult::Vision(analysis.into()))
                    .unwrap_or_else(|e| {
                        warn!("Vision analysis degraded: {}", e);
                        DetectionResult::degraded_vision()
                    });
                let face = face
                    .map(|analysis| DetectionResult::Face(analysis.into()))
                    .unwrap_or_else(|e| {
                        warn!("Face analysis degraded: {}", e);
                        DetectionResult::degraded_face()
                    });
                Ok(vec![vision, face])
            }
        }
    }

    async fn store_frame(&self, event_id: Uuid, frame: &Frame) -> Option<String> {
        let writer = self.frames.as_ref()?;
        match writer.write(event_id, frame).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Event {} will have no frame reference: {}", event_id, e);
                None
            }
        }
    }

    /// One retry, then the event is discarded with a persistence error.
    /// A first save that committed before failing counts as stored.
    async fn persist(&self, event: &Event) -> Result<Uuid, Error> {
        match self.store.save(event).await {
            Ok(id) => Ok(id),
            Err(first) => {
                warn!("Saving event {} failed, retrying: {}", event.id, first);
                if let Ok(Some(_)) = self.store.get(event.id).await {
                    info!("Event {} was stored by the failed attempt", event.id);
                    return Ok(event.id);
                }
                self.store.save(event).await.map_err(|e| {
                    Error::Persistence(format!(
                        "event {} discarded after retry: {}",
                        event.id, e
                    ))
                })
            }
        }
    }

    /// Drop the snapshot of a run that produced no stored event
    async fn discard_frame(&self, event_id: Uuid) {
        let writer = match &self.frames {
            Some(writer) => writer,
            None => return,
        };
        // an aborted save may still have committed
        if let Ok(Some(_)) = self.store.get(event_id).await {
            return;
        }
        if let Err(e) = writer.remove(event_id).await {
            warn!("Orphaned frame for event {} left behind: {}", event_id, e);
        }
    }

    async fn publish<T: serde::Serialize + Send>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) {
        if let Some(broker) = &self.broker {
            if let Err(e) = broker.publish(event_type.clone(), source_id, payload).await {
                warn!("Failed to publish {}: {}", event_type, e);
            }
        }
    }
}

fn settle<T>(
    modality: Modality,
    outcome: Result<Result<T, Error>, Elapsed>,
    limit: Duration,
) -> Result<T, Error> {
    match outcome {
        Ok(result) => result,
        Err(_) => Err(Error::AnalysisTimeout(format!(
            "{} analysis exceeded {:?}",
            modality, limit
        ))),
    }
}
