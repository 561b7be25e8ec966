//! Capture loop: frame source -> change scoring -> motion gate -> pipeline.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::capture::FrameSource;
use crate::config::MotionConfig;
use crate::error::Error;
use crate::messaging::{EventType, MessageBroker, MessageBrokerTrait};
use crate::motion::{ChangeScorer, MotionGate};
use crate::pipeline::EventPipeline;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStats {
    pub frames: u64,
    pub triggers: u64,
    /// Triggers that arrived while a run was in flight
    pub dropped_triggers: u64,
    pub events_created: u64,
    pub runs_failed: u64,
    /// Set when the source stopped producing frames
    pub capture_error: Option<String>,
}

#[derive(Serialize)]
struct TriggerPayload {
    motion_level: f64,
}

pub struct Monitor {
    source: Box<dyn FrameSource>,
    scorer: ChangeScorer,
    gate: MotionGate,
    pipeline: Arc<EventPipeline>,
    broker: Option<Arc<MessageBroker>>,
}

impl Monitor {
    pub fn new(source: Box<dyn FrameSource>, motion: &MotionConfig, pipeline: Arc<EventPipeline>) -> Self {
        Self {
            source,
            scorer: ChangeScorer::new(motion.pixel_delta),
            gate: MotionGate::from_config(motion),
            pipeline,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Read frames until `cancel` fires or the source fails, then wait for
    /// the in-flight run.
    ///
    /// Frames are read on a blocking thread; pipeline runs are spawned onto
    /// the current runtime so analysis never stalls capture.
    pub async fn run(self, cancel: CancellationToken) -> Result<MonitorStats, Error> {
        let handle = Handle::current();
        let pipeline = self.pipeline.clone();
        let before = pipeline.stats();

        info!("Monitor started");
        let capture = tokio::task::spawn_blocking(move || self.capture_loop(handle, cancel));
        let (mut stats, runs) = capture
            .await
            .map_err(|e| Error::Internal(format!("Capture loop panicked: {}", e)))?;

        for joined in futures::future::join_all(runs).await {
            if let Err(e) = joined {
                error!("Pipeline task panicked: {}", e);
            }
        }

        let after = pipeline.stats();
        stats.events_created = after.events_created - before.events_created;
        stats.runs_failed = after.runs_failed - before.runs_failed;

        info!(
            "Monitor stopped: {} frames, {} triggers ({} dropped), {} events",
            stats.frames, stats.triggers, stats.dropped_triggers, stats.events_created
        );
        Ok(stats)
    }

    fn capture_loop(
        mut self,
        handle: Handle,
        cancel: CancellationToken,
    ) -> (MonitorStats, Vec<tokio::task::JoinHandle<Result<uuid::Uuid, Error>>>) {
        let mut stats = MonitorStats::default();
        let mut runs = Vec::new();

        while !cancel.is_cancelled() {
            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_fatal() => {
                    error!("Capture stopped: {}", e);
                    stats.capture_error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!("Skipping unreadable frame: {}", e);
                    continue;
                }
            };
            stats.frames += 1;

            let (metric, decision) = self.gate.observe(&mut self.scorer, &frame);
            if !decision.is_trigger() {
                continue;
            }

            stats.triggers += 1;
            info!("Motion trigger on frame {} (change {:.3})", frame.id, metric);

            match self.pipeline.spawn(&handle, &frame, metric) {
                Some(run) => {
                    self.notify(&handle, EventType::MotionTriggered, metric);
                    runs.push(run);
                }
                None => {
                    stats.dropped_triggers += 1;
                    warn!(
                        "Trigger dropped, pipeline is {}",
                        self.pipeline.state()
                    );
                    self.notify(&handle, EventType::TriggerDropped, metric);
                }
            }

            runs.retain(|run| !run.is_finished());
        }

        debug!("Capture loop exited after {} frames", stats.frames);
        (stats, runs)
    }

    fn notify(&self, handle: &Handle, event_type: EventType, motion_level: f64) {
        if let Some(broker) = self.broker.clone() {
            handle.spawn(async move {
                if let Err(e) = broker
                    .publish(event_type, None, TriggerPayload { motion_level })
                    .await
                {
                    warn!("Failed to publish trigger: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FaceAnalysis, FaceAnalyzer, VisionAnalysis, VisionAnalyzer};
    use crate::capture::{Frame, TestPatternSource};
    use crate::config::{CameraConfig, Config};
    use crate::db::{EventStore, MemoryEventStore};
    use crate::llm::LlmClient;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    /// Analyzers that hold every run until `release` is notified
    struct HeldAnalyzer {
        release: Option<Arc<Notify>>,
    }

    impl HeldAnalyzer {
        async fn hold(&self) {
            if let Some(release) = &self.release {
                release.notified().await;
                // let the next waiter through as well
                release.notify_one();
            }
        }
    }

    #[async_trait]
    impl VisionAnalyzer for HeldAnalyzer {
        async fn analyze(&self, _frame: &Frame) -> Result<VisionAnalysis, Error> {
            self.hold().await;
            Ok(VisionAnalysis {
                objects: vec![],
                scene_description: "movement near the gate".into(),
            })
        }
    }

    #[async_trait]
    impl FaceAnalyzer for HeldAnalyzer {
        async fn analyze(&self, _frame: &Frame) -> Result<FaceAnalysis, Error> {
            self.hold().await;
            Ok(FaceAnalysis::default())
        }
    }

    struct DownAnalyzer;

    #[async_trait]
    impl VisionAnalyzer for DownAnalyzer {
        async fn analyze(&self, _frame: &Frame) -> Result<VisionAnalysis, Error> {
            Err(Error::AnalysisFailure("vision service down".into()))
        }
    }

    #[async_trait]
    impl FaceAnalyzer for DownAnalyzer {
        async fn analyze(&self, _frame: &Frame) -> Result<FaceAnalysis, Error> {
            Err(Error::AnalysisFailure("face service down".into()))
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn complete(&self, _prompt: &str, _context: Option<&str>) -> Result<String, Error> {
            Ok("Movement near the gate.".into())
        }
    }

    /// Replays frames, then fails like a disconnected camera
    struct ScriptedSource {
        frames: VecDeque<Frame>,
        on_end: Option<Arc<Notify>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, Error> {
            match self.frames.pop_front() {
                Some(frame) => Ok(frame),
                None => {
                    if let Some(on_end) = &self.on_end {
                        on_end.notify_one();
                    }
                    Err(Error::Capture("camera disconnected".into()))
                }
            }
        }
    }

    /// Hands out the next frame only once the pipeline is idle again
    struct SettledSource {
        inner: Box<ScriptedSource>,
        pipeline: Arc<EventPipeline>,
    }

    impl FrameSource for SettledSource {
        fn next_frame(&mut self) -> Result<Frame, Error> {
            for _ in 0..1000 {
                if self.pipeline.state() == crate::pipeline::PipelineState::Idle {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            self.inner.next_frame()
        }
    }

    fn scripted(values: &[(u8, u64)], on_end: Option<Arc<Notify>>) -> Box<ScriptedSource> {
        let t0 = Instant::now();
        let frames = values
            .iter()
            .map(|&(value, at)| {
                Frame::with_times(
                    8,
                    8,
                    vec![value; 64],
                    chrono::Utc::now(),
                    t0 + Duration::from_secs(at),
                )
                .unwrap()
            })
            .collect();
        Box::new(ScriptedSource { frames, on_end })
    }

    fn pipeline(config: &Config, release: Option<Arc<Notify>>, store: Arc<MemoryEventStore>) -> Arc<EventPipeline> {
        Arc::new(EventPipeline::new(
            config,
            Arc::new(HeldAnalyzer {
                release: release.clone(),
            }),
            Arc::new(HeldAnalyzer { release }),
            Arc::new(EchoLlm),
            store,
        ))
    }

    fn motion_config() -> MotionConfig {
        MotionConfig {
            sensitivity_threshold: 0.5,
            cooldown_secs: 10.0,
            ..MotionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_trigger_while_busy_is_dropped() {
        let release = Arc::new(Notify::new());
        let store = Arc::new(MemoryEventStore::new());
        let config = Config::default();

        // trigger at 1s, suppressed at 3s by cooldown, trigger at 12s while
        // the first run is still held
        let source = scripted(&[(0, 0), (200, 1), (0, 3), (200, 12)], Some(release.clone()));
        let monitor = Monitor::new(source, &motion_config(), pipeline(&config, Some(release), store.clone()));

        let stats = monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.triggers, 2);
        assert_eq!(stats.dropped_triggers, 1);
        assert_eq!(stats.events_created, 1);
        assert_eq!(stats.capture_error.as_deref(), Some("Capture error: camera disconnected"));
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_runs_still_start_cooldown() {
        let store = Arc::new(MemoryEventStore::new());
        let pipeline = Arc::new(EventPipeline::new(
            &Config::default(),
            Arc::new(DownAnalyzer),
            Arc::new(DownAnalyzer),
            Arc::new(EchoLlm),
            store.clone(),
        ));

        // trigger at 1s fails, 3s is inside the cooldown, 12s triggers again
        let source = Box::new(SettledSource {
            inner: scripted(&[(0, 0), (200, 1), (0, 3), (200, 12)], None),
            pipeline: pipeline.clone(),
        });
        let monitor = Monitor::new(source, &motion_config(), pipeline);

        let stats = monitor.run(CancellationToken::new()).await.unwrap();

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.triggers, 2);
        assert_eq!(stats.dropped_triggers, 0);
        assert_eq!(stats.events_created, 0);
        assert_eq!(stats.runs_failed, 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_quiet_scene_never_triggers() {
        let store = Arc::new(MemoryEventStore::new());
        let source = scripted(&[(10, 0), (12, 1), (11, 2), (13, 3)], None);
        let monitor = Monitor::new(
            source,
            &motion_config(),
            pipeline(&Config::default(), None, store.clone()),
        );

        let stats = monitor.run(CancellationToken::new()).await.unwrap();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.triggers, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancellation_stops_capture() {
        let store = Arc::new(MemoryEventStore::new());
        let camera = CameraConfig {
            width: 32,
            height: 24,
            ..CameraConfig::default()
        };
        let source = Box::new(TestPatternSource::new(&camera).unpaced());
        let monitor = Monitor::new(
            source,
            &MotionConfig::default(),
            pipeline(&Config::default(), None, store),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert!(stats.frames > 0);
        assert!(stats.capture_error.is_none());
    }
}
