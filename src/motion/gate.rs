use log::debug;
use std::time::{Duration, Instant};

use super::ChangeScorer;
use crate::capture::Frame;
use crate::config::{MotionConfig, TriggerEdge};

/// Outcome of one gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Trigger,
    Suppressed,
}

impl GateDecision {
    pub fn is_trigger(self) -> bool {
        matches!(self, GateDecision::Trigger)
    }
}

/// Cooldown bookkeeping for one running monitor.
///
/// Only [`MotionGate`] mutates it; the timestamps come from a monotonic
/// clock supplied by the caller.
#[derive(Debug, Clone)]
pub struct CooldownState {
    pub last_trigger_time: Option<Instant>,
    pub cooldown_duration: Duration,
    pub sensitivity_threshold: f64,
}

impl CooldownState {
    pub fn new(cooldown_duration: Duration, sensitivity_threshold: f64) -> Self {
        Self {
            last_trigger_time: None,
            cooldown_duration,
            sensitivity_threshold,
        }
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        match self.last_trigger_time {
            Some(last) => now.saturating_duration_since(last) < self.cooldown_duration,
            None => false,
        }
    }

    /// Time left before the next trigger can be accepted
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_trigger_time {
            Some(last) => self
                .cooldown_duration
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Decides whether a change metric should start an event pipeline run.
pub struct MotionGate {
    state: CooldownState,
    edge: TriggerEdge,
    min_motion_frames: u32,
    streak: u32,
    armed: bool,
}

impl MotionGate {
    pub fn new(state: CooldownState, edge: TriggerEdge, min_motion_frames: u32) -> Self {
        Self {
            state,
            edge,
            min_motion_frames: min_motion_frames.max(1),
            streak: 0,
            armed: false,
        }
    }

    pub fn from_config(config: &MotionConfig) -> Self {
        Self::new(
            CooldownState::new(config.cooldown(), config.sensitivity_threshold),
            config.trigger_edge,
            config.min_motion_frames,
        )
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }

    /// Evaluate one change metric observed at `now`.
    pub fn evaluate(&mut self, change_metric: f64, now: Instant) -> GateDecision {
        if self.state.in_cooldown(now) {
            self.streak = 0;
            self.armed = false;
            return GateDecision::Suppressed;
        }

        let moving = change_metric >= self.state.sensitivity_threshold;
        match self.edge {
            TriggerEdge::Leading => self.leading(moving, now),
            TriggerEdge::Trailing => self.trailing(moving, now),
        }
    }

    /// Score `frame` against the previous one and evaluate it at the
    /// frame's monotonic capture time.
    pub fn observe(&mut self, scorer: &mut ChangeScorer, frame: &Frame) -> (f64, GateDecision) {
        let metric = scorer.score(frame);
        (metric, self.evaluate(metric, frame.monotonic))
    }

    fn leading(&mut self, moving: bool, now: Instant) -> GateDecision {
        if !moving {
            self.streak = 0;
            return GateDecision::Suppressed;
        }

        self.streak += 1;
        if self.streak >= self.min_motion_frames {
            self.fire(now)
        } else {
            GateDecision::Suppressed
        }
    }

    fn trailing(&mut self, moving: bool, now: Instant) -> GateDecision {
        if moving {
            self.streak += 1;
            if self.streak >= self.min_motion_frames {
                self.armed = true;
            }
            return GateDecision::Suppressed;
        }

        self.streak = 0;
        if self.armed {
            self.fire(now)
        } else {
            GateDecision::Suppressed
        }
    }

    fn fire(&mut self, now: Instant) -> GateDecision {
        self.state.last_trigger_time = Some(now);
        self.streak = 0;
        self.armed = false;
        debug!(
            "Motion gate triggered, cooldown {:?} starts",
            self.state.cooldown_duration
        );
        GateDecision::Trigger
    }
}
