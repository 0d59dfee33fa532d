//! Status snapshots handed to an external reporter.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::{DisplayId, RenderSize, UniformValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayPerformance {
    pub resolution: RenderSize,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStatus {
    pub fps: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub displays: BTreeMap<DisplayId, DisplayPerformance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransitionStatus {
    pub active: bool,
    pub target: Option<String>,
    pub queued: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShaderStatus {
    /// Animations the reporter knows about; the engine leaves this empty.
    pub available: Vec<String>,
    pub current: BTreeMap<DisplayId, Option<String>>,
    pub transition: BTreeMap<DisplayId, TransitionStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayUniforms {
    pub shader: Option<String>,
    pub values: BTreeMap<String, UniformValue>,
}

/// Uniform values per display, limited to what the active shader declares.
pub type UniformStatus = BTreeMap<DisplayId, DisplayUniforms>;

/// Receives engine status. Every hook defaults to doing nothing.
pub trait StatusSink: Send {
    fn performance(&mut self, _status: &PerformanceStatus) {}

    fn shader(&mut self, _status: &ShaderStatus) {}

    fn uniforms(&mut self, _status: &UniformStatus) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {}

/// Counts frames and reports a smoothed rate once per interval.
#[derive(Debug)]
pub struct FpsMeter {
    interval: Duration,
    window_start: Option<Instant>,
    frames: u32,
    history: VecDeque<f32>,
    smoothing: usize,
}

impl FpsMeter {
    pub fn new(interval: Duration, smoothing: usize) -> Self {
        Self {
            interval,
            window_start: None,
            frames: 0,
            history: VecDeque::with_capacity(smoothing.max(1)),
            smoothing: smoothing.max(1),
        }
    }

    /// Records a presented frame; returns the smoothed FPS when an interval closes.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.window_start = Some(now);
        self.frames = 0;
        if self.history.len() == self.smoothing {
            self.history.pop_front();
        }
        self.history.push_back(fps);
        Some(self.history.iter().sum::<f32>() / self.history.len() as f32)
    }
}

pub(crate) fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
