use std::time::{Duration, Instant};

/// Slowest cadence the loop accepts; lower rates are clamped to it.
pub const MIN_FPS: f32 = 1.0;

/// Fixed-rate frame limiter for the render loop.
///
/// Deadlines advance by whole intervals so the loop holds its cadence; after
/// a stall longer than one interval the schedule restarts from the current
/// frame instead of bursting to catch up.
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    next: Option<Instant>,
}

impl FrameClock {
    pub fn new(target_fps: f32) -> Self {
        let fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps.max(MIN_FPS)
        } else {
            60.0
        };
        Self {
            interval: Duration::from_secs_f32(1.0 / fps),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.next.map_or(true, |deadline| now >= deadline)
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        let scheduled = self.next.map_or(now, |deadline| deadline) + self.interval;
        self.next = Some(if scheduled <= now { now + self.interval } else { scheduled });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
