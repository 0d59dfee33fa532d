use std::time::{Duration, Instant};

use crate::types::{BlurSettings, CrossfadeCurve};

impl CrossfadeCurve {
    pub fn sample(self, t: f32) -> f32 {
        let clamped = t.clamp(0.0, 1.0);
        match self {
            CrossfadeCurve::Linear => clamped,
            CrossfadeCurve::Smoothstep => clamped * clamped * (3.0 - 2.0 * clamped),
            CrossfadeCurve::EaseInOut => {
                if clamped < 0.5 {
                    2.0 * clamped * clamped
                } else {
                    -1.0 + (4.0 - 2.0 * clamped) * clamped
                }
            }
        }
    }
}

/// Wall-clock window of a crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    start: Instant,
    duration: Duration,
}

impl Transition {
    pub fn new(start: Instant, duration: Duration) -> Self {
        Self { start, duration }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Raw progress in `[0, 1]`; a zero-length transition is already complete.
    pub fn alpha(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.alpha(now) >= 1.0
    }
}

/// Per-frame blend parameters handed to the compositor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendFactors {
    pub alpha: f32,
    /// Eased mix between outgoing (0) and incoming (1).
    pub mix: f32,
    /// Blur spread in texels; peaks mid-transition.
    pub blur: f32,
}

impl BlendFactors {
    pub const STEADY: BlendFactors = BlendFactors {
        alpha: 0.0,
        mix: 0.0,
        blur: 0.0,
    };

    pub fn compute(alpha: f32, curve: CrossfadeCurve, blur: BlurSettings) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        let blur = if blur.enabled {
            4.0 * alpha * (1.0 - alpha) * blur.strength
        } else {
            0.0
        };
        Self {
            alpha,
            mix: curve.sample(alpha),
            blur,
        }
    }
}
