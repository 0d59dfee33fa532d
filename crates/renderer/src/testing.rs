//! In-memory backend used by the engine and display tests.

use std::sync::{Arc, Mutex};

use crate::audio::{AudioFrame, AudioSource};
use crate::backend::{Compiled, DisplayPass, FramePlan, RenderBackend};
use crate::compile::wrap_fragment;
use crate::error::{AllocationError, CompileError};
use crate::status::{PerformanceStatus, ShaderStatus, StatusSink, UniformStatus};
use crate::types::{DisplayId, RenderSize};

/// Source that parses but is rejected at "validation".
pub const BROKEN: &str = "void main() { FAIL_COMPILE; }";
const FAIL_MARKER: &str = "FAIL_COMPILE";

/// A fin shader declaring `speed`; `name` keeps sources distinct.
pub fn shader(name: &str) -> String {
    format!(
        "// {name}\nuniform float iTime;\nuniform float speed;\nout vec4 fragColor;\n\
         void main() {{ fragColor = vec4(speed * iTime); }}\n"
    )
}

/// A fin shader sampling the audio texture.
pub fn audio_shader(name: &str) -> String {
    format!(
        "// {name}\nuniform sampler2D iChannel0;\nout vec4 fragColor;\n\
         void main() {{ fragColor = texture(iChannel0, vec2(0.5)); }}\n"
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassRecord {
    Empty,
    Steady(u32),
    Blend { current: u32, target: u32, mix: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub blanked: bool,
    pub sizes: [RenderSize; 2],
    pub passes: [PassRecord; 2],
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    next_program: u32,
    pub compiled: Vec<(DisplayId, u32, RenderSize)>,
    pub released: Vec<u32>,
    pub resizes: Vec<(DisplayId, RenderSize)>,
    pub audio_uploads: Vec<AudioFrame>,
    pub frames: Vec<FrameRecord>,
    /// Largest target side accepted; zero means unlimited.
    pub max_dimension: u32,
}

impl FakeBackend {
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            max_dimension,
            ..Self::default()
        }
    }

    pub fn live_programs(&self) -> usize {
        self.compiled.len() - self.released.len()
    }
}

fn record(pass: &DisplayPass<'_, u32>) -> PassRecord {
    match pass {
        DisplayPass::Empty => PassRecord::Empty,
        DisplayPass::Steady(frame) => PassRecord::Steady(*frame.program),
        DisplayPass::Blend {
            current,
            target,
            factors,
        } => PassRecord::Blend {
            current: *current.program,
            target: *target.program,
            mix: factors.mix,
        },
    }
}

impl RenderBackend for FakeBackend {
    type Program = u32;
    type Error = String;

    fn compile(
        &mut self,
        display: DisplayId,
        source: &str,
        size: RenderSize,
    ) -> Result<Compiled<u32>, CompileError> {
        let wrapped = wrap_fragment(source)?;
        if source.contains(FAIL_MARKER) {
            return Err(CompileError::Validation(format!("unknown identifier {FAIL_MARKER}")));
        }
        self.next_program += 1;
        self.compiled.push((display, self.next_program, size));
        Ok(Compiled {
            program: self.next_program,
            info: wrapped.info,
        })
    }

    fn release(&mut self, _display: DisplayId, program: u32) {
        assert!(
            !self.released.contains(&program),
            "program {program} released twice"
        );
        self.released.push(program);
    }

    fn resize_targets(
        &mut self,
        display: DisplayId,
        size: RenderSize,
    ) -> Result<(), AllocationError> {
        if self.max_dimension > 0 && (size.width > self.max_dimension || size.height > self.max_dimension) {
            return Err(AllocationError::TooLarge {
                requested: size,
                limit: self.max_dimension,
            });
        }
        self.resizes.push((display, size));
        Ok(())
    }

    fn upload_audio(&mut self, frame: &AudioFrame) {
        self.audio_uploads.push(frame.clone());
    }

    fn render(&mut self, plan: FramePlan<'_, u32>) -> Result<(), String> {
        let [left, right] = &plan.displays;
        let passes = if plan.blanked {
            [PassRecord::Empty, PassRecord::Empty]
        } else {
            [record(&left.pass), record(&right.pass)]
        };
        self.frames.push(FrameRecord {
            blanked: plan.blanked,
            sizes: [left.size, right.size],
            passes,
        });
        Ok(())
    }
}

/// Audio source whose availability and retry count tests can inspect.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudio {
    pub available: bool,
    pub retries: Arc<Mutex<u32>>,
    pub frames: Vec<AudioFrame>,
}

impl AudioSource for ScriptedAudio {
    fn latest(&mut self) -> Option<AudioFrame> {
        self.frames.pop()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn request_retry(&mut self) {
        if let Ok(mut retries) = self.retries.lock() {
            *retries += 1;
        }
    }
}

/// Sink that keeps every snapshot it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingStatus {
    pub performance: Arc<Mutex<Vec<PerformanceStatus>>>,
    pub shaders: Arc<Mutex<Vec<ShaderStatus>>>,
    pub uniforms: Arc<Mutex<Vec<UniformStatus>>>,
}

impl StatusSink for RecordingStatus {
    fn performance(&mut self, status: &PerformanceStatus) {
        self.performance.lock().unwrap().push(status.clone());
    }

    fn shader(&mut self, status: &ShaderStatus) {
        self.shaders.lock().unwrap().push(status.clone());
    }

    fn uniforms(&mut self, status: &UniformStatus) {
        self.uniforms.lock().unwrap().push(status.clone());
    }
}
