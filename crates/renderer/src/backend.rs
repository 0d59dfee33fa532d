use std::fmt;

use crate::audio::AudioFrame;
use crate::compile::SourceInfo;
use crate::error::{AllocationError, CompileError};
use crate::timeline::BlendFactors;
use crate::types::{DisplayId, RenderSize};

/// A freshly compiled program and what the compiler learned about it.
#[derive(Debug)]
pub struct Compiled<P> {
    pub program: P,
    pub info: SourceInfo,
}

/// Per-program inputs for one frame.
#[derive(Debug)]
pub struct ProgramFrame<'a, P> {
    pub program: &'a P,
    /// Seconds since the program was first created.
    pub time: f32,
    pub time_delta: f32,
    pub frame: u64,
    /// Packed `FinsParams` block.
    pub params: Vec<u8>,
}

/// What a display needs drawn this frame.
#[derive(Debug)]
pub enum DisplayPass<'a, P> {
    Empty,
    Steady(ProgramFrame<'a, P>),
    Blend {
        current: ProgramFrame<'a, P>,
        target: ProgramFrame<'a, P>,
        factors: BlendFactors,
    },
}

#[derive(Debug)]
pub struct DisplayFrame<'a, P> {
    pub display: DisplayId,
    pub size: RenderSize,
    pub pass: DisplayPass<'a, P>,
}

/// Everything the backend needs to produce one presented frame.
#[derive(Debug)]
pub struct FramePlan<'a, P> {
    /// When set, both viewports are cleared and no shader passes run.
    pub blanked: bool,
    pub displays: [DisplayFrame<'a, P>; 2],
}

/// GPU seam of the engine. All calls happen on the render thread.
pub trait RenderBackend {
    type Program;
    type Error: fmt::Display;

    /// Compiles fragment source for a display rendering at `size`.
    fn compile(
        &mut self,
        display: DisplayId,
        source: &str,
        size: RenderSize,
    ) -> Result<Compiled<Self::Program>, CompileError>;

    /// Frees a program's GPU objects. Called exactly once per program.
    fn release(&mut self, display: DisplayId, program: Self::Program);

    /// Replaces a display's A/B targets; the old ones survive a failure.
    fn resize_targets(&mut self, display: DisplayId, size: RenderSize)
        -> Result<(), AllocationError>;

    fn upload_audio(&mut self, frame: &AudioFrame);

    fn render(&mut self, plan: FramePlan<'_, Self::Program>) -> Result<(), Self::Error>;
}
