//! Per-display shader, transition, and render-scale state.
//!
//! A display is `Empty` until its first shader compiles, then alternates
//! between `Steady` and `Transitioning`. Resizing the render targets opens a
//! short settle window during which new loads are parked in `pending`; loads
//! that arrive mid-transition are parked in `queued`. Both slots hold a
//! single request and the newest one wins.
//!
//! Scale changes are asymmetric: a smaller scale is applied before the
//! incoming shader compiles, a larger one waits until the display is steady
//! again so a transition never runs on freshly enlarged targets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{Compiled, DisplayFrame, DisplayPass, ProgramFrame, RenderBackend};
use crate::command::ShaderChange;
use crate::compile::SourceInfo;
use crate::error::ParamError;
use crate::status::{DisplayPerformance, DisplayUniforms, TransitionStatus};
use crate::timeline::{BlendFactors, Transition};
use crate::types::{BlurSettings, CrossfadeCurve, DisplayId, RenderSize, UniformValue};
use crate::uniforms::ParamLayout;

/// A shader change addressed to a single display.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub source: Arc<str>,
    pub transition: Duration,
    pub scale: f32,
    pub name: Option<String>,
}

impl LoadRequest {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

impl From<&ShaderChange> for LoadRequest {
    fn from(change: &ShaderChange) -> Self {
        Self {
            source: Arc::clone(&change.source),
            transition: change.transition,
            scale: change.scale,
            name: change.name.clone(),
        }
    }
}

/// What [`DisplaySlot::set_shader`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Parked until the running transition finishes.
    Queued,
    /// Parked until the render-scale settle window closes.
    Pending,
    /// Compilation failed; the display is unchanged.
    Failed,
    /// The new program is now current.
    Activated,
    /// A crossfade towards the new program has started.
    Transitioning,
}

/// A compiled program plus the bookkeeping that survives recompilation.
#[derive(Debug)]
pub struct ShaderProgram<P> {
    handle: P,
    source: Arc<str>,
    name: Option<String>,
    info: SourceInfo,
    layout: ParamLayout,
    started_at: Instant,
    frame: u64,
    reported: BTreeSet<String>,
}

impl<P> ShaderProgram<P> {
    fn new(compiled: Compiled<P>, request: &LoadRequest, now: Instant) -> Self {
        let layout = ParamLayout::new(&compiled.info.params);
        Self {
            handle: compiled.program,
            source: Arc::clone(&request.source),
            name: request.name.clone(),
            info: compiled.info,
            layout,
            started_at: now,
            frame: 0,
            reported: BTreeSet::new(),
        }
    }

    pub fn handle(&self) -> &P {
        &self.handle
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn uses_audio(&self) -> bool {
        self.info.uses_audio
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn frame_inputs(
        &self,
        now: Instant,
        delta: Duration,
        values: &BTreeMap<String, UniformValue>,
    ) -> ProgramFrame<'_, P> {
        let (params, _) = self.layout.pack(values);
        ProgramFrame {
            program: &self.handle,
            time: now.saturating_duration_since(self.started_at).as_secs_f32(),
            time_delta: delta.as_secs_f32(),
            frame: self.frame,
            params,
        }
    }

    /// Records problems binding `name`; each missing name is reported once per program.
    fn check_param(
        &mut self,
        display: DisplayId,
        name: &str,
        value: UniformValue,
        errors: &mut Vec<ParamError>,
    ) {
        match self.info.param_kind(name) {
            None => {
                if self.reported.insert(name.to_string()) {
                    errors.push(ParamError::MissingUniform {
                        display,
                        name: name.to_string(),
                    });
                }
            }
            Some(declared) if value.coerce(declared).is_none() => {
                errors.push(ParamError::TypeMismatch {
                    name: name.to_string(),
                    declared,
                    given: value.kind(),
                });
            }
            Some(_) => {}
        }
    }
}

#[derive(Debug)]
struct ActiveTransition<P> {
    target: ShaderProgram<P>,
    timing: Transition,
}

/// State owned by the render thread for one fin.
#[derive(Debug)]
pub struct DisplaySlot<P> {
    id: DisplayId,
    base: RenderSize,
    scale: f32,
    current: Option<ShaderProgram<P>>,
    transition: Option<ActiveTransition<P>>,
    pending: Option<LoadRequest>,
    queued: Option<LoadRequest>,
    deferred_scale: Option<f32>,
    settle: Option<u32>,
    uniforms: BTreeMap<String, UniformValue>,
    param_errors: Vec<ParamError>,
    audio_wanted: bool,
    dirty: bool,
}

impl<P> DisplaySlot<P> {
    pub fn new(id: DisplayId, base: RenderSize, scale: f32) -> Self {
        Self {
            id,
            base,
            scale: if scale.is_finite() && scale > 0.0 { scale } else { 1.0 },
            current: None,
            transition: None,
            pending: None,
            queued: None,
            deferred_scale: None,
            settle: None,
            uniforms: BTreeMap::new(),
            param_errors: Vec::new(),
            audio_wanted: false,
            dirty: false,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn render_size(&self) -> RenderSize {
        self.base.scaled(self.scale)
    }

    pub fn current(&self) -> Option<&ShaderProgram<P>> {
        self.current.as_ref()
    }

    pub fn transition_target(&self) -> Option<&ShaderProgram<P>> {
        self.transition.as_ref().map(|active| &active.target)
    }

    /// Raw progress of the running transition.
    pub fn transition_alpha(&self, now: Instant) -> Option<f32> {
        self.transition.as_ref().map(|active| active.timing.alpha(now))
    }

    pub fn queued(&self) -> Option<&LoadRequest> {
        self.queued.as_ref()
    }

    pub fn pending(&self) -> Option<&LoadRequest> {
        self.pending.as_ref()
    }

    pub fn deferred_scale(&self) -> Option<f32> {
        self.deferred_scale
    }

    pub fn is_scale_changing(&self) -> bool {
        self.settle.is_some()
    }

    pub fn uniforms(&self) -> &BTreeMap<String, UniformValue> {
        &self.uniforms
    }

    /// Applies a shader change following the queue/pending/scale rules above.
    pub fn set_shader<B>(&mut self, backend: &mut B, request: LoadRequest, now: Instant) -> LoadOutcome
    where
        B: RenderBackend<Program = P>,
    {
        if self.transition.is_some() {
            if let Some(replaced) = self.queued.replace(request) {
                debug!(display = %self.id, shader = replaced.label(), "queued shader superseded");
            }
            self.dirty = true;
            return LoadOutcome::Queued;
        }
        if self.settle.is_some() {
            if let Some(replaced) = self.pending.replace(request) {
                debug!(display = %self.id, shader = replaced.label(), "pending shader superseded");
            }
            return LoadOutcome::Pending;
        }

        let requested = self.validated_scale(request.scale);
        let previous_deferred = self.deferred_scale;
        let upscale = requested > self.scale;
        if upscale {
            self.deferred_scale = Some(requested);
        } else if requested < self.scale {
            self.deferred_scale = None;
            self.apply_scale(backend, requested);
        }

        let compiled = match backend.compile(self.id, &request.source, self.render_size()) {
            Ok(compiled) => compiled,
            Err(err) => {
                warn!(
                    display = %self.id,
                    shader = request.label(),
                    error = %err,
                    "shader failed to compile; keeping the current program"
                );
                if upscale {
                    self.deferred_scale = previous_deferred;
                }
                return LoadOutcome::Failed;
            }
        };
        let program = ShaderProgram::new(compiled, &request, now);
        self.audio_wanted |= program.uses_audio();
        self.dirty = true;

        if self.current.is_none() {
            info!(display = %self.id, shader = request.label(), "shader loaded");
            self.activate(program);
            if let Some(scale) = self.deferred_scale.take() {
                self.apply_scale(backend, scale);
            }
            return LoadOutcome::Activated;
        }

        debug!(
            display = %self.id,
            shader = request.label(),
            duration_ms = request.transition.as_millis() as u64,
            "transition started"
        );
        self.transition = Some(ActiveTransition {
            target: program,
            timing: Transition::new(now, request.transition),
        });
        if request.transition.is_zero() {
            self.complete_transition(backend, now);
            return LoadOutcome::Activated;
        }
        LoadOutcome::Transitioning
    }

    /// Per-frame housekeeping: close the settle window, then finish a
    /// completed transition.
    pub fn advance<B>(&mut self, backend: &mut B, now: Instant, settle_frames: u32)
    where
        B: RenderBackend<Program = P>,
    {
        if let Some(frames) = self.settle.as_mut() {
            *frames += 1;
            if *frames >= settle_frames {
                self.settle = None;
                debug!(display = %self.id, "render scale settled");
            }
        }
        if self.settle.is_none() {
            if let Some(pending) = self.pending.take() {
                self.set_shader(backend, pending, now);
            }
        }
        let finished = self
            .transition
            .as_ref()
            .is_some_and(|active| active.timing.is_complete(now));
        if finished {
            self.complete_transition(backend, now);
        }
    }

    fn complete_transition<B>(&mut self, backend: &mut B, now: Instant)
    where
        B: RenderBackend<Program = P>,
    {
        let Some(active) = self.transition.take() else {
            return;
        };
        if let Some(previous) = self.current.take() {
            backend.release(self.id, previous.handle);
        }
        info!(
            display = %self.id,
            shader = active.target.name().unwrap_or("<unnamed>"),
            "transition complete"
        );
        self.activate(active.target);
        self.dirty = true;
        if let Some(scale) = self.deferred_scale.take() {
            self.apply_scale(backend, scale);
        }
        if let Some(queued) = self.queued.take() {
            self.set_shader(backend, queued, now);
        }
    }

    /// Reallocates targets at `scale` and rebuilds every live program for the
    /// new size. Returns false when the targets could not be allocated.
    fn apply_scale<B>(&mut self, backend: &mut B, scale: f32) -> bool
    where
        B: RenderBackend<Program = P>,
    {
        let size = self.base.scaled(scale);
        if let Err(err) = backend.resize_targets(self.id, size) {
            warn!(
                display = %self.id,
                scale,
                error = %err,
                "render target reallocation failed; keeping the previous scale"
            );
            self.settle = None;
            return false;
        }
        info!(display = %self.id, from = self.scale, to = scale, %size, "render scale changed");
        self.scale = scale;
        self.settle = Some(0);
        self.dirty = true;

        let id = self.id;
        if let Some(current) = self.current.as_mut() {
            rebuild(backend, id, current, size);
        }
        if let Some(active) = self.transition.as_mut() {
            rebuild(backend, id, &mut active.target, size);
        }
        true
    }

    fn validated_scale(&self, requested: f32) -> f32 {
        if requested.is_finite() && requested > 0.0 {
            requested
        } else {
            warn!(display = %self.id, requested, "ignoring invalid render scale");
            self.scale
        }
    }

    fn activate(&mut self, mut program: ShaderProgram<P>) {
        for (name, value) in &self.uniforms {
            program.check_param(self.id, name, *value, &mut self.param_errors);
        }
        self.current = Some(program);
    }

    /// Stores a uniform value; it persists across shader changes.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_string(), value);
        self.dirty = true;
        if let Some(current) = self.current.as_mut() {
            current.check_param(self.id, name, value, &mut self.param_errors);
        }
    }

    /// Builds the draw description for this frame.
    pub fn frame_pass(
        &self,
        now: Instant,
        delta: Duration,
        curve: CrossfadeCurve,
        blur: BlurSettings,
    ) -> DisplayFrame<'_, P> {
        let pass = match (&self.current, &self.transition) {
            (None, _) => DisplayPass::Empty,
            (Some(current), None) => {
                DisplayPass::Steady(current.frame_inputs(now, delta, &self.uniforms))
            }
            (Some(current), Some(active)) => DisplayPass::Blend {
                current: current.frame_inputs(now, delta, &self.uniforms),
                target: active.target.frame_inputs(now, delta, &self.uniforms),
                factors: BlendFactors::compute(active.timing.alpha(now), curve, blur),
            },
        };
        DisplayFrame {
            display: self.id,
            size: self.render_size(),
            pass,
        }
    }

    /// Advances frame counters after a successful draw.
    pub fn finish_frame(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.frame += 1;
        }
        if let Some(active) = self.transition.as_mut() {
            active.target.frame += 1;
        }
    }

    /// Releases every program this display owns.
    pub fn release_all<B>(&mut self, backend: &mut B)
    where
        B: RenderBackend<Program = P>,
    {
        if let Some(active) = self.transition.take() {
            backend.release(self.id, active.target.handle);
        }
        if let Some(current) = self.current.take() {
            backend.release(self.id, current.handle);
        }
        self.pending = None;
        self.queued = None;
    }

    pub fn take_param_errors(&mut self) -> Vec<ParamError> {
        std::mem::take(&mut self.param_errors)
    }

    /// True once after a program that samples audio was compiled.
    pub fn take_audio_request(&mut self) -> bool {
        std::mem::take(&mut self.audio_wanted)
    }

    /// True once after anything reported in status changed.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn transition_status(&self) -> TransitionStatus {
        TransitionStatus {
            active: self.transition.is_some(),
            target: self
                .transition
                .as_ref()
                .and_then(|active| active.target.name.clone()),
            queued: self.queued.as_ref().and_then(|request| request.name.clone()),
        }
    }

    pub fn performance(&self) -> DisplayPerformance {
        DisplayPerformance {
            resolution: self.render_size(),
            scale: self.scale,
        }
    }

    pub fn uniform_status(&self) -> DisplayUniforms {
        let Some(current) = self.current.as_ref() else {
            return DisplayUniforms::default();
        };
        DisplayUniforms {
            shader: current.name.clone(),
            values: self
                .uniforms
                .iter()
                .filter(|(name, _)| current.info.declares(name))
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
        }
    }
}

fn rebuild<B: RenderBackend>(
    backend: &mut B,
    fin: DisplayId,
    program: &mut ShaderProgram<B::Program>,
    size: RenderSize,
) {
    match backend.compile(fin, &program.source, size) {
        Ok(compiled) => {
            let previous = std::mem::replace(&mut program.handle, compiled.program);
            backend.release(fin, previous);
        }
        Err(err) => warn!(
            display = %fin,
            shader = program.name().unwrap_or("<unnamed>"),
            error = %err,
            "recompile at new scale failed; keeping the previous build"
        ),
    }
}
