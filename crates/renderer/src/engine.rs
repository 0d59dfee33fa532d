use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::{AudioSource, AudioUploads, SilentAudio};
use crate::backend::{FramePlan, RenderBackend};
use crate::command::{Command, CommandQueue};
use crate::display::{DisplaySlot, LoadRequest};
use crate::status::{
    unix_timestamp, FpsMeter, NullStatus, PerformanceStatus, ShaderStatus, StatusSink,
    UniformStatus,
};
use crate::types::{BlurSettings, CrossfadeCurve, DisplayId, RendererConfig};

/// Owns both displays and drives them from the render thread.
pub struct Engine<B: RenderBackend> {
    backend: B,
    slots: [DisplaySlot<B::Program>; 2],
    commands: CommandQueue,
    audio: Box<dyn AudioSource>,
    uploads: AudioUploads,
    status: Box<dyn StatusSink>,
    fps: Option<FpsMeter>,
    blur: BlurSettings,
    curve: CrossfadeCurve,
    settle_frames: u32,
    blanked: bool,
    running: bool,
    last_frame: Option<Instant>,
}

impl<B: RenderBackend> Engine<B> {
    pub fn new(backend: B, config: &RendererConfig, commands: CommandQueue) -> Self {
        let base = config.geometry.base_size();
        Self {
            backend,
            slots: [
                DisplaySlot::new(DisplayId::Left, base, config.initial_scale),
                DisplaySlot::new(DisplayId::Right, base, config.initial_scale),
            ],
            commands,
            audio: Box::new(SilentAudio),
            uploads: AudioUploads::default(),
            status: Box::new(NullStatus),
            fps: config
                .fps_publish_interval
                .map(|interval| FpsMeter::new(interval, config.fps_smoothing_frames)),
            blur: config.blur,
            curve: config.curve,
            settle_frames: config.scale_settle_frames,
            blanked: false,
            running: true,
            last_frame: None,
        }
    }

    pub fn with_audio(mut self, audio: impl AudioSource + 'static) -> Self {
        self.audio = Box::new(audio);
        self
    }

    pub fn with_status(mut self, sink: impl StatusSink + 'static) -> Self {
        self.status = Box::new(sink);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn slot(&self, display: DisplayId) -> &DisplaySlot<B::Program> {
        &self.slots[display.index()]
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_blanked(&self) -> bool {
        self.blanked
    }

    /// Applies every command queued when the drain began, oldest first.
    pub fn drain_and_apply(&mut self, now: Instant) {
        for command in self.commands.drain() {
            self.apply(command, now);
        }
    }

    pub fn apply(&mut self, command: Command, now: Instant) {
        match command {
            Command::ShaderChange(change) => {
                let request = LoadRequest::from(&change);
                for display in change.target.displays() {
                    self.slots[display.index()].set_shader(
                        &mut self.backend,
                        request.clone(),
                        now,
                    );
                }
            }
            Command::UniformChange(change) => {
                for display in change.target.displays() {
                    self.slots[display.index()].set_uniform(&change.name, change.value);
                }
            }
            Command::SetBlanked(blanked) => {
                if blanked != self.blanked {
                    info!(blanked, "shader output {}", if blanked { "suspended" } else { "resumed" });
                }
                self.blanked = blanked;
            }
            Command::SetBlur(blur) => {
                debug!(enabled = blur.enabled, strength = blur.strength, "transition blur updated");
                self.blur = blur;
            }
            Command::Shutdown => {
                info!("shutdown requested");
                self.running = false;
            }
        }
        self.collect_changes();
    }

    /// Advances both displays and renders one frame.
    pub fn frame(&mut self, now: Instant) -> Result<(), B::Error> {
        for slot in &mut self.slots {
            slot.advance(&mut self.backend, now, self.settle_frames);
        }
        self.collect_changes();

        if !self.blanked {
            if let Some(frame) = self.uploads.next(self.audio.as_mut()) {
                self.backend.upload_audio(&frame);
            }
        }

        let delta = self
            .last_frame
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_frame = Some(now);

        let [left, right] = &self.slots;
        let plan = FramePlan {
            blanked: self.blanked,
            displays: [
                left.frame_pass(now, delta, self.curve, self.blur),
                right.frame_pass(now, delta, self.curve, self.blur),
            ],
        };
        self.backend.render(plan)?;

        if !self.blanked {
            for slot in &mut self.slots {
                slot.finish_frame();
            }
        }
        if let Some(fps) = self.fps.as_mut().and_then(|meter| meter.record(now)) {
            self.publish_performance(fps);
        }
        Ok(())
    }

    /// Releases every program still owned by the displays.
    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            slot.release_all(&mut self.backend);
        }
        self.running = false;
    }

    fn collect_changes(&mut self) {
        let mut changed = false;
        let mut wants_audio = false;
        for slot in &mut self.slots {
            for error in slot.take_param_errors() {
                warn!(display = %slot.id(), error = %error, "uniform binding problem");
            }
            wants_audio |= slot.take_audio_request();
            changed |= slot.take_dirty();
        }
        if wants_audio && !self.audio.is_available() {
            info!("shader samples audio but no capture device is available; requesting retry");
            self.audio.request_retry();
        }
        if changed {
            self.publish_state();
        }
    }

    fn publish_state(&mut self) {
        let mut shader = ShaderStatus::default();
        let mut uniforms = UniformStatus::new();
        for slot in &self.slots {
            shader.current.insert(
                slot.id(),
                slot.current().and_then(|program| program.name().map(str::to_owned)),
            );
            shader.transition.insert(slot.id(), slot.transition_status());
            uniforms.insert(slot.id(), slot.uniform_status());
        }
        self.status.shader(&shader);
        self.status.uniforms(&uniforms);
    }

    fn publish_performance(&mut self, fps: f32) {
        let displays: BTreeMap<_, _> = self
            .slots
            .iter()
            .map(|slot| (slot.id(), slot.performance()))
            .collect();
        self.status.performance(&PerformanceStatus {
            fps,
            timestamp: unix_timestamp(),
            displays,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::command::{channel, CommandSender, ShaderChange, UniformChange};
    use crate::testing::{
        audio_shader, shader, FakeBackend, PassRecord, RecordingStatus, ScriptedAudio,
    };
    use crate::types::{DisplayTarget, RenderSize, UniformValue};

    fn engine() -> (CommandSender, Engine<FakeBackend>) {
        let (sender, queue) = channel();
        let config = RendererConfig {
            fps_publish_interval: None,
            ..RendererConfig::default()
        };
        (sender, Engine::new(FakeBackend::default(), &config, queue))
    }

    fn change(target: DisplayTarget, name: &str, secs: f32, scale: f32) -> ShaderChange {
        ShaderChange::new(target, shader(name))
            .with_transition(Duration::from_secs_f32(secs))
            .with_scale(scale)
            .with_name(name)
    }

    fn current(engine: &Engine<FakeBackend>, display: DisplayId) -> Option<String> {
        engine
            .slot(display)
            .current()
            .and_then(|program| program.name().map(str::to_owned))
    }

    #[test]
    fn both_expands_left_then_right() {
        let (sender, mut engine) = engine();
        sender.submit(change(DisplayTarget::Both, "stars", 0.5, 1.0)).unwrap();
        engine.drain_and_apply(Instant::now());
        let order: Vec<_> = engine.backend().compiled.iter().map(|(d, _, _)| *d).collect();
        assert_eq!(order, vec![DisplayId::Left, DisplayId::Right]);
        assert_eq!(current(&engine, DisplayId::Left).as_deref(), Some("stars"));
        assert_eq!(current(&engine, DisplayId::Right).as_deref(), Some("stars"));
    }

    #[test]
    fn commands_apply_in_fifo_order() {
        let (sender, mut engine) = engine();
        let now = Instant::now();
        sender.submit(change(DisplayTarget::Left, "a", 0.0, 1.0)).unwrap();
        sender
            .submit(UniformChange {
                target: DisplayTarget::Left,
                name: "speed".into(),
                value: UniformValue::Float(1.0),
            })
            .unwrap();
        sender
            .submit(UniformChange {
                target: DisplayTarget::Left,
                name: "speed".into(),
                value: UniformValue::Float(3.0),
            })
            .unwrap();
        sender.submit(change(DisplayTarget::Left, "b", 0.0, 1.0)).unwrap();
        engine.drain_and_apply(now);

        assert_eq!(current(&engine, DisplayId::Left).as_deref(), Some("b"));
        assert_eq!(
            engine.slot(DisplayId::Left).uniforms().get("speed"),
            Some(&UniformValue::Float(3.0))
        );
        assert!(engine.slot(DisplayId::Right).current().is_none());
    }

    #[test]
    fn scenario_upscale_after_transition_with_preserved_start() {
        let (sender, mut engine) = engine();
        let t0 = Instant::now();
        sender.submit(change(DisplayTarget::Left, "A", 0.0, 1.0)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0).unwrap();
        let a = engine.slot(DisplayId::Left).current().map(|p| *p.handle()).unwrap();

        sender.submit(change(DisplayTarget::Left, "B", 1.0, 1.0)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0 + Duration::from_millis(500)).unwrap();
        match engine.backend().frames.last().unwrap().passes[0] {
            PassRecord::Blend { mix, .. } => assert!((mix - 0.5).abs() < 1e-3),
            other => panic!("expected blend, got {other:?}"),
        }

        let t1 = t0 + Duration::from_secs(1);
        engine.frame(t1).unwrap();
        assert_eq!(current(&engine, DisplayId::Left).as_deref(), Some("B"));
        assert!(engine.backend().released.contains(&a));

        sender.submit(change(DisplayTarget::Left, "C", 0.5, 2.0)).unwrap();
        engine.drain_and_apply(t1);
        let slot = engine.slot(DisplayId::Left);
        assert_eq!(slot.transition_target().and_then(|p| p.name()), Some("C"));
        assert_eq!(slot.deferred_scale(), Some(2.0));
        assert_eq!(slot.scale(), 1.0);
        let c_build = *slot.transition_target().unwrap().handle();

        engine.frame(t1 + Duration::from_millis(250)).unwrap();
        assert_eq!(
            engine.backend().frames.last().unwrap().sizes[0],
            RenderSize::new(720, 720)
        );

        engine.frame(t1 + Duration::from_millis(500)).unwrap();
        let slot = engine.slot(DisplayId::Left);
        let c = slot.current().unwrap();
        assert_eq!(c.name(), Some("C"));
        assert_eq!(c.started_at(), t1);
        assert_ne!(*c.handle(), c_build);
        assert_eq!(slot.scale(), 2.0);
        assert_eq!(
            engine.backend().resizes,
            vec![(DisplayId::Left, RenderSize::new(1440, 1440))]
        );
        assert_eq!(
            engine.backend().compiled.last().unwrap().2,
            RenderSize::new(1440, 1440)
        );
    }

    #[test]
    fn zero_duration_never_renders_a_blend() {
        let (sender, mut engine) = engine();
        let t0 = Instant::now();
        sender.submit(change(DisplayTarget::Right, "a", 0.0, 1.0)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0).unwrap();
        sender.submit(change(DisplayTarget::Right, "b", 0.0, 1.0)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0 + Duration::from_millis(16)).unwrap();

        let b = engine.slot(DisplayId::Right).current().map(|p| *p.handle()).unwrap();
        let frames = &engine.backend().frames;
        assert_eq!(frames[1].passes[1], PassRecord::Steady(b));
        assert!(frames
            .iter()
            .all(|frame| !matches!(frame.passes[1], PassRecord::Blend { .. })));
    }

    #[test]
    fn blanked_frames_skip_shader_passes() {
        let (sender, mut engine) = engine();
        let t0 = Instant::now();
        sender.submit(change(DisplayTarget::Both, "a", 0.0, 1.0)).unwrap();
        sender.submit(Command::SetBlanked(true)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0).unwrap();
        engine.frame(t0 + Duration::from_millis(16)).unwrap();

        let frames = &engine.backend().frames;
        assert!(frames.iter().all(|frame| frame.blanked));
        assert!(frames
            .iter()
            .all(|frame| frame.passes == [PassRecord::Empty, PassRecord::Empty]));
        assert_eq!(engine.slot(DisplayId::Left).current().unwrap().frame(), 0);

        sender.submit(Command::SetBlanked(false)).unwrap();
        engine.drain_and_apply(t0);
        engine.frame(t0 + Duration::from_millis(32)).unwrap();
        assert!(!engine.backend().frames.last().unwrap().blanked);
        assert_eq!(engine.slot(DisplayId::Left).current().unwrap().frame(), 1);
    }

    #[test]
    fn audio_shaders_request_retry_when_unavailable() {
        let (sender, queue) = channel();
        let audio = ScriptedAudio::default();
        let retries = audio.retries.clone();
        let mut engine =
            Engine::new(FakeBackend::default(), &RendererConfig::default(), queue).with_audio(audio);
        sender
            .submit(ShaderChange::new(DisplayTarget::Both, audio_shader("bars")))
            .unwrap();
        engine.drain_and_apply(Instant::now());
        assert_eq!(*retries.lock().unwrap(), 1);
        assert!(engine.slot(DisplayId::Left).current().unwrap().uses_audio());

        engine.frame(Instant::now()).unwrap();
        engine.frame(Instant::now()).unwrap();
        // Silence goes up once while the source is unavailable.
        assert_eq!(engine.backend().audio_uploads.len(), 1);
    }

    #[test]
    fn status_is_published_on_changes() {
        let (sender, queue) = channel();
        let sink = RecordingStatus::default();
        let shaders = sink.shaders.clone();
        let uniforms = sink.uniforms.clone();
        let mut engine =
            Engine::new(FakeBackend::default(), &RendererConfig::default(), queue).with_status(sink);
        let t0 = Instant::now();
        sender.submit(change(DisplayTarget::Left, "a", 0.0, 1.0)).unwrap();
        sender.submit(change(DisplayTarget::Left, "b", 1.0, 1.0)).unwrap();
        sender
            .submit(UniformChange {
                target: DisplayTarget::Left,
                name: "speed".into(),
                value: UniformValue::Float(2.0),
            })
            .unwrap();
        engine.drain_and_apply(t0);

        let latest = shaders.lock().unwrap().last().cloned().unwrap();
        assert_eq!(latest.current[&DisplayId::Left].as_deref(), Some("a"));
        assert!(latest.transition[&DisplayId::Left].active);
        assert_eq!(latest.transition[&DisplayId::Left].target.as_deref(), Some("b"));
        let latest_uniforms = uniforms.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            latest_uniforms[&DisplayId::Left].values.get("speed"),
            Some(&UniformValue::Float(2.0))
        );
    }

    #[test]
    fn shutdown_releases_every_program() {
        let (sender, mut engine) = engine();
        let t0 = Instant::now();
        sender.submit(change(DisplayTarget::Both, "a", 0.0, 1.0)).unwrap();
        sender.submit(change(DisplayTarget::Left, "b", 1.0, 1.0)).unwrap();
        sender.submit(Command::Shutdown).unwrap();
        engine.drain_and_apply(t0);
        assert!(!engine.is_running());

        engine.shutdown();
        assert_eq!(engine.backend().live_programs(), 0);
    }
}
