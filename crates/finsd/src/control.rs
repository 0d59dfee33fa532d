//! JSON-lines control plane read from stdin.
//!
//! Each line holds one message:
//!
//! ```text
//! {"shader": {"display": "both", "name": "stars", "transition_duration": 0.75, "scale": 0.5}}
//! {"uniform": {"display": "left", "name": "speed", "type": "float", "value": 2.5}}
//! {"blur": {"enabled": true, "strength": 6.0}}
//! {"blank": true}
//! {"reload": true}
//! {"quit": true}
//! ```

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use animconfig::{AnimationKind, ConfigError, FinsConfig, Side};
use renderer::{
    BlurSettings, ChannelClosed, Command, CommandSender, DisplayId, DisplayTarget, ShaderChange,
    UniformChange, UniformError, UniformKind, UniformValue,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::status::Catalogue;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown animation '{0}'")]
    UnknownAnimation(String),
    #[error("animation '{0}' is an overlay and has no shaders")]
    NotRenderable(String),
    #[error("failed to read shader {path}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Uniform(#[from] UniformError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Closed(#[from] ChannelClosed),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ControlMessage {
    Shader(ShaderMessage),
    Uniform(UniformMessage),
    Blur(BlurMessage),
    Blank(bool),
    Reload(bool),
    Quit(bool),
}

#[derive(Debug, Deserialize)]
struct ShaderMessage {
    #[serde(default = "default_display")]
    display: String,
    name: String,
    /// Seconds; the configured transition length when absent.
    #[serde(default)]
    transition_duration: Option<f64>,
    #[serde(default)]
    scale: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct UniformMessage {
    #[serde(default = "default_display")]
    display: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BlurMessage {
    enabled: bool,
    #[serde(default)]
    strength: Option<f32>,
}

fn default_display() -> String {
    "both".to_string()
}

/// Whether the reader should keep going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn side_of(display: DisplayId) -> Side {
    match display {
        DisplayId::Left => Side::Left,
        DisplayId::Right => Side::Right,
    }
}

fn kind_of(kind: animconfig::UniformType) -> UniformKind {
    match kind {
        animconfig::UniformType::Float => UniformKind::Float,
        animconfig::UniformType::Int => UniformKind::Int,
        animconfig::UniformType::Vec2 => UniformKind::Vec2,
        animconfig::UniformType::Vec3 => UniformKind::Vec3,
        animconfig::UniformType::Vec4 => UniformKind::Vec4,
    }
}

/// Parses a uniform value given as a number, an array of numbers, or a
/// string of comma or space separated numbers.
pub fn parse_components(value: &serde_json::Value) -> Result<Vec<f32>, UniformError> {
    let number = |value: &serde_json::Value| {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| UniformError::Number(value.to_string()))
    };
    match value {
        serde_json::Value::Number(_) => Ok(vec![number(value)?]),
        serde_json::Value::Bool(flag) => Ok(vec![if *flag { 1.0 } else { 0.0 }]),
        serde_json::Value::Array(items) => items.iter().map(number).collect(),
        serde_json::Value::String(text) => text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<f32>()
                    .map_err(|_| UniformError::Number(part.to_string()))
            })
            .collect(),
        other => Err(UniformError::Number(other.to_string())),
    }
}

/// Turns control messages into engine commands using the loaded animations.
pub struct Controller {
    config: FinsConfig,
    config_path: PathBuf,
    commands: CommandSender,
    catalogue: Catalogue,
}

impl Controller {
    pub fn new(
        config: FinsConfig,
        config_path: PathBuf,
        commands: CommandSender,
        catalogue: Catalogue,
    ) -> Self {
        catalogue.replace(config.base_animations().map(str::to_string).collect());
        Self {
            config,
            config_path,
            commands,
            catalogue,
        }
    }

    fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Loads an animation onto `target`, followed by its default uniforms.
    ///
    /// Every shader file is read before anything is submitted, so a missing
    /// file leaves both fins untouched.
    pub fn load_animation(
        &self,
        target: DisplayTarget,
        id: &str,
        transition: Option<Duration>,
        scale: Option<f32>,
    ) -> Result<(), ControlError> {
        let animation = self
            .config
            .animation(id)
            .ok_or_else(|| ControlError::UnknownAnimation(id.to_string()))?;
        if animation.kind != AnimationKind::Base {
            return Err(ControlError::NotRenderable(id.to_string()));
        }
        let transition =
            transition.unwrap_or_else(|| self.config.transitions.effective_duration());
        let scale = scale
            .or(animation.render_scale)
            .unwrap_or(self.config.render.initial_scale);

        let mut sources = Vec::with_capacity(target.displays().len());
        for &display in target.displays() {
            let shader = animation
                .shader(side_of(display))
                .ok_or_else(|| ControlError::NotRenderable(id.to_string()))?;
            let path = self.config.shader_path(self.config_dir(), shader);
            let source =
                fs::read_to_string(&path).map_err(|source| ControlError::Shader { path, source })?;
            sources.push((display, source));
        }

        for (display, source) in sources {
            self.commands.submit(
                ShaderChange::new(display.into(), source)
                    .with_transition(transition)
                    .with_scale(scale)
                    .with_name(id),
            )?;
            for (name, kind, components) in animation.default_uniforms(side_of(display)) {
                let value = UniformValue::from_components(kind_of(kind), &components)?;
                self.commands.submit(UniformChange {
                    target: display.into(),
                    name: name.to_string(),
                    value,
                })?;
            }
        }
        info!(
            animation = id,
            target = ?target,
            transition_ms = transition.as_millis(),
            scale,
            "animation requested"
        );
        Ok(())
    }

    pub fn handle_line(&mut self, line: &str) -> Result<Flow, ControlError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        let message: ControlMessage = serde_json::from_str(line)?;
        debug!(?message, "control message");
        match message {
            ControlMessage::Shader(shader) => {
                let target: DisplayTarget = shader.display.parse()?;
                let transition = shader.transition_duration.and_then(|seconds| {
                    Duration::try_from_secs_f64(seconds)
                        .map_err(|err| {
                            warn!(seconds, error = %err, "ignoring invalid transition duration")
                        })
                        .ok()
                });
                self.load_animation(target, &shader.name, transition, shader.scale)?;
            }
            ControlMessage::Uniform(uniform) => {
                let target: DisplayTarget = uniform.display.parse()?;
                let kind: UniformKind = uniform.kind.parse()?;
                let components = parse_components(&uniform.value)?;
                let value = UniformValue::from_components(kind, &components)?;
                self.commands.submit(UniformChange {
                    target,
                    name: uniform.name,
                    value,
                })?;
            }
            ControlMessage::Blur(blur) => {
                let mut settings = BlurSettings {
                    enabled: blur.enabled,
                    ..blur_settings(&self.config)
                };
                if let Some(strength) = blur.strength.filter(|s| s.is_finite() && *s >= 0.0) {
                    settings.strength = strength;
                }
                self.commands.submit(Command::SetBlur(settings))?;
            }
            ControlMessage::Blank(blanked) => {
                self.commands.submit(Command::SetBlanked(blanked))?;
            }
            ControlMessage::Reload(false) | ControlMessage::Quit(false) => {}
            ControlMessage::Reload(true) => self.reload()?,
            ControlMessage::Quit(true) => {
                self.commands.submit(Command::Shutdown)?;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Re-reads the config file; the previous config stays active on error.
    pub fn reload(&mut self) -> Result<(), ControlError> {
        let config = FinsConfig::load(&self.config_path)?;
        self.catalogue
            .replace(config.base_animations().map(str::to_string).collect());
        self.config = config;
        info!(path = %self.config_path.display(), "configuration reloaded");
        Ok(())
    }

    /// Handles lines until the input ends, a quit arrives, or the engine goes away.
    pub fn serve(mut self, input: impl BufRead) {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!(error = %err, "failed to read control input");
                    break;
                }
            };
            match self.handle_line(&line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return,
                Err(ControlError::Closed(_)) => {
                    debug!("render engine stopped; closing control input");
                    return;
                }
                Err(err) => warn!(error = %err, "control message rejected"),
            }
        }
        debug!("control input closed");
    }
}

pub fn blur_settings(config: &FinsConfig) -> BlurSettings {
    BlurSettings {
        enabled: config.transitions.blur.enabled,
        strength: config.transitions.blur.strength,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{channel, CommandQueue};
    use tempfile::TempDir;

    const CONFIG: &str = r#"
default_animation = "stars"
shader_dir = "shaders"

[transitions]
duration = "750ms"

[animations.stars]
left_shader = "stars_l.frag"
right_shader = "stars_r.frag"
render_scale = 0.5

[animations.stars.uniforms.speed]
type = "float"
value = 1.5

[animations.stars.uniforms.tint]
type = "vec3"
left = [1.0, 0.0, 0.0]
right = [0.0, 0.0, 1.0]

[animations.broken]
left_shader = "missing_l.frag"
right_shader = "missing_r.frag"

[animations.face]
type = "overlay"
"#;

    struct Fixture {
        _dir: TempDir,
        controller: Controller,
        queue: CommandQueue,
        catalogue: Catalogue,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let shaders = dir.path().join("shaders");
        fs::create_dir_all(&shaders).unwrap();
        fs::write(shaders.join("stars_l.frag"), "// left").unwrap();
        fs::write(shaders.join("stars_r.frag"), "// right").unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, CONFIG).unwrap();

        let config = FinsConfig::load(&config_path).unwrap();
        let (sender, queue) = channel();
        let catalogue = Catalogue::default();
        let controller = Controller::new(config, config_path, sender, catalogue.clone());
        Fixture {
            _dir: dir,
            controller,
            queue,
            catalogue,
        }
    }

    #[test]
    fn shader_message_loads_both_fins_with_defaults() {
        let mut fx = fixture();
        let flow = fx
            .controller
            .handle_line(r#"{"shader": {"display": "both", "name": "stars"}}"#)
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        let batch = fx.queue.drain();
        // shader, speed, tint per fin
        assert_eq!(batch.len(), 6);
        match &batch[0] {
            Command::ShaderChange(change) => {
                assert_eq!(change.target, DisplayTarget::Left);
                assert_eq!(&*change.source, "// left");
                assert_eq!(change.transition, Duration::from_millis(750));
                assert_eq!(change.scale, 0.5);
                assert_eq!(change.name.as_deref(), Some("stars"));
            }
            other => panic!("expected shader change, got {other:?}"),
        }
        match &batch[2] {
            Command::UniformChange(change) => {
                assert_eq!(change.target, DisplayTarget::Left);
                assert_eq!(change.name, "tint");
                assert_eq!(change.value, UniformValue::Vec3([1.0, 0.0, 0.0]));
            }
            other => panic!("expected uniform change, got {other:?}"),
        }
        match &batch[3] {
            Command::ShaderChange(change) => {
                assert_eq!(change.target, DisplayTarget::Right);
                assert_eq!(&*change.source, "// right");
            }
            other => panic!("expected shader change, got {other:?}"),
        }
        match &batch[5] {
            Command::UniformChange(change) => {
                assert_eq!(change.value, UniformValue::Vec3([0.0, 0.0, 1.0]));
            }
            other => panic!("expected uniform change, got {other:?}"),
        }
    }

    #[test]
    fn explicit_transition_and_scale_win() {
        let mut fx = fixture();
        fx.controller
            .handle_line(
                r#"{"shader": {"display": "right", "name": "stars", "transition_duration": 0, "scale": 2.0}}"#,
            )
            .unwrap();
        let batch = fx.queue.drain();
        assert_eq!(batch.len(), 3);
        match &batch[0] {
            Command::ShaderChange(change) => {
                assert_eq!(change.target, DisplayTarget::Right);
                assert_eq!(change.transition, Duration::ZERO);
                assert_eq!(change.scale, 2.0);
            }
            other => panic!("expected shader change, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_transition_falls_back_to_config() {
        let mut fx = fixture();
        for duration in ["1e300", "-1.0"] {
            let line = format!(
                r#"{{"shader": {{"display": "left", "name": "stars", "transition_duration": {duration}}}}}"#
            );
            assert_eq!(fx.controller.handle_line(&line).unwrap(), Flow::Continue);
            let batch = fx.queue.drain();
            match &batch[0] {
                Command::ShaderChange(change) => {
                    assert_eq!(change.transition, Duration::from_millis(750));
                }
                other => panic!("expected shader change, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_shader_file_submits_nothing() {
        let mut fx = fixture();
        let err = fx
            .controller
            .handle_line(r#"{"shader": {"name": "broken"}}"#)
            .unwrap_err();
        assert!(matches!(err, ControlError::Shader { .. }));
        assert!(fx.queue.drain().is_empty());

        let err = fx
            .controller
            .handle_line(r#"{"shader": {"name": "face"}}"#)
            .unwrap_err();
        assert!(matches!(err, ControlError::NotRenderable(_)));
        let err = fx
            .controller
            .handle_line(r#"{"shader": {"name": "nope"}}"#)
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownAnimation(_)));
    }

    #[test]
    fn uniform_values_accept_arrays_and_strings() {
        let mut fx = fixture();
        fx.controller
            .handle_line(
                r#"{"uniform": {"display": "left", "name": "tint", "type": "vec3", "value": "0.1, 0.2 0.3"}}"#,
            )
            .unwrap();
        fx.controller
            .handle_line(r#"{"uniform": {"name": "count", "type": "int", "value": 3}}"#)
            .unwrap();
        let batch = fx.queue.drain();
        match &batch[0] {
            Command::UniformChange(change) => {
                assert_eq!(change.target, DisplayTarget::Left);
                assert_eq!(change.value, UniformValue::Vec3([0.1, 0.2, 0.3]));
            }
            other => panic!("expected uniform change, got {other:?}"),
        }
        match &batch[1] {
            Command::UniformChange(change) => {
                assert_eq!(change.target, DisplayTarget::Both);
                assert_eq!(change.value, UniformValue::Int(3));
            }
            other => panic!("expected uniform change, got {other:?}"),
        }
    }

    #[test]
    fn malformed_uniforms_are_rejected() {
        let mut fx = fixture();
        let err = fx
            .controller
            .handle_line(r#"{"uniform": {"name": "tint", "type": "vec3", "value": [1, 2]}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Uniform(UniformError::ComponentCount { actual: 2, .. })
        ));
        let err = fx
            .controller
            .handle_line(r#"{"uniform": {"display": "middle", "name": "x", "type": "float", "value": 1}}"#)
            .unwrap_err();
        assert!(matches!(err, ControlError::Uniform(UniformError::UnknownDisplay(_))));
        let err = fx.controller.handle_line("{not json").unwrap_err();
        assert!(matches!(err, ControlError::Json(_)));
        assert!(fx.queue.drain().is_empty());
    }

    #[test]
    fn lifecycle_messages() {
        let mut fx = fixture();
        assert_eq!(fx.controller.handle_line("").unwrap(), Flow::Continue);
        fx.controller.handle_line(r#"{"blank": true}"#).unwrap();
        fx.controller
            .handle_line(r#"{"blur": {"enabled": false}}"#)
            .unwrap();
        assert_eq!(
            fx.controller.handle_line(r#"{"quit": true}"#).unwrap(),
            Flow::Quit
        );
        let batch = fx.queue.drain();
        assert!(matches!(batch[0], Command::SetBlanked(true)));
        match &batch[1] {
            Command::SetBlur(settings) => {
                assert!(!settings.enabled);
                assert_eq!(settings.strength, 8.0);
            }
            other => panic!("expected blur settings, got {other:?}"),
        }
        assert!(matches!(batch[2], Command::Shutdown));
    }

    #[test]
    fn reload_refreshes_catalogue_and_keeps_old_config_on_error() {
        let mut fx = fixture();
        assert_eq!(fx.catalogue.snapshot(), vec!["broken", "stars"]);

        let path = fx.controller.config_path.clone();
        fs::write(
            &path,
            CONFIG.replace("[animations.face]", "[animations.rainbow]\nleft_shader = \"a\"\nright_shader = \"b\"\n\n[animations.face]"),
        )
        .unwrap();
        fx.controller.handle_line(r#"{"reload": true}"#).unwrap();
        assert_eq!(fx.catalogue.snapshot(), vec!["broken", "rainbow", "stars"]);

        fs::write(&path, "default_animation = 5").unwrap();
        assert!(fx.controller.handle_line(r#"{"reload": true}"#).is_err());
        assert!(fx.controller.config.animation("rainbow").is_some());
    }

    #[test]
    fn serve_stops_at_quit() {
        let fx = fixture();
        let input = "{\"blank\": false}\n{\"quit\": true}\n{\"blank\": true}\n";
        fx.controller.serve(input.as_bytes());
        let batch = fx.queue.drain();
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch[1], Command::Shutdown));
    }
}
