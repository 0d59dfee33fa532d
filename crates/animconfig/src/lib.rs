use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinsConfig {
    #[serde(default = "default_animation")]
    pub default_animation: String,
    /// Directory shader paths are resolved against; relative to the config file.
    #[serde(default)]
    pub shader_dir: Option<PathBuf>,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub transitions: TransitionSection,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
    #[serde(default)]
    pub animations: BTreeMap<String, Animation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplaySection {
    pub width: u32,
    pub height: u32,
    pub left_x: i32,
    pub right_x: i32,
    pub y: i32,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            width: 720,
            height: 720,
            left_x: 0,
            right_x: 720,
            y: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    Linear,
    #[default]
    Smoothstep,
    EaseInOut,
}

impl Easing {
    pub fn as_str(self) -> &'static str {
        match self {
            Easing::Linear => "linear",
            Easing::Smoothstep => "smoothstep",
            Easing::EaseInOut => "ease-in-out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BlurSection {
    pub enabled: bool,
    pub strength: f32,
}

impl Default for BlurSection {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransitionSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(
        default = "default_transition",
        deserialize_with = "deserialize_duration"
    )]
    pub duration: Duration,
    #[serde(default)]
    pub easing: Easing,
    #[serde(default)]
    pub blur: BlurSection,
}

impl Default for TransitionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: default_transition(),
            easing: Easing::default(),
            blur: BlurSection::default(),
        }
    }
}

impl TransitionSection {
    /// Crossfade length to use when a request does not name one.
    pub fn effective_duration(&self) -> Duration {
        if self.enabled {
            self.duration
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderSection {
    pub target_fps: f32,
    pub scale_settle_frames: u32,
    /// Render scale used before any animation sets one.
    pub initial_scale: f32,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            scale_settle_frames: 5,
            initial_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(
        default = "default_fps_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub fps_publish_interval: Duration,
    #[serde(default = "default_smoothing")]
    pub fps_smoothing_frames: usize,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fps_publish_interval: default_fps_interval(),
            fps_smoothing_frames: default_smoothing(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationKind {
    /// Full-screen shader pair driven by the fins renderer.
    #[default]
    Base,
    /// Drawn by a separate overlay process; carries no shaders here.
    Overlay,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Animation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: AnimationKind,
    #[serde(default)]
    pub left_shader: Option<String>,
    #[serde(default)]
    pub right_shader: Option<String>,
    #[serde(default)]
    pub render_scale: Option<f32>,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl Animation {
    pub fn shader(&self, side: Side) -> Option<&str> {
        match side {
            Side::Left => self.left_shader.as_deref(),
            Side::Right => self.right_shader.as_deref(),
        }
    }

    /// Human-facing label, falling back to the animation id.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        if self.name.trim().is_empty() {
            id
        } else {
            &self.name
        }
    }

    /// Default value of each uniform for one fin.
    pub fn default_uniforms(&self, side: Side) -> Vec<(&str, UniformType, Vec<f32>)> {
        self.uniforms
            .iter()
            .filter_map(|(name, setting)| {
                setting
                    .value_for(side)
                    .map(|value| (name.as_str(), setting.kind, value.components()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformType {
    #[default]
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformType {
    pub fn components(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int => 1,
            UniformType::Vec2 => 2,
            UniformType::Vec3 => 3,
            UniformType::Vec4 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UniformType::Float => "float",
            UniformType::Int => "int",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
        }
    }
}

/// A scalar or vector literal as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UniformLiteral {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl UniformLiteral {
    pub fn components(&self) -> Vec<f32> {
        match self {
            UniformLiteral::Scalar(value) => vec![*value as f32],
            UniformLiteral::Vector(values) => values.iter().map(|v| *v as f32).collect(),
        }
    }
}

/// Default for one custom uniform, shared by both fins or set per fin.
///
/// `left`/`right` override `value` for their fin. `min`, `max`, and `step`
/// describe the control range for front ends and are not enforced on input.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UniformSetting {
    #[serde(default, rename = "type")]
    pub kind: UniformType,
    #[serde(default)]
    pub value: Option<UniformLiteral>,
    #[serde(default)]
    pub left: Option<UniformLiteral>,
    #[serde(default)]
    pub right: Option<UniformLiteral>,
    #[serde(default)]
    pub min: Option<f32>,
    #[serde(default)]
    pub max: Option<f32>,
    #[serde(default)]
    pub step: Option<f32>,
}

impl UniformSetting {
    pub fn value_for(&self, side: Side) -> Option<&UniformLiteral> {
        let specific = match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        };
        specific.or(self.value.as_ref())
    }

    fn validate(&self, animation: &str, name: &str) -> Result<(), ConfigError> {
        if self.value.is_none() && self.left.is_none() && self.right.is_none() {
            return Err(ConfigError::Invalid(format!(
                "animation '{animation}' uniform '{name}' needs a value, or left/right values"
            )));
        }
        for literal in [&self.value, &self.left, &self.right].into_iter().flatten() {
            let count = literal.components().len();
            if count != self.kind.components() {
                return Err(ConfigError::Invalid(format!(
                    "animation '{animation}' uniform '{name}' is {} but has {count} component(s)",
                    self.kind.as_str()
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "animation '{animation}' uniform '{name}' has min > max"
                )));
            }
        }
        if matches!(self.step, Some(step) if step <= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "animation '{animation}' uniform '{name}' step must be > 0"
            )));
        }
        Ok(())
    }
}

fn default_animation() -> String {
    "stars".to_string()
}

fn default_true() -> bool {
    true
}

fn default_transition() -> Duration {
    Duration::from_millis(750)
}

fn default_fps_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_smoothing() -> usize {
    3
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for FinsConfig {
    fn default() -> Self {
        Self {
            default_animation: default_animation(),
            shader_dir: None,
            display: DisplaySection::default(),
            transitions: TransitionSection::default(),
            render: RenderSection::default(),
            monitoring: MonitoringSection::default(),
            animations: BTreeMap::new(),
        }
    }
}

impl FinsConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: FinsConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn animation(&self, id: &str) -> Option<&Animation> {
        self.animations.get(id)
    }

    /// Ids of the animations the renderer can show, in id order.
    pub fn base_animations(&self) -> impl Iterator<Item = &str> {
        self.animations
            .iter()
            .filter(|(_, animation)| animation.kind == AnimationKind::Base)
            .map(|(id, _)| id.as_str())
    }

    /// Resolves a shader reference from an animation.
    ///
    /// Absolute paths are used as-is; relative ones are joined onto
    /// `shader_dir`, which is itself relative to `config_dir`.
    pub fn shader_path(&self, config_dir: &Path, shader: &str) -> PathBuf {
        let shader = Path::new(shader);
        if shader.is_absolute() {
            return shader.to_path_buf();
        }
        match &self.shader_dir {
            Some(dir) if dir.is_absolute() => dir.join(shader),
            Some(dir) => config_dir.join(dir).join(shader),
            None => config_dir.join(shader),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.animations.is_empty() {
            return Err(ConfigError::Invalid(
                "config must define at least one animation".into(),
            ));
        }

        match self.animations.get(&self.default_animation) {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "default_animation references unknown animation '{}'",
                    self.default_animation
                )));
            }
            Some(animation) if animation.kind != AnimationKind::Base => {
                return Err(ConfigError::Invalid(format!(
                    "default_animation '{}' must be a base animation",
                    self.default_animation
                )));
            }
            Some(_) => {}
        }

        let display = &self.display;
        if display.width == 0 || display.height == 0 {
            return Err(ConfigError::Invalid(
                "display width and height must be > 0".into(),
            ));
        }
        if display.right_x < display.left_x {
            return Err(ConfigError::Invalid(
                "display.right_x must not be left of display.left_x".into(),
            ));
        }

        if self.transitions.blur.strength < 0.0 || !self.transitions.blur.strength.is_finite() {
            return Err(ConfigError::Invalid(
                "transitions.blur.strength must be >= 0".into(),
            ));
        }

        if !(self.render.target_fps.is_finite() && self.render.target_fps >= 1.0) {
            return Err(ConfigError::Invalid(
                "render.target_fps must be at least 1".into(),
            ));
        }
        validate_scale("render.initial_scale", self.render.initial_scale)?;

        if self.monitoring.enabled && self.monitoring.fps_publish_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "monitoring.fps_publish_interval must be greater than zero".into(),
            ));
        }

        for (id, animation) in &self.animations {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("animation id may not be empty".into()));
            }
            if animation.kind == AnimationKind::Base {
                for side in Side::BOTH {
                    match animation.shader(side) {
                        Some(shader) if !shader.trim().is_empty() => {}
                        _ => {
                            return Err(ConfigError::Invalid(format!(
                                "base animation '{id}' is missing {}_shader",
                                side.as_str()
                            )));
                        }
                    }
                }
            }
            if let Some(scale) = animation.render_scale {
                validate_scale(&format!("animation '{id}' render_scale"), scale)?;
            }
            for (name, setting) in &animation.uniforms {
                setting.validate(id, name)?;
            }
        }

        Ok(())
    }
}

fn validate_scale(what: &str, scale: f32) -> Result<(), ConfigError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{what} must be > 0")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
default_animation = "stars"
shader_dir = "shaders"

[display]
width = 720
height = 720
left_x = 0
right_x = 720

[transitions]
duration = "500ms"
easing = "ease-in-out"

[transitions.blur]
enabled = false

[monitoring]
fps_publish_interval = 2

[animations.stars]
name = "Starfield"
emoji = "*"
left_shader = "stars_left.frag"
right_shader = "stars_right.frag"
render_scale = 0.5

[animations.stars.uniforms.speed]
type = "float"
value = 1
min = 0.0
max = 4.0
step = 0.1

[animations.stars.uniforms.tint]
type = "vec3"
left = [1.0, 0.2, 0.2]
right = [0.2, 0.2, 1.0]

[animations.face]
type = "overlay"
"#;

    #[test]
    fn parses_sample_config() {
        let config = FinsConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.default_animation, "stars");
        assert_eq!(config.transitions.duration, Duration::from_millis(500));
        assert_eq!(config.transitions.easing, Easing::EaseInOut);
        assert!(!config.transitions.blur.enabled);
        assert_eq!(config.transitions.blur.strength, 8.0);
        assert_eq!(config.monitoring.fps_publish_interval, Duration::from_secs(2));
        assert_eq!(config.render.target_fps, 60.0);
        assert_eq!(config.base_animations().collect::<Vec<_>>(), vec!["stars"]);

        let stars = config.animation("stars").unwrap();
        assert_eq!(stars.label("stars"), "Starfield");
        assert_eq!(stars.shader(Side::Right), Some("stars_right.frag"));
        assert_eq!(stars.render_scale, Some(0.5));
        assert_eq!(config.animation("face").unwrap().kind, AnimationKind::Overlay);
    }

    #[test]
    fn per_display_uniforms_override_shared_value() {
        let config = FinsConfig::from_toml_str(SAMPLE).unwrap();
        let stars = config.animation("stars").unwrap();
        let left = stars.default_uniforms(Side::Left);
        assert_eq!(
            left,
            vec![
                ("speed", UniformType::Float, vec![1.0]),
                ("tint", UniformType::Vec3, vec![1.0, 0.2, 0.2]),
            ]
        );
        let right = stars.default_uniforms(Side::Right);
        assert_eq!(right[1].2, vec![0.2, 0.2, 1.0]);
    }

    #[test]
    fn rejects_unknown_default_animation() {
        let config = r#"
default_animation = "missing"

[animations.stars]
left_shader = "a.frag"
right_shader = "b.frag"
"#;
        let err = FinsConfig::from_toml_str(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn base_animation_requires_both_shaders() {
        let config = r#"
[animations.stars]
left_shader = "a.frag"
"#;
        let err = FinsConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("right_shader"), "{err}");
    }

    #[test]
    fn rejects_sub_hertz_frame_rate() {
        let config = r#"
[render]
target_fps = 0.5

[animations.stars]
left_shader = "a.frag"
right_shader = "b.frag"
"#;
        let err = FinsConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("target_fps"), "{err}");
    }

    #[test]
    fn rejects_uniform_with_wrong_component_count() {
        let config = r#"
[animations.stars]
left_shader = "a.frag"
right_shader = "b.frag"

[animations.stars.uniforms.tint]
type = "vec3"
value = [1.0, 0.0]
"#;
        let err = FinsConfig::from_toml_str(config).unwrap_err();
        assert!(err.to_string().contains("2 component"), "{err}");
    }

    #[test]
    fn disabled_transitions_cut_immediately() {
        let config = FinsConfig::from_toml_str(
            r#"
[transitions]
enabled = false
duration = 2.5

[animations.stars]
left_shader = "a.frag"
right_shader = "b.frag"
"#,
        )
        .unwrap();
        assert_eq!(config.transitions.duration, Duration::from_secs_f64(2.5));
        assert_eq!(config.transitions.effective_duration(), Duration::ZERO);
    }

    #[test]
    fn resolves_shader_paths_against_config_dir() {
        let config = FinsConfig::from_toml_str(SAMPLE).unwrap();
        let dir = Path::new("/etc/fins");
        assert_eq!(
            config.shader_path(dir, "stars_left.frag"),
            PathBuf::from("/etc/fins/shaders/stars_left.frag")
        );
        assert_eq!(
            config.shader_path(dir, "/opt/x.frag"),
            PathBuf::from("/opt/x.frag")
        );
    }

    #[test]
    fn bundled_config_is_valid() {
        let config = FinsConfig::from_toml_str(include_str!("../../../assets/config.toml"))
            .expect("bundled config");
        assert_eq!(
            config.base_animations().collect::<Vec<_>>(),
            vec!["pulse", "rainbow", "stars"]
        );
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = FinsConfig::load(file.path()).unwrap();
        assert_eq!(config.animations.len(), 2);

        let missing = FinsConfig::load(Path::new("/nonexistent/fins.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
