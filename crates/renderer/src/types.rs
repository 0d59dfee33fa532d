use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::UniformError;

/// One of the two physical fin displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayId {
    Left,
    Right,
}

impl DisplayId {
    /// Both displays in render order.
    pub const ALL: [DisplayId; 2] = [DisplayId::Left, DisplayId::Right];

    pub fn index(self) -> usize {
        match self {
            DisplayId::Left => 0,
            DisplayId::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisplayId::Left => "left",
            DisplayId::Right => "right",
        }
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressing used by inbound commands; `Both` fans out left then right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayTarget {
    Left,
    Right,
    Both,
}

impl DisplayTarget {
    pub fn displays(self) -> &'static [DisplayId] {
        match self {
            DisplayTarget::Left => &[DisplayId::Left],
            DisplayTarget::Right => &[DisplayId::Right],
            DisplayTarget::Both => &DisplayId::ALL,
        }
    }
}

impl From<DisplayId> for DisplayTarget {
    fn from(value: DisplayId) -> Self {
        match value {
            DisplayId::Left => DisplayTarget::Left,
            DisplayId::Right => DisplayTarget::Right,
        }
    }
}

impl FromStr for DisplayTarget {
    type Err = UniformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(DisplayTarget::Left),
            "right" => Ok(DisplayTarget::Right),
            "both" => Ok(DisplayTarget::Both),
            other => Err(UniformError::UnknownDisplay(other.to_string())),
        }
    }
}

/// GLSL types accepted for custom uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
}

impl UniformKind {
    /// Number of scalar components.
    pub fn components(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 1,
            UniformKind::Vec2 => 2,
            UniformKind::Vec3 => 3,
            UniformKind::Vec4 => 4,
        }
    }

    /// Parses the GLSL spelling used in uniform declarations.
    pub fn from_glsl(token: &str) -> Option<Self> {
        match token {
            "float" => Some(UniformKind::Float),
            "int" => Some(UniformKind::Int),
            "vec2" => Some(UniformKind::Vec2),
            "vec3" => Some(UniformKind::Vec3),
            "vec4" => Some(UniformKind::Vec4),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UniformKind::Float => "float",
            UniformKind::Int => "int",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UniformKind {
    type Err = UniformError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        UniformKind::from_glsl(value.trim())
            .ok_or_else(|| UniformError::UnknownType(value.to_string()))
    }
}

/// A custom uniform value as carried by commands and stored per display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
        }
    }

    /// Builds a value of `kind` from raw scalar components.
    ///
    /// Scalars accept exactly one component; ints are truncated toward zero.
    pub fn from_components(kind: UniformKind, components: &[f32]) -> Result<Self, UniformError> {
        if components.len() != kind.components() {
            return Err(UniformError::ComponentCount {
                kind,
                expected: kind.components(),
                actual: components.len(),
            });
        }
        Ok(match kind {
            UniformKind::Float => UniformValue::Float(components[0]),
            UniformKind::Int => UniformValue::Int(components[0] as i32),
            UniformKind::Vec2 => UniformValue::Vec2([components[0], components[1]]),
            UniformKind::Vec3 => UniformValue::Vec3([components[0], components[1], components[2]]),
            UniformKind::Vec4 => UniformValue::Vec4([
                components[0],
                components[1],
                components[2],
                components[3],
            ]),
        })
    }

    /// Converts to the declared `kind` where that is lossless enough to be useful.
    ///
    /// Float and int convert into each other; vectors must match exactly.
    pub fn coerce(self, kind: UniformKind) -> Option<Self> {
        match (self, kind) {
            (value, kind) if value.kind() == kind => Some(value),
            (UniformValue::Int(v), UniformKind::Float) => Some(UniformValue::Float(v as f32)),
            (UniformValue::Float(v), UniformKind::Int) => Some(UniformValue::Int(v as i32)),
            _ => None,
        }
    }
}

/// Pixel dimensions of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Applies a render-scale multiplier, never collapsing below one pixel.
    pub fn scaled(self, scale: f32) -> Self {
        Self::new(
            (self.width as f32 * scale) as u32,
            (self.height as f32 * scale) as u32,
        )
    }
}

impl fmt::Display for RenderSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Physical layout of the two fins inside the shared output window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Native width of one fin in pixels.
    pub width: u32,
    /// Native height of one fin in pixels.
    pub height: u32,
    /// Desktop x position of the left fin.
    pub left_x: i32,
    /// Desktop x position of the right fin.
    pub right_x: i32,
    /// Desktop y position shared by both fins.
    pub y: i32,
}

impl DisplayGeometry {
    pub fn base_size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }

    /// Size of the borderless window spanning both fins.
    pub fn window_size(&self) -> RenderSize {
        let span = (self.right_x - self.left_x).max(0) as u32 + self.width;
        RenderSize::new(span, self.height)
    }

    /// Left edge of a fin's viewport inside the window.
    pub fn viewport_x(&self, display: DisplayId) -> u32 {
        match display {
            DisplayId::Left => 0,
            DisplayId::Right => (self.right_x - self.left_x).max(0) as u32,
        }
    }
}

impl Default for DisplayGeometry {
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

/// Transition blur applied on top of the crossfade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurSettings {
    pub enabled: bool,
    /// Peak kernel spread in texels, reached at the transition midpoint.
    pub strength: f32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 8.0,
        }
    }
}

/// Easing applied to the raw transition progress before blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossfadeCurve {
    Linear,
    #[default]
    Smoothstep,
    EaseInOut,
}

impl FromStr for CrossfadeCurve {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(CrossfadeCurve::Linear),
            "smoothstep" => Ok(CrossfadeCurve::Smoothstep),
            "ease-in-out" | "easeinout" | "ease_in_out" => Ok(CrossfadeCurve::EaseInOut),
            other => Err(format!(
                "unknown easing '{other}'; expected linear, smoothstep, or ease-in-out"
            )),
        }
    }
}

/// Start-up configuration for the render engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub geometry: DisplayGeometry,
    /// Initial render scale for both fins.
    pub initial_scale: f32,
    pub blur: BlurSettings,
    pub curve: CrossfadeCurve,
    /// Frame-rate cap for the render loop.
    pub target_fps: f32,
    /// Frames a display stays in the scale-changing state after a resize.
    pub scale_settle_frames: u32,
    /// Interval between performance status reports; `None` disables them.
    pub fps_publish_interval: Option<Duration>,
    /// Number of FPS samples averaged for reporting.
    pub fps_smoothing_frames: usize,
    /// Whether the output window should be shown (hidden windows still render).
    pub show_window: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            geometry: DisplayGeometry::default(),
            initial_scale: 1.0,
            blur: BlurSettings::default(),
            curve: CrossfadeCurve::default(),
            target_fps: 60.0,
            scale_settle_frames: 5,
            fps_publish_interval: Some(Duration::from_secs(1)),
            fps_smoothing_frames: 3,
            show_window: true,
        }
    }
}
