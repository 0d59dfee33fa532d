//! Source normalisation for fin shaders.
//!
//! Fin shaders are authored as GLSL ES 3.0 fragment programs (`void main()`
//! reading `v_fragCoord` and writing a single `out vec4`), or as ShaderToy
//! style `mainImage` bodies. naga only accepts Vulkan-flavoured GLSL 450, so
//! every source is rewritten here before it reaches the GPU:
//!
//! 1. `#version` and `precision` lines are blanked (line numbers are kept so
//!    naga diagnostics still point at the author's lines).
//! 2. Engine uniforms are rebound onto the `FinsFrame` block (set 0).
//! 3. `iChannel0` is rebound onto the shared audio texture (set 2).
//! 4. Remaining scalar/vector uniforms are collected into the std140
//!    `FinsParams` block (set 1); [`crate::uniforms::ParamLayout`] packs it.
//! 5. `gl_FragCoord` is remapped to a bottom-left origin.

use std::fmt::Write as _;

use crate::error::CompileError;
use crate::types::UniformKind;

/// Name of the audio-input uniform.
pub const AUDIO_CHANNEL: &str = "iChannel0";

/// How the user program expects to be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// A complete `void main()` writing its own `out vec4`.
    Main,
    /// ShaderToy `mainImage(out vec4, in vec2)`.
    MainImage,
}

/// A custom uniform declared by the shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub kind: UniformKind,
}

/// What the engine needs to know about a shader besides the GPU objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub entry: EntryPoint,
    pub uses_audio: bool,
    /// Custom uniforms in declaration order.
    pub params: Vec<ParamDecl>,
}

impl SourceInfo {
    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name == name)
    }

    pub fn param_kind(&self, name: &str) -> Option<UniformKind> {
        self.params
            .iter()
            .find(|param| param.name == name)
            .map(|param| param.kind)
    }
}

/// Output of [`wrap_fragment`]: GLSL 450 ready for naga plus its metadata.
#[derive(Debug, Clone)]
pub struct WrappedShader {
    pub glsl: String,
    pub info: SourceInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Time,
    TimeDelta,
    Frame,
    Resolution,
    Date,
    SampleRate,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "iTime" => Some(Builtin::Time),
            "iTimeDelta" => Some(Builtin::TimeDelta),
            "iFrame" | "frame" => Some(Builtin::Frame),
            "iResolution" => Some(Builtin::Resolution),
            "iDate" => Some(Builtin::Date),
            "iSampleRate" => Some(Builtin::SampleRate),
            _ => None,
        }
    }

    /// GLSL expression reading the value as `kind`.
    fn expression(self, kind: UniformKind) -> &'static str {
        match (self, kind) {
            (Builtin::Time, _) => "fins_frame.time",
            (Builtin::TimeDelta, _) => "fins_frame.time_delta",
            (Builtin::Frame, UniformKind::Float) => "float(fins_frame.frame)",
            (Builtin::Frame, _) => "fins_frame.frame",
            (Builtin::Resolution, UniformKind::Vec2) => "fins_frame.resolution.xy",
            (Builtin::Resolution, _) => "fins_frame.resolution.xyz",
            (Builtin::Date, _) => "fins_frame.date",
            (Builtin::SampleRate, _) => "fins_frame.sample_rate",
        }
    }
}

const SHADERTOY_IMPLICIT: [(&str, Builtin, UniformKind); 6] = [
    ("iTime", Builtin::Time, UniformKind::Float),
    ("iTimeDelta", Builtin::TimeDelta, UniformKind::Float),
    ("iFrame", Builtin::Frame, UniformKind::Int),
    ("iResolution", Builtin::Resolution, UniformKind::Vec3),
    ("iDate", Builtin::Date, UniformKind::Vec4),
    ("iSampleRate", Builtin::SampleRate, UniformKind::Float),
];

/// Engine uniform block shared by the fin vertex and fragment stages.
///
/// Must match [`crate::uniforms::FrameUniforms`].
const FRAME_BLOCK: &str = r"layout(std140, set = 0, binding = 0) uniform FinsFrame {
    vec4 resolution;
    float time;
    float time_delta;
    int frame;
    float sample_rate;
    vec4 date;
} fins_frame;
";

const AUDIO_BINDINGS: &str = r"layout(set = 2, binding = 0) uniform texture2D fins_audio_texture;
layout(set = 2, binding = 1) uniform sampler fins_audio_sampler;
";

/// Rewrites fin shader source into GLSL 450 for naga.
pub fn wrap_fragment(source: &str) -> Result<WrappedShader, CompileError> {
    let entry = detect_entry(source)?;
    let mut body = String::with_capacity(source.len() + 256);
    let mut builtins: Vec<(String, Builtin, UniformKind)> = Vec::new();
    let mut params: Vec<ParamDecl> = Vec::new();
    let mut audio_declared = false;

    for (index, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            body.push('\n');
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("uniform ") {
            let (kind_token, names) = parse_uniform_decl(rest).ok_or_else(|| {
                CompileError::Parse(format!(
                    "line {}: unsupported uniform declaration '{}'",
                    index + 1,
                    trimmed
                ))
            })?;
            for name in names {
                if name == AUDIO_CHANNEL {
                    if kind_token != "sampler2D" {
                        return Err(CompileError::Parse(format!(
                            "line {}: {AUDIO_CHANNEL} must be a sampler2D",
                            index + 1
                        )));
                    }
                    audio_declared = true;
                    continue;
                }
                let kind = UniformKind::from_glsl(kind_token).ok_or_else(|| {
                    CompileError::Parse(format!(
                        "line {}: uniform '{name}' has unsupported type '{kind_token}'",
                        index + 1
                    ))
                })?;
                if let Some(builtin) = Builtin::lookup(&name) {
                    builtins.push((name, builtin, kind));
                } else if !params.iter().any(|param| param.name == name) {
                    params.push(ParamDecl { name, kind });
                }
            }
            body.push('\n');
            continue;
        }
        if let Some(located) = locate_interface(trimmed) {
            body.push_str(&located);
            body.push('\n');
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }

    let uses_audio = audio_declared || (entry == EntryPoint::MainImage && mentions(source, AUDIO_CHANNEL));
    if entry == EntryPoint::MainImage {
        for (name, builtin, kind) in SHADERTOY_IMPLICIT {
            if !builtins.iter().any(|(declared, _, _)| declared == name) {
                builtins.push((name.to_string(), builtin, kind));
            }
        }
    }

    let mut glsl = String::with_capacity(body.len() + 2048);
    glsl.push_str("#version 450\n");
    glsl.push_str(FRAME_BLOCK);
    glsl.push_str(&params_block(&params));
    glsl.push_str(AUDIO_BINDINGS);
    for (name, builtin, kind) in &builtins {
        let _ = writeln!(glsl, "#define {name} {}", builtin.expression(*kind));
    }
    for param in &params {
        let _ = writeln!(glsl, "#define {0} fins_params.fins_p_{0}", param.name);
    }
    if uses_audio {
        let _ = writeln!(
            glsl,
            "#define {AUDIO_CHANNEL} sampler2D(fins_audio_texture, fins_audio_sampler)"
        );
    }
    glsl.push_str("vec4 fins_frag_coord;\n#define gl_FragCoord fins_frag_coord\n");
    match entry {
        EntryPoint::Main => glsl.push_str("#define main fins_user_main\n"),
        EntryPoint::MainImage => glsl.push_str("layout(location = 0) out vec4 fins_out_color;\n"),
    }
    glsl.push_str("#line 1\n");
    glsl.push_str(&body);
    glsl.push_str(match entry {
        EntryPoint::Main => FOOTER_MAIN,
        EntryPoint::MainImage => FOOTER_MAIN_IMAGE,
    });

    Ok(WrappedShader {
        glsl,
        info: SourceInfo {
            entry,
            uses_audio,
            params,
        },
    })
}

/// Scans the source without rewriting it.
pub fn inspect(source: &str) -> Result<SourceInfo, CompileError> {
    wrap_fragment(source).map(|wrapped| wrapped.info)
}

fn detect_entry(source: &str) -> Result<EntryPoint, CompileError> {
    let tokens: Vec<&str> = identifiers(source).collect();
    let defines = |name: &str| {
        tokens
            .windows(2)
            .any(|pair| pair[0] == "void" && pair[1] == name)
    };
    if defines("main") {
        Ok(EntryPoint::Main)
    } else if defines("mainImage") {
        Ok(EntryPoint::MainImage)
    } else {
        Err(CompileError::Parse(
            "shader defines neither main() nor mainImage()".to_string(),
        ))
    }
}

fn identifiers(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
}

fn mentions(source: &str, name: &str) -> bool {
    identifiers(source).any(|token| token == name)
}

/// Splits `[precision] type name[, name];` into the type and names.
fn parse_uniform_decl(rest: &str) -> Option<(&str, Vec<String>)> {
    let decl = rest.split(';').next()?.trim();
    let mut parts = decl.splitn(2, char::is_whitespace);
    let mut kind = parts.next()?;
    let mut names = parts.next()?.trim();
    if matches!(kind, "lowp" | "mediump" | "highp") {
        let mut rest = names.splitn(2, char::is_whitespace);
        kind = rest.next()?;
        names = rest.next()?.trim();
    }
    let names: Vec<String> = names
        .split(',')
        .map(|name| name.trim().to_string())
        .collect();
    let valid = names.iter().all(|name| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    valid.then_some((kind, names))
}

/// Adds `location = 0` to a global `in`/`out` declaration that lacks one.
fn locate_interface(trimmed: &str) -> Option<String> {
    let is_interface = trimmed.starts_with("in ") || trimmed.starts_with("out ");
    let is_declaration =
        trimmed.trim_end().ends_with(';') && !trimmed.contains('(') && !trimmed.contains(')');
    (is_interface && is_declaration).then(|| format!("layout(location = 0) {trimmed}"))
}

fn params_block(params: &[ParamDecl]) -> String {
    let mut block =
        String::from("layout(std140, set = 1, binding = 0) uniform FinsParams {\n");
    if params.is_empty() {
        block.push_str("    float fins_p_unused;\n");
    }
    for param in params {
        let _ = writeln!(block, "    {} fins_p_{};", param.kind.as_str(), param.name);
    }
    block.push_str("} fins_params;\n");
    block
}

const FOOTER_MAIN: &str = r"
#undef main
void main() {
#undef gl_FragCoord
    fins_frag_coord = vec4(gl_FragCoord.x, fins_frame.resolution.y - gl_FragCoord.y, gl_FragCoord.z, gl_FragCoord.w);
#define gl_FragCoord fins_frag_coord
    fins_user_main();
}
";

const FOOTER_MAIN_IMAGE: &str = r"
void main() {
#undef gl_FragCoord
    fins_frag_coord = vec4(gl_FragCoord.x, fins_frame.resolution.y - gl_FragCoord.y, gl_FragCoord.z, gl_FragCoord.w);
#define gl_FragCoord fins_frag_coord
    vec4 color = vec4(0.0, 0.0, 0.0, 1.0);
    mainImage(color, fins_frag_coord.xy);
    fins_out_color = color;
}
";

/// Full-screen triangle feeding `v_fragCoord` (pixels, bottom-left origin).
pub(crate) const FIN_VERTEX_GLSL: &str = r"#version 450
layout(std140, set = 0, binding = 0) uniform FinsFrame {
    vec4 resolution;
    float time;
    float time_delta;
    int frame;
    float sample_rate;
    vec4 date;
} fins_frame;

layout(location = 0) out vec2 v_fragCoord;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -1.0),
    vec2(3.0, -1.0),
    vec2(-1.0, 3.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_fragCoord = (pos * 0.5 + vec2(0.5)) * fins_frame.resolution.xy;
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Full-screen triangle for the compositor; `v_uv` addresses texture rows top-down.
pub(crate) const COMPOSITE_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -1.0),
    vec2(3.0, -1.0),
    vec2(-1.0, 3.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Crossfade with a 9-tap (1 2 1 / 2 4 2 / 1 2 1) blur on both inputs.
///
/// Must match [`crate::uniforms::BlendUniforms`].
pub(crate) const COMPOSITE_FRAGMENT_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform texture2D current_texture;
layout(set = 0, binding = 1) uniform texture2D target_texture;
layout(set = 0, binding = 2) uniform sampler blend_sampler;
layout(std140, set = 0, binding = 3) uniform Blend {
    vec2 texel;
    float mix_amount;
    float blur;
} blend;

vec4 sample_current(vec2 uv) {
    if (blend.blur <= 0.0) {
        return texture(sampler2D(current_texture, blend_sampler), uv);
    }
    vec4 sum = vec4(0.0);
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            float weight = (2.0 - abs(float(x))) * (2.0 - abs(float(y)));
            vec2 offset = vec2(float(x), float(y)) * blend.texel * blend.blur;
            sum += texture(sampler2D(current_texture, blend_sampler), uv + offset) * weight;
        }
    }
    return sum / 16.0;
}

vec4 sample_target(vec2 uv) {
    if (blend.blur <= 0.0) {
        return texture(sampler2D(target_texture, blend_sampler), uv);
    }
    vec4 sum = vec4(0.0);
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            float weight = (2.0 - abs(float(x))) * (2.0 - abs(float(y)));
            vec2 offset = vec2(float(x), float(y)) * blend.texel * blend.blur;
            sum += texture(sampler2D(target_texture, blend_sampler), uv + offset) * weight;
        }
    }
    return sum / 16.0;
}

void main() {
    vec4 current = sample_current(v_uv);
    if (blend.mix_amount <= 0.0) {
        out_color = vec4(current.rgb, 1.0);
        return;
    }
    vec4 target = sample_target(v_uv);
    out_color = vec4(mix(current.rgb, target.rgb, blend.mix_amount), 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const FIN_SHADER: &str = r"#version 300 es
precision highp float;
uniform float iTime;
uniform vec2 iResolution;
uniform int frame;
uniform float speed;
uniform highp vec3 tint, glow;
in vec2 v_fragCoord;
out vec4 fragColor;

void main() {
    vec2 uv = v_fragCoord / iResolution;
    fragColor = vec4(tint * uv.x * speed + glow, 1.0) * sin(iTime + float(frame));
}
";

    #[test]
    fn fin_shader_is_rebound() {
        let wrapped = wrap_fragment(FIN_SHADER).unwrap();
        assert_eq!(wrapped.info.entry, EntryPoint::Main);
        assert!(!wrapped.info.uses_audio);
        let names: Vec<_> = wrapped.info.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["speed", "tint", "glow"]);
        assert_eq!(wrapped.info.param_kind("tint"), Some(UniformKind::Vec3));

        let glsl = &wrapped.glsl;
        assert!(glsl.starts_with("#version 450\n"));
        assert_eq!(glsl.matches("#version").count(), 1);
        assert!(!glsl.contains("precision highp"));
        assert!(!glsl.contains("uniform float iTime"));
        assert!(glsl.contains("#define iResolution fins_frame.resolution.xy"));
        assert!(glsl.contains("#define frame fins_frame.frame"));
        assert!(glsl.contains("#define speed fins_params.fins_p_speed"));
        assert!(glsl.contains("    vec3 fins_p_glow;"));
        assert!(glsl.contains("layout(location = 0) in vec2 v_fragCoord;"));
        assert!(glsl.contains("layout(location = 0) out vec4 fragColor;"));
        assert!(glsl.contains("#define main fins_user_main"));
        assert!(glsl.contains("fins_user_main();"));
    }

    #[test]
    fn wrapping_keeps_author_line_numbers() {
        let wrapped = wrap_fragment(FIN_SHADER).unwrap();
        let body = wrapped.glsl.split("#line 1\n").nth(1).unwrap();
        let body_lines: Vec<_> = body.lines().collect();
        let source_lines: Vec<_> = FIN_SHADER.lines().collect();
        assert_eq!(body_lines[10], source_lines[10]);
    }

    #[test]
    fn audio_channel_is_detected() {
        let source = r"#version 300 es
precision highp float;
uniform sampler2D iChannel0;
in vec2 v_fragCoord;
out vec4 fragColor;
void main() {
    fragColor = vec4(texture(iChannel0, vec2(0.1, 0.25)).r);
}
";
        let wrapped = wrap_fragment(source).unwrap();
        assert!(wrapped.info.uses_audio);
        assert!(wrapped.info.params.is_empty());
        assert!(wrapped.glsl.contains("fins_p_unused"));
        assert!(wrapped
            .glsl
            .contains("#define iChannel0 sampler2D(fins_audio_texture, fins_audio_sampler)"));
    }

    #[test]
    fn shadertoy_entry_gets_implicit_builtins() {
        let source = r"void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    fragColor = vec4(fragCoord / iResolution.xy, 0.5 + 0.5 * sin(iTime), 1.0);
}
";
        let wrapped = wrap_fragment(source).unwrap();
        assert_eq!(wrapped.info.entry, EntryPoint::MainImage);
        assert!(wrapped.glsl.contains("#define iResolution fins_frame.resolution.xyz"));
        assert!(wrapped.glsl.contains("layout(location = 0) out vec4 fins_out_color;"));
        assert!(wrapped.glsl.contains("mainImage(color, fins_frag_coord.xy);"));
        assert!(!wrapped.glsl.contains("#define main "));
    }

    #[test]
    fn unsupported_sources_are_rejected() {
        assert!(matches!(
            wrap_fragment("float helper() { return 1.0; }"),
            Err(CompileError::Parse(_))
        ));
        let arrays = "uniform float weights[4];\nvoid main() {}\n";
        assert!(matches!(wrap_fragment(arrays), Err(CompileError::Parse(_))));
        let matrix = "uniform mat4 view;\nvoid main() {}\n";
        assert!(matches!(wrap_fragment(matrix), Err(CompileError::Parse(_))));
    }
}
