use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "finsd",
    author,
    version,
    about = "Renders GPU fragment shaders onto the two fin displays"
)]
pub struct Args {
    /// Configuration file; defaults to `config.toml` in the fins config directory.
    #[arg(long, short, value_name = "PATH", env = "FINS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Animation to show at start-up instead of `default_animation`.
    #[arg(long = "default", value_name = "ANIMATION")]
    pub default_animation: Option<String>,

    /// Frame-rate cap for the render loop; overrides `render.target_fps`.
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f32>,

    /// Keep the output window hidden (useful for headless testing).
    #[arg(long)]
    pub hidden: bool,

    /// Write status snapshots to stdout as JSON lines.
    #[arg(long)]
    pub status_json: bool,

    /// Log filter (e.g. `debug` or `renderer=trace`); `RUST_LOG` wins when set.
    #[arg(long, value_name = "FILTER", default_value = "info")]
    pub log: String,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{value}'"))?;
    if fps.is_finite() && fps >= 1.0 {
        Ok(fps)
    } else {
        Err(format!("frame rate must be at least 1, got {value}"))
    }
}
