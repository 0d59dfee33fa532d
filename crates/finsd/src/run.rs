use std::io;
use std::thread;

use animconfig::{Easing, FinsConfig};
use anyhow::{anyhow, Context, Result};
use renderer::{
    CrossfadeCurve, DisplayGeometry, DisplayTarget, RendererConfig, SilentAudio, WindowRuntime,
};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::control::{blur_settings, Controller};
use crate::paths::AppPaths;
use crate::status::{Catalogue, StatusReporter};

pub fn run(args: Args) -> Result<()> {
    initialise_tracing(&args.log);

    let paths = AppPaths::discover()?;
    let config_path = paths.config_file(args.config.as_deref())?;
    let config = FinsConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    tracing::debug!(
        config = %config_path.display(),
        animations = config.animations.len(),
        "loaded fins configuration"
    );

    let startup = args
        .default_animation
        .clone()
        .unwrap_or_else(|| config.default_animation.clone());
    if config.animation(&startup).is_none() {
        return Err(anyhow!("start-up animation '{startup}' is not configured"));
    }

    let renderer_config = renderer_config(&config, &args);
    let catalogue = Catalogue::default();
    let reporter = StatusReporter::new(catalogue.clone(), args.status_json);
    let runtime = WindowRuntime::spawn(renderer_config, SilentAudio, reporter)?;

    let controller = Controller::new(config, config_path, runtime.commands(), catalogue);
    // Start-up animation cuts in without a crossfade.
    controller
        .load_animation(
            DisplayTarget::Both,
            &startup,
            Some(std::time::Duration::ZERO),
            None,
        )
        .with_context(|| format!("failed to load start-up animation '{startup}'"))?;
    tracing::info!(animation = %startup, "fins daemon running");

    thread::Builder::new()
        .name("fins-control".into())
        .spawn(move || controller.serve(io::stdin().lock()))
        .context("failed to spawn control thread")?;

    runtime.wait()
}

fn initialise_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn curve_for(easing: Easing) -> CrossfadeCurve {
    match easing {
        Easing::Linear => CrossfadeCurve::Linear,
        Easing::Smoothstep => CrossfadeCurve::Smoothstep,
        Easing::EaseInOut => CrossfadeCurve::EaseInOut,
    }
}

pub fn renderer_config(config: &FinsConfig, args: &Args) -> RendererConfig {
    let display = config.display;
    RendererConfig {
        geometry: DisplayGeometry {
            width: display.width,
            height: display.height,
            left_x: display.left_x,
            right_x: display.right_x,
            y: display.y,
        },
        initial_scale: config.render.initial_scale,
        blur: blur_settings(config),
        curve: curve_for(config.transitions.easing),
        target_fps: args.fps.unwrap_or(config.render.target_fps),
        scale_settle_frames: config.render.scale_settle_frames,
        fps_publish_interval: config
            .monitoring
            .enabled
            .then_some(config.monitoring.fps_publish_interval),
        fps_smoothing_frames: config.monitoring.fps_smoothing_frames,
        show_window: !args.hidden,
    }
}
