use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Sender};
use tracing::{error, info, trace};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::window::WindowBuilder;

use crate::audio::AudioSource;
use crate::command::{self, Command, CommandQueue, CommandSender};
use crate::engine::Engine;
use crate::gpu::{RenderError, WgpuBackend};
use crate::runtime::FrameClock;
use crate::status::StatusSink;
use crate::types::RendererConfig;

/// Handle to the render thread that owns the fins window.
///
/// Dropping the handle asks the thread to shut down and waits for it.
pub struct WindowRuntime {
    commands: CommandSender,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl WindowRuntime {
    /// Starts the render thread and waits until the GPU is initialised.
    pub fn spawn<A, S>(config: RendererConfig, audio: A, status: S) -> Result<Self>
    where
        A: AudioSource + 'static,
        S: StatusSink + 'static,
    {
        let (commands, queue) = command::channel();
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("fins-render".into())
            .spawn(move || run_window_thread(config, queue, audio, status, ready_tx))
            .map_err(|err| anyhow!("failed to spawn render thread: {err}"))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(err);
            }
            Err(_) => {
                return Err(match handle.join() {
                    Ok(Err(err)) => err,
                    _ => anyhow!("render thread exited during start-up"),
                });
            }
        }

        Ok(Self {
            commands,
            join_handle: Some(handle),
        })
    }

    /// Sender for shader, uniform, and lifecycle commands.
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Blocks until the render thread exits on its own.
    pub fn wait(mut self) -> Result<()> {
        self.join()
    }

    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.commands.submit(Command::Shutdown);
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        match self.join_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|err| anyhow!("render thread panicked: {err:?}"))?,
            None => Ok(()),
        }
    }
}

impl Drop for WindowRuntime {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.commands.submit(Command::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run_window_thread<A, S>(
    config: RendererConfig,
    queue: CommandQueue,
    audio: A,
    status: S,
    ready_tx: Sender<Result<()>>,
) -> Result<()>
where
    A: AudioSource + 'static,
    S: StatusSink + 'static,
{
    let mut builder = EventLoopBuilder::new();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        use winit::platform::wayland::EventLoopBuilderExtWayland;
        EventLoopBuilderExtWayland::with_any_thread(&mut builder, true);
    }
    #[cfg(any(target_os = "linux", target_os = "freebsd", target_os = "openbsd"))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    }
    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            let _ = ready_tx.send(Err(anyhow!("failed to create event loop: {err}")));
            return Ok(());
        }
    };

    let geometry = config.geometry;
    let window_size = geometry.window_size();
    let window = WindowBuilder::new()
        .with_title("fins")
        .with_decorations(false)
        .with_resizable(false)
        .with_inner_size(PhysicalSize::new(window_size.width, window_size.height))
        .with_position(PhysicalPosition::new(geometry.left_x, geometry.y))
        .with_visible(config.show_window)
        .build(&event_loop);
    let window = match window {
        Ok(window) => Arc::new(window),
        Err(err) => {
            let _ = ready_tx.send(Err(anyhow!("failed to create fins window: {err}")));
            return Ok(());
        }
    };

    let backend = match WgpuBackend::new(window.clone(), &config) {
        Ok(backend) => backend,
        Err(err) => {
            let _ = ready_tx.send(Err(err.context("failed to initialise renderer")));
            return Ok(());
        }
    };
    let mut engine = Engine::new(backend, &config, queue)
        .with_audio(audio)
        .with_status(status);
    let mut clock = FrameClock::new(config.target_fps);
    info!(
        window = %window_size,
        fin = %geometry.base_size(),
        fps = config.target_fps,
        "fins renderer ready"
    );
    let _ = ready_tx.send(Ok(()));
    window.request_redraw();

    let mut failure: Option<RenderError> = None;
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::Resized(size) => {
                engine.backend_mut().resize_surface(size);
            }
            WindowEvent::ScaleFactorChanged {
                mut inner_size_writer,
                ..
            } => {
                let _ = inner_size_writer.request_inner_size(engine.backend().surface_size());
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                engine.drain_and_apply(now);
                if !engine.is_running() {
                    elwt.exit();
                    return;
                }
                if let Err(err) = engine.frame(now) {
                    error!(error = %err, "render failed; stopping");
                    failure = Some(err);
                    elwt.exit();
                    return;
                }
                clock.mark_rendered(now);
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if clock.ready_for_frame(now) {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = clock.next_deadline() {
                trace!(
                    deadline_ms = deadline.saturating_duration_since(now).as_millis(),
                    "waiting for next frame"
                );
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }
        Event::LoopExiting => {
            engine.shutdown();
            info!("fins renderer stopped");
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
