//! wgpu implementation of [`RenderBackend`].
//!
//! Each fin owns an A/B pair of off-screen targets at its render scale.
//! Programs draw into those targets, then the compositor scales them into
//! the fin's half of the window surface, blending A and B while a
//! transition runs.

mod audio;
mod compositor;
mod context;
mod pipeline;
mod targets;

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use thiserror::Error;
use tracing::{debug, warn};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::audio::AudioFrame;
use crate::backend::{Compiled, DisplayPass, FramePlan, ProgramFrame, RenderBackend};
use crate::error::{AllocationError, CompileError};
use crate::types::{DisplayGeometry, DisplayId, RenderSize, RendererConfig};
use crate::uniforms::{BlendUniforms, FrameUniforms};

use self::audio::AudioTexture;
use self::compositor::{CompositeBindings, Compositor};
use self::context::GpuContext;
use self::pipeline::{PipelineLayouts, ShaderCache, SHADER_CACHE_CAPACITY};
use self::targets::RenderTargetPair;

pub use self::pipeline::FinProgram;

/// Failures that end the render loop.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface out of memory")]
    OutOfMemory,
    #[error("surface error: {0}")]
    Surface(String),
}

struct DisplayTargets {
    pair: RenderTargetPair,
    bindings: CompositeBindings,
}

pub struct WgpuBackend {
    context: GpuContext,
    layouts: PipelineLayouts,
    cache: ShaderCache,
    audio: AudioTexture,
    compositor: Compositor,
    geometry: DisplayGeometry,
    displays: [DisplayTargets; 2],
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, config: &RendererConfig) -> Result<Self> {
        let geometry = config.geometry;
        let window_size = geometry.window_size();
        let context = GpuContext::new(
            window,
            PhysicalSize::new(window_size.width, window_size.height),
        )?;
        let layouts = PipelineLayouts::new(&context.device)
            .context("failed to build fin pipeline layouts")?;
        let audio = AudioTexture::new(&context.device, &context.queue, &layouts.audio);
        let compositor = Compositor::new(&context.device, context.surface_format)
            .context("failed to build compositor")?;

        let size = geometry.base_size().scaled(config.initial_scale);
        let allocate = |display: DisplayId| -> Result<DisplayTargets> {
            let pair = RenderTargetPair::allocate(&context.device, size, display.as_str())
                .with_context(|| format!("failed to allocate {display} render targets"))?;
            let bindings = compositor.bind(&context.device, &pair);
            Ok(DisplayTargets { pair, bindings })
        };
        let displays = [allocate(DisplayId::Left)?, allocate(DisplayId::Right)?];
        debug!(%size, "allocated fin render targets");

        Ok(Self {
            context,
            layouts,
            cache: ShaderCache::new(SHADER_CACHE_CAPACITY),
            audio,
            compositor,
            geometry,
            displays,
        })
    }

    /// Tracks a window resize; fin targets keep their own sizes.
    pub fn resize_surface(&mut self, size: PhysicalSize<u32>) {
        self.context.resize(size);
    }

    pub fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size()
    }

    /// Viewport of `display` in surface pixels, following the window if the
    /// compositor resized it.
    fn viewport(&self, display: DisplayId) -> [f32; 4] {
        let window = self.geometry.window_size();
        let surface = self.context.size();
        let sx = surface.width as f32 / window.width as f32;
        let sy = surface.height as f32 / window.height as f32;
        let base = self.geometry.base_size();
        [
            self.geometry.viewport_x(display) as f32 * sx,
            0.0,
            base.width as f32 * sx,
            base.height as f32 * sy,
        ]
    }

    fn write_program(&self, program: &ProgramFrame<'_, FinProgram>, size: RenderSize) {
        let mut uniforms = FrameUniforms::new(size);
        uniforms.update(size, program.time, program.time_delta, program.frame);
        program
            .program
            .write_uniforms(&self.context.queue, &uniforms, &program.params);
    }
}

impl RenderBackend for WgpuBackend {
    type Program = FinProgram;
    type Error = RenderError;

    fn compile(
        &mut self,
        fin: DisplayId,
        source: &str,
        size: RenderSize,
    ) -> Result<Compiled<FinProgram>, CompileError> {
        let label = format!("fins {fin} program");
        let (program, info) = FinProgram::compile(
            &self.context.device,
            &self.layouts,
            &mut self.cache,
            &label,
            source,
        )?;
        debug!(display = %fin, %size, params = info.params.len(), "compiled fin program");
        Ok(Compiled { program, info })
    }

    fn release(&mut self, _display: DisplayId, program: FinProgram) {
        program.destroy();
    }

    fn resize_targets(
        &mut self,
        fin: DisplayId,
        size: RenderSize,
    ) -> Result<(), AllocationError> {
        if self.displays[fin.index()].pair.size == size {
            return Ok(());
        }
        let pair = RenderTargetPair::allocate(&self.context.device, size, fin.as_str())?;
        let bindings = self.compositor.bind(&self.context.device, &pair);
        let previous = std::mem::replace(
            &mut self.displays[fin.index()],
            DisplayTargets { pair, bindings },
        );
        previous.pair.destroy();
        debug!(display = %fin, %size, "reallocated fin render targets");
        Ok(())
    }

    fn upload_audio(&mut self, frame: &AudioFrame) {
        self.audio.upload(&self.context.queue, frame);
    }

    fn render(&mut self, plan: FramePlan<'_, FinProgram>) -> Result<(), RenderError> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost; reconfiguring");
                self.context.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timeout; retrying next frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(other) => return Err(RenderError::Surface(other.to_string())),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fins frame encoder"),
            });

        // Which bind group each display composites with, if any.
        let mut composite: [Option<bool>; 2] = [None, None];
        if !plan.blanked {
            for display in &plan.displays {
                let index = display.display.index();
                let targets = &self.displays[index];
                match &display.pass {
                    DisplayPass::Empty => {}
                    DisplayPass::Steady(program) => {
                        self.write_program(program, targets.pair.size);
                        program.program.encode(
                            &mut encoder,
                            &targets.pair.current.view,
                            &self.audio.bind_group,
                        );
                        targets.bindings.write(
                            &self.context.queue,
                            &BlendUniforms::new(targets.pair.size, 0.0, 0.0),
                        );
                        composite[index] = Some(false);
                    }
                    DisplayPass::Blend {
                        current,
                        target,
                        factors,
                    } => {
                        self.write_program(current, targets.pair.size);
                        self.write_program(target, targets.pair.size);
                        current.program.encode(
                            &mut encoder,
                            &targets.pair.current.view,
                            &self.audio.bind_group,
                        );
                        target.program.encode(
                            &mut encoder,
                            &targets.pair.target.view,
                            &self.audio.bind_group,
                        );
                        targets.bindings.write(
                            &self.context.queue,
                            &BlendUniforms::new(targets.pair.size, factors.mix, factors.blur),
                        );
                        composite[index] = Some(true);
                    }
                }
            }
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fins composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            for display in DisplayId::ALL {
                let Some(blending) = composite[display.index()] else {
                    continue;
                };
                let bindings = &self.displays[display.index()].bindings;
                let group = if blending {
                    &bindings.blend
                } else {
                    &bindings.steady
                };
                self.compositor
                    .draw(&mut pass, group, self.viewport(display));
            }
        }

        self.context.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        for targets in &self.displays {
            targets.pair.current.texture.destroy();
            targets.pair.target.texture.destroy();
        }
    }
}
