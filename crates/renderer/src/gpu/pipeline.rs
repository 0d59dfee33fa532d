use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use bytemuck::Zeroable;
use wgpu::naga::ShaderStage;
use wgpu::util::DeviceExt;

use crate::compile::{wrap_fragment, SourceInfo, FIN_VERTEX_GLSL};
use crate::error::CompileError;
use crate::uniforms::{FrameUniforms, ParamLayout};

use super::audio::AudioTexture;
use super::targets::TARGET_FORMAT;

/// Default number of distinct fin pipelines kept alive.
pub(crate) const SHADER_CACHE_CAPACITY: usize = 16;

/// Parses and validates GLSL with naga so errors surface with diagnostics
/// instead of as device errors.
pub(crate) fn validate_glsl(source: &str, stage: ShaderStage) -> Result<(), CompileError> {
    let mut frontend = wgpu::naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&wgpu::naga::front::glsl::Options::from(stage), source)
        .map_err(|err| CompileError::Parse(err.emit_to_string(source)))?;
    let mut validator = wgpu::naga::valid::Validator::new(
        wgpu::naga::valid::ValidationFlags::all(),
        wgpu::naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|err| CompileError::Validation(err.emit_to_string(source)))?;
    Ok(())
}

pub(crate) fn glsl_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: ShaderStage,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_string()),
            stage,
            defines: &[],
        },
    })
}

fn uniform_entry(visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layouts shared by every fin program.
pub(crate) struct PipelineLayouts {
    pub frame: wgpu::BindGroupLayout,
    pub params: wgpu::BindGroupLayout,
    pub audio: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_module: wgpu::ShaderModule,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Result<Self, CompileError> {
        let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fins frame layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::VERTEX_FRAGMENT)],
        });
        let params = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fins params layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::FRAGMENT)],
        });
        let audio = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fins audio layout"),
            entries: &AudioTexture::layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fins pipeline layout"),
            bind_group_layouts: &[&frame, &params, &audio],
            push_constant_ranges: &[],
        });

        validate_glsl(FIN_VERTEX_GLSL, ShaderStage::Vertex)?;
        let vertex_module = glsl_module(device, "fins vertex", FIN_VERTEX_GLSL, ShaderStage::Vertex);

        Ok(Self {
            frame,
            params,
            audio,
            pipeline_layout,
            vertex_module,
        })
    }
}

#[derive(Clone)]
struct CachedShader {
    pipeline: wgpu::RenderPipeline,
    info: SourceInfo,
}

/// Pipelines keyed by the hash of their wrapped source, oldest evicted first.
pub(crate) struct ShaderCache {
    entries: HashMap<u64, CachedShader>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl ShaderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, key: u64) -> Option<CachedShader> {
        let hit = self.entries.get(&key).cloned();
        if hit.is_some() {
            self.order.retain(|existing| *existing != key);
            self.order.push_back(key);
        }
        hit
    }

    fn insert(&mut self, key: u64, shader: CachedShader) {
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, shader);
        self.order.push_back(key);
    }
}

fn source_key(glsl: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    glsl.hash(&mut hasher);
    hasher.finish()
}

/// A fin program: shared pipeline plus this instance's uniform buffers.
pub struct FinProgram {
    pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    params_buffer: wgpu::Buffer,
    params_group: wgpu::BindGroup,
}

impl FinProgram {
    pub(crate) fn compile(
        device: &wgpu::Device,
        layouts: &PipelineLayouts,
        cache: &mut ShaderCache,
        label: &str,
        source: &str,
    ) -> Result<(Self, SourceInfo), CompileError> {
        let wrapped = wrap_fragment(source)?;
        let key = source_key(&wrapped.glsl);
        let shader = match cache.get(key) {
            Some(shader) => {
                tracing::trace!(label, "fin pipeline cache hit");
                shader
            }
            None => {
                let pipeline = build_pipeline(device, layouts, label, &wrapped.glsl)?;
                let shader = CachedShader {
                    pipeline,
                    info: wrapped.info,
                };
                cache.insert(key, shader.clone());
                shader
            }
        };

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fins frame uniforms"),
            contents: bytemuck::bytes_of(&FrameUniforms::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fins frame bind group"),
            layout: &layouts.frame,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });
        let params_size = ParamLayout::new(&shader.info.params).size();
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fins param uniforms"),
            size: params_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fins params bind group"),
            layout: &layouts.params,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        Ok((
            Self {
                pipeline: shader.pipeline,
                frame_buffer,
                frame_group,
                params_buffer,
                params_group,
            },
            shader.info,
        ))
    }

    pub(crate) fn write_uniforms(&self, queue: &wgpu::Queue, frame: &FrameUniforms, params: &[u8]) {
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(frame));
        if !params.is_empty() {
            queue.write_buffer(&self.params_buffer, 0, params);
        }
    }

    /// Renders the program into `view`, replacing its contents.
    pub(crate) fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        audio: &wgpu::BindGroup,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("fins program pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
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
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.frame_group, &[]);
        pass.set_bind_group(1, &self.params_group, &[]);
        pass.set_bind_group(2, audio, &[]);
        pass.draw(0..3, 0..1);
    }

    pub(crate) fn destroy(self) {
        self.frame_buffer.destroy();
        self.params_buffer.destroy();
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    label: &str,
    glsl: &str,
) -> Result<wgpu::RenderPipeline, CompileError> {
    validate_glsl(glsl, ShaderStage::Fragment)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let fragment = glsl_module(device, label, glsl, ShaderStage::Fragment);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layouts.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &layouts.vertex_module,
            entry_point: Some("main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(CompileError::Device(err.to_string())),
        None => Ok(pipeline),
    }
}
