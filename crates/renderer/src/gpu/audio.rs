use crate::audio::{AudioFrame, AUDIO_TEXTURE_ROWS, AUDIO_TEXTURE_WIDTH};

/// The shared 512x2 `R32Float` texture behind `iChannel0`.
///
/// 32-bit float textures are not filterable everywhere, so the sampler is
/// nearest-neighbour and the layout declares it non-filtering.
pub(crate) struct AudioTexture {
    texture: wgpu::Texture,
    pub bind_group: wgpu::BindGroup,
}

impl AudioTexture {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, layout: &wgpu::BindGroupLayout) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fins audio texture"),
            size: Self::extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fins audio sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fins audio bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let audio = Self {
            texture,
            bind_group,
        };
        audio.upload(queue, &AudioFrame::silent());
        audio
    }

    pub fn layout_entries() -> [wgpu::BindGroupLayoutEntry; 2] {
        [
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                count: None,
            },
        ]
    }

    pub fn upload(&self, queue: &wgpu::Queue, frame: &AudioFrame) {
        let texels = frame.texels();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some((AUDIO_TEXTURE_WIDTH * std::mem::size_of::<f32>()) as u32),
                rows_per_image: Some(AUDIO_TEXTURE_ROWS as u32),
            },
            Self::extent(),
        );
    }

    fn extent() -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: AUDIO_TEXTURE_WIDTH as u32,
            height: AUDIO_TEXTURE_ROWS as u32,
            depth_or_array_layers: 1,
        }
    }
}
