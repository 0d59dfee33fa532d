use crate::error::AllocationError;
use crate::types::RenderSize;

/// Format every fin program renders into.
pub(crate) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// An off-screen colour target sized to a display's render scale.
pub(crate) struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, size: RenderSize, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// The A/B pair a display renders its current and incoming programs into.
pub(crate) struct RenderTargetPair {
    pub current: RenderTarget,
    pub target: RenderTarget,
    pub size: RenderSize,
}

impl RenderTargetPair {
    /// Allocates both targets inside an error scope so out-of-memory and
    /// limit violations come back as errors instead of device loss.
    pub fn allocate(
        device: &wgpu::Device,
        size: RenderSize,
        label: &str,
    ) -> Result<Self, AllocationError> {
        let limit = device.limits().max_texture_dimension_2d;
        if size.width > limit || size.height > limit {
            return Err(AllocationError::TooLarge {
                requested: size,
                limit,
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let current = RenderTarget::new(device, size, &format!("{label} target a"));
        let target = RenderTarget::new(device, size, &format!("{label} target b"));
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            current.texture.destroy();
            target.texture.destroy();
            return Err(AllocationError::Device(err.to_string()));
        }

        Ok(Self {
            current,
            target,
            size,
        })
    }

    pub fn destroy(self) {
        self.current.texture.destroy();
        self.target.texture.destroy();
    }
}
