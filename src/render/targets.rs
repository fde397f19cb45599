//! Offscreen render targets
//!
//! HDR scene and glow buffers at window resolution, a shared depth buffer, and
//! two half-resolution bloom buffers for blur ping-pong.

/// Format of every HDR color target
pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
/// Depth buffer format
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A texture with its default view
pub struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Target {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let usage = if format == DEPTH_FORMAT {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn destroy(&self) {
        self.texture.destroy();
    }
}

/// All intermediate targets for one frame
pub struct RenderTargets {
    width: u32,
    height: u32,
    scene: Target,
    glow: Target,
    depth: Target,
    bloom_ping: Target,
    bloom_pong: Target,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let (half_width, half_height) = Self::half_size(width, height);

        Self {
            width,
            height,
            scene: Target::new(device, "Scene HDR Target", width, height, HDR_FORMAT),
            glow: Target::new(device, "Glow Target", width, height, HDR_FORMAT),
            depth: Target::new(device, "Scene Depth Target", width, height, DEPTH_FORMAT),
            bloom_ping: Target::new(device, "Bloom Ping Target", half_width, half_height, HDR_FORMAT),
            bloom_pong: Target::new(device, "Bloom Pong Target", half_width, half_height, HDR_FORMAT),
        }
    }

    /// Bloom runs at half resolution, never below one pixel
    pub fn half_size(width: u32, height: u32) -> (u32, u32) {
        ((width / 2).max(1), (height / 2).max(1))
    }

    /// Destroy and reallocate everything if the size changed
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        let width = width.max(1);
        let height = height.max(1);
        if self.width == width && self.height == height {
            return false;
        }

        tracing::debug!(
            old_width = self.width,
            old_height = self.height,
            width,
            height,
            "Reallocating render targets"
        );

        for target in [&self.scene, &self.glow, &self.depth, &self.bloom_ping, &self.bloom_pong] {
            target.destroy();
        }
        *self = Self::new(device, width, height);
        true
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bloom_size(&self) -> (u32, u32) {
        Self::half_size(self.width, self.height)
    }

    pub fn scene(&self) -> &wgpu::TextureView {
        self.scene.view()
    }

    pub fn glow(&self) -> &wgpu::TextureView {
        self.glow.view()
    }

    pub fn depth(&self) -> &wgpu::TextureView {
        self.depth.view()
    }

    pub fn bloom_ping(&self) -> &wgpu::TextureView {
        self.bloom_ping.view()
    }

    pub fn bloom_pong(&self) -> &wgpu::TextureView {
        self.bloom_pong.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_size_never_zero() {
        assert_eq!(RenderTargets::half_size(1920, 1080), (960, 540));
        assert_eq!(RenderTargets::half_size(1, 1), (1, 1));
        assert_eq!(RenderTargets::half_size(3, 0), (1, 1));
    }
}
