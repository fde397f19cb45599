//! GPU texture holding the composited matte
//!
//! Recreated whenever the composite changes size; the old texture is
//! destroyed before the replacement is created.

use super::CompositeImage;

/// Premultiplied RGBA texture sampled by the user plane
pub struct MatteTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    /// Bumped on every reallocation so bind groups know to rebuild
    generation: u64,
}

impl MatteTexture {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (texture, view) = Self::create_texture(device, width, height);
        Self {
            texture,
            view,
            width,
            height,
            generation: 0,
        }
    }

    fn create_texture(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Matte Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    /// Reallocate if the size differs. Returns true when a new texture was made.
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }

        tracing::debug!(
            old_width = self.width,
            old_height = self.height,
            width,
            height,
            "Reallocating matte texture"
        );

        self.texture.destroy();
        let (texture, view) = Self::create_texture(device, width, height);
        self.texture = texture;
        self.view = view;
        self.width = width;
        self.height = height;
        self.generation += 1;
        true
    }

    /// Copy a composite into the texture. Sizes must already match.
    pub fn upload(&self, queue: &wgpu::Queue, image: &CompositeImage) {
        if image.width() != self.width || image.height() != self.height {
            tracing::warn!(
                image_width = image.width(),
                image_height = image.height(),
                texture_width = self.width,
                texture_height = self.height,
                "Skipping matte upload with mismatched size"
            );
            return;
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload `image` into `slot`, creating or resizing the texture first.
    pub fn sync(slot: &mut Option<Self>, device: &wgpu::Device, queue: &wgpu::Queue, image: &CompositeImage) {
        match slot {
            Some(texture) => {
                texture.ensure_size(device, image.width(), image.height());
            }
            None => {
                tracing::info!(width = image.width(), height = image.height(), "Creating matte texture");
                *slot = Some(Self::new(device, image.width(), image.height()));
            }
        }
        if let Some(texture) = slot {
            texture.upload(queue, image);
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
