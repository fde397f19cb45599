//! Embedded WGSL sources
//!
//! Scene shaders are assembled from `scene_common.wgsl` plus one material
//! file; post-processing shaders share `fullscreen.wgsl`.

/// Unlit solid color
pub const FLAT_SHADER: &str = concat!(include_str!("scene_common.wgsl"), include_str!("flat.wgsl"));

/// Lit untextured surface
pub const LIT_SHADER: &str = concat!(include_str!("scene_common.wgsl"), include_str!("lit.wgsl"));

/// Diffuse + displacement mapped surface
pub const TEXTURED_SHADER: &str = concat!(include_str!("scene_common.wgsl"), include_str!("textured.wgsl"));

/// Premultiplied matte on the user plane
pub const MATTE_SHADER: &str = concat!(include_str!("scene_common.wgsl"), include_str!("matte.wgsl"));

/// Procedural fabric
pub const FABRIC_SHADER: &str = concat!(
    include_str!("scene_common.wgsl"),
    include_str!("noise.wgsl"),
    include_str!("fabric.wgsl")
);

pub const BLOOM_BRIGHT_SHADER: &str = concat!(include_str!("fullscreen.wgsl"), include_str!("bloom_bright.wgsl"));

pub const BLOOM_BLUR_SHADER: &str = concat!(include_str!("fullscreen.wgsl"), include_str!("bloom_blur.wgsl"));

pub const BLOOM_COMPOSITE_SHADER: &str =
    concat!(include_str!("fullscreen.wgsl"), include_str!("bloom_composite.wgsl"));

/// Create a shader module from embedded source
pub fn create_module(device: &wgpu::Device, label: &str, source: &'static str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}
