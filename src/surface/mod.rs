//! Procedural "fabric" surface
//!
//! Noise-displaced, dark woven material evaluated entirely from elapsed time.
//! The GPU version lives in `shaders/fabric.wgsl`; the functions here are its
//! CPU reference and share constants and structure with it.

pub mod noise;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

pub use noise::{fbm, simplex3};

/// Time multiplier for the noise Z axis, drifting the weave slowly
pub const TIME_SCALE: f32 = 0.05;
/// Frequency of the thread pattern along U and V
pub const THREAD_FREQUENCY: Vec2 = Vec2::new(40.0, 3.0);

/// sRGB color from a 24-bit hex literal
pub fn hex_rgb(hex: u32) -> [f32; 3] {
    [
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    ]
}

/// Convert an sRGB-encoded color to linear light
pub fn srgb_to_linear(c: [f32; 3]) -> [f32; 3] {
    c.map(decode_srgb)
}

/// One sRGB channel in [0, 1] to linear light
pub fn decode_srgb(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of [`decode_srgb`]
pub fn encode_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Fabric material parameters (colors are sRGB)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricParams {
    pub base_color: [f32; 3],
    pub mid_color: [f32; 3],
    pub highlight_color: [f32; 3],
    /// Noise frequency along U and V
    pub noise_scale: [f32; 2],
    /// Maximum displacement along the normal, in world units
    pub displacement: f32,
    /// Direction towards the key light
    pub light_dir: [f32; 3],
}

impl Default for FabricParams {
    fn default() -> Self {
        Self {
            base_color: hex_rgb(0x05070c),
            mid_color: hex_rgb(0x141b25),
            highlight_color: hex_rgb(0x3c4e62),
            noise_scale: [3.0, 20.0],
            displacement: 0.12,
            light_dir: [0.3, 0.8, 0.4],
        }
    }
}

impl FabricParams {
    pub fn light_direction(&self) -> Vec3 {
        Vec3::from(self.light_dir).normalize_or(Vec3::Y)
    }

    fn linear(&self) -> (Vec3, Vec3, Vec3) {
        (
            Vec3::from(srgb_to_linear(self.base_color)),
            Vec3::from(srgb_to_linear(self.mid_color)),
            Vec3::from(srgb_to_linear(self.highlight_color)),
        )
    }

    /// Pack for the `FabricUniforms` block in `fabric.wgsl`
    pub fn uniforms(&self, time: f32) -> FabricUniforms {
        let (base, mid, highlight) = self.linear();
        FabricUniforms {
            base_color: base.extend(1.0).to_array(),
            mid_color: mid.extend(1.0).to_array(),
            highlight_color: highlight.extend(1.0).to_array(),
            light_dir: self.light_direction().extend(0.0).to_array(),
            noise_scale: self.noise_scale,
            displacement: self.displacement,
            time,
        }
    }

    fn noise_point(&self, uv: Vec2, time: f32) -> Vec3 {
        Vec3::new(uv.x * self.noise_scale[0], uv.y * self.noise_scale[1], time * TIME_SCALE)
    }

    /// Distance a vertex at `uv` moves along its normal. Never negative.
    pub fn displacement_at(&self, uv: Vec2, time: f32) -> f32 {
        fbm(self.noise_point(uv, time)).max(0.0) * self.displacement
    }

    /// Thread highlight mask in [0, 1]
    pub fn thread_mask(&self, uv: Vec2) -> f32 {
        smoothstep(0.4, 0.9, simplex3((uv * THREAD_FREQUENCY).extend(0.0)))
    }

    /// Shaded linear color at `uv`.
    ///
    /// `normal` and `view_dir` point away from the surface.
    pub fn shade(&self, uv: Vec2, normal: Vec3, view_dir: Vec3, time: f32) -> Vec3 {
        let (base, mid, highlight) = self.linear();
        let n = normal.normalize_or(Vec3::Z);
        let v = view_dir.normalize_or(Vec3::Z);

        let height = (fbm(self.noise_point(uv, time)) * 0.7 + 0.3).clamp(0.0, 1.0);
        let threads = self.thread_mask(uv);

        let mut color = base.lerp(mid, height);
        color = color.lerp(highlight, threads * 0.9);

        let diffuse = 0.25 + 0.75 * n.dot(self.light_direction()).max(0.0);
        color *= diffuse;

        let rim = (1.0 - n.dot(v).max(0.0)).powi(3);
        color += highlight * rim * 0.6;

        color * vignette(uv)
    }
}

/// Edge darkening: 1.0 near the center, 0.6 at the far corners
pub fn vignette(uv: Vec2) -> f32 {
    let dist = (uv - Vec2::splat(0.5)).length();
    let falloff = 1.0 - smoothstep(0.2, 0.9, dist);
    0.6 + (1.0 - 0.6) * falloff
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Uniform block consumed by `fabric.wgsl`
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FabricUniforms {
    pub base_color: [f32; 4],
    pub mid_color: [f32; 4],
    pub highlight_color: [f32; 4],
    pub light_dir: [f32; 4],
    pub noise_scale: [f32; 2],
    pub displacement: f32,
    pub time: f32,
}
