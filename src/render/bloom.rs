//! Selective bloom
//!
//! The glow target holds only glowing geometry (everything else drawn black).
//! It is bright-passed into half resolution, blurred with a separable
//! gaussian, and added onto the scene: `scene + glow * strength`.

use bytemuck::{Pod, Zeroable};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::targets::RenderTargets;
use crate::shaders;

/// Angular frequency of the strength pulse (period of pi seconds)
const PULSE_FREQUENCY: f32 = 2.0;
const PULSE_AMPLITUDE: f32 = 0.1;
/// Largest random flicker value
const FLICKER_MAX: f32 = 0.5;
const PULSE_WEIGHT: f32 = 0.2;
const FLICKER_WEIGHT: f32 = 0.2;

/// Neon light intensity before pulse and flicker
const NEON_BASE_INTENSITY: f32 = 2.0;
const NEON_PULSE_WEIGHT: f32 = 2.0;
const NEON_FLICKER_WEIGHT: f32 = 3.0;

/// Bloom settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    /// Strength before pulse and flicker
    pub base_strength: f32,
    /// Blur spread in [0, 1]
    pub radius: f32,
    /// Brightness below which nothing glows
    pub threshold: f32,
    /// Width of the soft transition around the threshold, relative to it
    pub soft_knee: f32,
    /// Horizontal + vertical blur iterations
    pub passes: u32,
    /// Fraction of frames that flicker
    pub flicker_chance: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            base_strength: 0.8,
            radius: 0.5,
            threshold: 0.0,
            soft_knee: 0.5,
            passes: 2,
            flicker_chance: 0.1,
        }
    }
}

impl BloomConfig {
    pub fn sanitize(&mut self) {
        self.base_strength = self.base_strength.clamp(0.0, 10.0);
        self.radius = self.radius.clamp(0.0, 1.0);
        self.threshold = self.threshold.max(0.0);
        self.soft_knee = self.soft_knee.clamp(0.0, 1.0);
        self.passes = self.passes.clamp(1, 8);
        self.flicker_chance = self.flicker_chance.clamp(0.0, 1.0);
    }

    /// Distance between blur taps in source texels
    pub fn tap_spacing(&self) -> f32 {
        1.0 + self.radius * 2.0
    }
}

/// Per-frame bloom and neon light values. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomState {
    pub pulse: f32,
    pub flicker: f32,
    pub strength: f32,
    /// Intensity of the neon point light
    pub neon_intensity: f32,
}

impl BloomState {
    /// Values for the frame at `time` seconds
    pub fn update<R: Rng + ?Sized>(config: &BloomConfig, time: f32, rng: &mut R) -> Self {
        let pulse = (time * PULSE_FREQUENCY).sin() * PULSE_AMPLITUDE;
        let flicker = if rng.random::<f32>() < config.flicker_chance {
            rng.random::<f32>() * FLICKER_MAX
        } else {
            0.0
        };

        Self {
            pulse,
            flicker,
            strength: config.base_strength + pulse * PULSE_WEIGHT + flicker * FLICKER_WEIGHT,
            neon_intensity: NEON_BASE_INTENSITY + pulse * NEON_PULSE_WEIGHT + flicker * NEON_FLICKER_WEIGHT,
        }
    }

    /// Steady values with no pulse or flicker
    pub fn steady(config: &BloomConfig) -> Self {
        Self {
            pulse: 0.0,
            flicker: 0.0,
            strength: config.base_strength,
            neon_intensity: NEON_BASE_INTENSITY,
        }
    }
}

/// Uniform block shared by the bloom shaders
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BloomParams {
    texel: [f32; 2],
    threshold: f32,
    knee: f32,
    direction: [f32; 2],
    spacing: f32,
    strength: f32,
}

/// Bright-pass, blur and composite pipelines
pub struct BloomRenderer {
    bright_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    source_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    bright_params: wgpu::Buffer,
    blur_h_params: wgpu::Buffer,
    blur_v_params: wgpu::Buffer,
    composite_params: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &'static str,
    layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = shaders::create_module(device, label, source);
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn params_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<BloomParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    output: &wgpu::TextureView,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: output,
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

    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

impl BloomRenderer {
    /// Create the bloom passes. The composite writes `output_format`.
    pub fn new(device: &wgpu::Device, output_format: wgpu::TextureFormat) -> Self {
        // [0] source texture, [1] sampler, [2] params
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Source Bind Group Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });

        // [0] scene, [1] glow, [2] sampler, [3] params
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Composite Bind Group Layout"),
            entries: &[texture_entry(0), texture_entry(1), sampler_entry(2), uniform_entry(3)],
        });

        let hdr = super::targets::HDR_FORMAT;
        let bright_pipeline = fullscreen_pipeline(
            device,
            "Bloom Bright Pass",
            shaders::BLOOM_BRIGHT_SHADER,
            &source_layout,
            hdr,
        );
        let blur_pipeline = fullscreen_pipeline(device, "Bloom Blur", shaders::BLOOM_BLUR_SHADER, &source_layout, hdr);
        let composite_pipeline = fullscreen_pipeline(
            device,
            "Bloom Composite",
            shaders::BLOOM_COMPOSITE_SHADER,
            &composite_layout,
            output_format,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            bright_pipeline,
            blur_pipeline,
            composite_pipeline,
            source_layout,
            composite_layout,
            bright_params: params_buffer(device, "Bloom Bright Params"),
            blur_h_params: params_buffer(device, "Bloom Blur H Params"),
            blur_v_params: params_buffer(device, "Bloom Blur V Params"),
            composite_params: params_buffer(device, "Bloom Composite Params"),
            sampler,
        }
    }

    fn source_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        source: &wgpu::TextureView,
        params: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.source_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    /// Bright-pass and blur the glow target, then composite it over the scene into `output`
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &RenderTargets,
        config: &BloomConfig,
        strength: f32,
        output: &wgpu::TextureView,
    ) {
        let (width, height) = targets.size();
        let (bloom_width, bloom_height) = targets.bloom_size();
        let full_texel = [1.0 / width as f32, 1.0 / height as f32];
        let half_texel = [1.0 / bloom_width as f32, 1.0 / bloom_height as f32];

        let base = BloomParams {
            texel: full_texel,
            threshold: config.threshold,
            knee: config.soft_knee,
            direction: [0.0, 0.0],
            spacing: config.tap_spacing(),
            strength,
        };
        queue.write_buffer(&self.bright_params, 0, bytemuck::bytes_of(&base));
        queue.write_buffer(
            &self.blur_h_params,
            0,
            bytemuck::bytes_of(&BloomParams {
                texel: half_texel,
                direction: [1.0, 0.0],
                ..base
            }),
        );
        queue.write_buffer(
            &self.blur_v_params,
            0,
            bytemuck::bytes_of(&BloomParams {
                texel: half_texel,
                direction: [0.0, 1.0],
                ..base
            }),
        );
        queue.write_buffer(&self.composite_params, 0, bytemuck::bytes_of(&base));

        let bright_group = self.source_bind_group(device, "Bloom Bright Bind Group", targets.glow(), &self.bright_params);
        fullscreen_pass(
            encoder,
            "Bloom Bright Pass",
            &self.bright_pipeline,
            &bright_group,
            targets.bloom_ping(),
        );

        let horizontal = self.source_bind_group(device, "Bloom Blur H Bind Group", targets.bloom_ping(), &self.blur_h_params);
        let vertical = self.source_bind_group(device, "Bloom Blur V Bind Group", targets.bloom_pong(), &self.blur_v_params);
        for _ in 0..config.passes.max(1) {
            fullscreen_pass(encoder, "Bloom Blur H", &self.blur_pipeline, &horizontal, targets.bloom_pong());
            fullscreen_pass(encoder, "Bloom Blur V", &self.blur_pipeline, &vertical, targets.bloom_ping());
        }

        let composite_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Composite Bind Group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(targets.scene()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(targets.bloom_ping()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.composite_params.as_entire_binding(),
                },
            ],
        });
        fullscreen_pass(encoder, "Bloom Composite", &self.composite_pipeline, &composite_group, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_params_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<BloomParams>(), 32);
    }

    #[test]
    fn test_strength_stays_near_base() {
        let config = BloomConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for frame in 0..2000 {
            let state = BloomState::update(&config, frame as f32 / 60.0, &mut rng);
            assert!(state.pulse.abs() <= PULSE_AMPLITUDE + 1e-6);
            assert!((0.0..=FLICKER_MAX).contains(&state.flicker));
            assert!(state.strength >= 0.8 - 0.02 - 1e-6);
            assert!(state.strength <= 0.8 + 0.02 + 0.1 + 1e-6);
            let expected = 2.0 + state.pulse * 2.0 + state.flicker * 3.0;
            assert!((state.neon_intensity - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_flicker_on_about_one_frame_in_ten() {
        let config = BloomConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let frames = 10_000;
        let flickering = (0..frames)
            .filter(|_| BloomState::update(&config, 0.0, &mut rng).flicker > 0.0)
            .count();
        let rate = flickering as f32 / frames as f32;
        assert!((0.08..0.12).contains(&rate), "flicker rate {}", rate);
    }

    #[test]
    fn test_pulse_period() {
        let config = BloomConfig {
            flicker_chance: 0.0,
            ..BloomConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let a = BloomState::update(&config, 0.3, &mut rng);
        let b = BloomState::update(&config, 0.3 + std::f32::consts::PI, &mut rng);
        assert!((a.strength - b.strength).abs() < 1e-5);
        assert_eq!(a.flicker, 0.0);
    }

    #[test]
    fn test_sanitize_clamps_passes() {
        let mut config = BloomConfig {
            passes: 0,
            radius: 3.0,
            ..BloomConfig::default()
        };
        config.sanitize();
        assert_eq!(config.passes, 1);
        assert_eq!(config.radius, 1.0);
    }
}
