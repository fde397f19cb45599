//! Scene renderer with selective bloom
//!
//! Each frame draws the layer graph twice:
//! 1. Glow pass: the filtered draw list ([`DrawList::glow_pass`]) into the glow target
//! 2. Main pass: the full draw list into the HDR scene target
//!
//! [`BloomRenderer`] then blurs the glow target and composites both into the
//! output view.

pub mod bloom;
pub mod draw_list;
pub mod targets;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};
use wgpu::util::DeviceExt;

use crate::assets::ImageData;
use crate::matte::MatteTexture;
use crate::scene::{LayerAsset, LayerGraph, LayerKind, LayerMaterial, MeshData, SceneCamera, Vertex};
use crate::shaders;
use crate::surface::{hex_rgb, srgb_to_linear, FabricParams, FabricUniforms};

pub use bloom::{BloomConfig, BloomRenderer, BloomState};
pub use draw_list::{glow_pass_items, DrawItem, DrawList, DrawMaterial};
pub use targets::{RenderTargets, DEPTH_FORMAT, HDR_FORMAT};

/// Byte stride between item uniform slots (dynamic offset alignment)
const ITEM_STRIDE: u64 = 256;
/// Slots reserved per pass; there are never more items than layers
const SLOTS_PER_PASS: usize = 8;
const GLOW_SLOT_BASE: usize = 0;
const MAIN_SLOT_BASE: usize = SLOTS_PER_PASS;

/// Ambient and key light for lit materials
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// 0xRRGGBB
    pub ambient_color: u32,
    pub ambient_intensity: f32,
    /// 0xRRGGBB
    pub key_color: u32,
    pub key_intensity: f32,
    /// Direction toward the key light
    pub key_direction: [f32; 3],
    /// Scene clear color, 0xRRGGBB
    pub clear_color: u32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            ambient_color: 0xffffff,
            ambient_intensity: 0.35,
            key_color: 0xffffff,
            key_intensity: 0.9,
            key_direction: [0.5, 1.0, 1.0],
            clear_color: 0x000000,
        }
    }
}

impl LightingConfig {
    pub fn sanitize(&mut self) {
        self.ambient_intensity = self.ambient_intensity.clamp(0.0, 10.0);
        self.key_intensity = self.key_intensity.clamp(0.0, 10.0);
        if Vec3::from(self.key_direction).length_squared() < 1e-8 {
            self.key_direction = Self::default().key_direction;
        }
    }
}

/// Group 0 uniform block, see `scene_common.wgsl`
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    ambient: [f32; 4],
    key_dir: [f32; 4],
    key_color: [f32; 4],
    point_pos: [f32; 4],
    point_color: [f32; 4],
}

/// Group 1 uniform block, one slot per draw
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ItemUniforms {
    model: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    color: [f32; 4],
    params: [f32; 4],
}

impl ItemUniforms {
    fn new(item: &DrawItem) -> Self {
        let normal_matrix = Mat4::from_mat3(Mat3::from_mat4(item.model).inverse().transpose());

        let (color, params) = match item.material {
            DrawMaterial::Surface(LayerMaterial::Emissive { color }) => (color, [0.0; 4]),
            DrawMaterial::Surface(LayerMaterial::Glossy {
                color,
                roughness,
                metalness,
            }) => (color, [roughness, metalness, 0.0, 0.0]),
            DrawMaterial::Surface(LayerMaterial::Textured {
                roughness,
                metalness,
                displacement_scale,
            }) => ([1.0; 3], [roughness, metalness, displacement_scale, 0.0]),
            DrawMaterial::Surface(LayerMaterial::Fabric) | DrawMaterial::Surface(LayerMaterial::Matte) => {
                ([1.0; 3], [0.0; 4])
            }
            DrawMaterial::Occluder => ([0.0; 3], [0.0; 4]),
            DrawMaterial::MatteOccluder => ([0.0; 3], [0.0, 0.0, 0.0, 1.0]),
        };

        Self {
            model: item.model.to_cols_array_2d(),
            normal_matrix: normal_matrix.to_cols_array_2d(),
            color: [color[0], color[1], color[2], 1.0],
            params,
        }
    }
}

/// Everything the renderer reads for one frame
pub struct FrameInputs<'a> {
    pub graph: &'a LayerGraph,
    pub camera: &'a SceneCamera,
    /// Composited user matte, `None` until the first camera frame
    pub matte: Option<&'a MatteTexture>,
    pub bloom: &'a BloomState,
    /// Seconds since start
    pub time: f32,
}

/// Diffuse and displacement maps of a textured plane
struct TexturedMaterial {
    diffuse: wgpu::Texture,
    displacement: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// GPU copy of one layer's geometry
struct LayerBuffers {
    mesh: Arc<MeshData>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    textured: Option<TexturedMaterial>,
}

impl LayerBuffers {
    fn destroy(&self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
        if let Some(textured) = &self.textured {
            textured.diffuse.destroy();
            textured.displacement.destroy();
        }
    }
}

struct MeshPipelines {
    flat: wgpu::RenderPipeline,
    lit: wgpu::RenderPipeline,
    textured: wgpu::RenderPipeline,
    fabric: wgpu::RenderPipeline,
    matte: wgpu::RenderPipeline,
}

fn mesh_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &'static str,
    layouts: &[&wgpu::BindGroupLayout],
    blend: wgpu::BlendState,
    depth_write: bool,
) -> wgpu::RenderPipeline {
    let shader = shaders::create_module(device, label, source);
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::buffer_layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: HDR_FORMAT,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None, // Two-sided, models may be seen from behind while spinning
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn uniform_layout_entry(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: wgpu::BufferSize::new(size),
        },
        count: None,
    }
}

fn texture_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn linear_rgb(hex: u32) -> Vec3 {
    Vec3::from(srgb_to_linear(hex_rgb(hex)))
}

/// GPU renderer for the layered scene
pub struct SceneRenderer {
    pipelines: MeshPipelines,
    textured_layout: wgpu::BindGroupLayout,
    matte_layout: wgpu::BindGroupLayout,

    frame_buffer: wgpu::Buffer,
    frame_group: wgpu::BindGroup,
    item_buffer: wgpu::Buffer,
    item_group: wgpu::BindGroup,
    fabric_buffer: wgpu::Buffer,
    fabric_group: wgpu::BindGroup,

    /// Indexed by `LayerKind::index`
    layers: Vec<Option<LayerBuffers>>,
    /// Matte bind group and the texture generation it was built for
    matte_group: Option<(u64, wgpu::BindGroup)>,
    sampler: wgpu::Sampler,

    targets: RenderTargets,
    bloom: BloomRenderer,
    bloom_config: BloomConfig,
    lighting: LightingConfig,
    fabric: FabricParams,
}

impl SceneRenderer {
    /// Create the renderer. The final composite writes `output_format`.
    pub fn new(
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        bloom_config: BloomConfig,
        lighting: LightingConfig,
        fabric: FabricParams,
    ) -> Self {
        let vertex_fragment = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let item_size = std::mem::size_of::<ItemUniforms>() as u64;

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Frame Bind Group Layout"),
            entries: &[uniform_layout_entry(
                0,
                vertex_fragment,
                false,
                std::mem::size_of::<FrameUniforms>() as u64,
            )],
        });
        let item_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Item Bind Group Layout"),
            entries: &[uniform_layout_entry(0, vertex_fragment, true, item_size)],
        });
        // [0] diffuse, [1] displacement (sampled in the vertex stage), [2] sampler
        let textured_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Textured Material Bind Group Layout"),
            entries: &[
                texture_layout_entry(0, wgpu::ShaderStages::FRAGMENT),
                texture_layout_entry(1, vertex_fragment),
                sampler_layout_entry(2, vertex_fragment),
            ],
        });
        let fabric_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fabric Bind Group Layout"),
            entries: &[uniform_layout_entry(
                0,
                vertex_fragment,
                false,
                std::mem::size_of::<FabricUniforms>() as u64,
            )],
        });
        let matte_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Matte Bind Group Layout"),
            entries: &[
                texture_layout_entry(0, wgpu::ShaderStages::FRAGMENT),
                sampler_layout_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let pipelines = MeshPipelines {
            flat: mesh_pipeline(
                device,
                "Scene Flat Pipeline",
                shaders::FLAT_SHADER,
                &[&frame_layout, &item_layout],
                wgpu::BlendState::REPLACE,
                true,
            ),
            lit: mesh_pipeline(
                device,
                "Scene Lit Pipeline",
                shaders::LIT_SHADER,
                &[&frame_layout, &item_layout],
                wgpu::BlendState::REPLACE,
                true,
            ),
            textured: mesh_pipeline(
                device,
                "Scene Textured Pipeline",
                shaders::TEXTURED_SHADER,
                &[&frame_layout, &item_layout, &textured_layout],
                wgpu::BlendState::REPLACE,
                true,
            ),
            fabric: mesh_pipeline(
                device,
                "Scene Fabric Pipeline",
                shaders::FABRIC_SHADER,
                &[&frame_layout, &item_layout, &fabric_layout],
                wgpu::BlendState::REPLACE,
                true,
            ),
            // Tests depth, never writes it
            matte: mesh_pipeline(
                device,
                "Scene Matte Pipeline",
                shaders::MATTE_SHADER,
                &[&frame_layout, &item_layout, &matte_layout],
                wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
                false,
            ),
        };

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Frame Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Frame Bind Group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let item_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Item Buffer"),
            size: ITEM_STRIDE * (SLOTS_PER_PASS * 2) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let item_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Item Bind Group"),
            layout: &item_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &item_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(item_size),
                }),
            }],
        });

        let fabric_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Fabric Uniform Buffer"),
            contents: bytemuck::bytes_of(&fabric.uniforms(0.0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let fabric_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fabric Bind Group"),
            layout: &fabric_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: fabric_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Scene Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        tracing::info!(width, height, ?output_format, "Scene renderer created");

        Self {
            pipelines,
            textured_layout,
            matte_layout,
            frame_buffer,
            frame_group,
            item_buffer,
            item_group,
            fabric_buffer,
            fabric_group,
            layers: LayerKind::ALL.iter().map(|_| None).collect(),
            matte_group: None,
            sampler,
            targets: RenderTargets::new(device, width, height),
            bloom: BloomRenderer::new(device, output_format),
            bloom_config,
            lighting,
            fabric,
        }
    }

    /// Reallocate the offscreen targets for a new output size
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.targets.resize(device, width, height);
    }

    pub fn size(&self) -> (u32, u32) {
        self.targets.size()
    }

    pub fn bloom_config(&self) -> &BloomConfig {
        &self.bloom_config
    }

    pub fn set_bloom_config(&mut self, mut config: BloomConfig) {
        config.sanitize();
        self.bloom_config = config;
    }

    /// Draw the scene into `output`
    pub fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &FrameInputs<'_>,
        output: &wgpu::TextureView,
    ) {
        let draws = DrawList::from_graph(frame.graph, frame.matte.is_some());
        let glow = draws.glow_pass();

        for item in draws.items() {
            self.sync_layer(device, queue, item);
        }
        if let Some(matte) = frame.matte {
            self.sync_matte(device, matte);
        }

        self.write_frame_uniforms(queue, frame);
        queue.write_buffer(
            &self.fabric_buffer,
            0,
            bytemuck::bytes_of(&self.fabric.uniforms(frame.time)),
        );
        self.write_item_uniforms(queue, glow.items(), draws.items());

        self.draw_pass(
            encoder,
            "Glow Pass",
            self.targets.glow(),
            wgpu::Color::BLACK,
            glow.items(),
            GLOW_SLOT_BASE,
        );

        let clear = linear_rgb(self.lighting.clear_color);
        self.draw_pass(
            encoder,
            "Scene Pass",
            self.targets.scene(),
            wgpu::Color {
                r: clear.x as f64,
                g: clear.y as f64,
                b: clear.z as f64,
                a: 1.0,
            },
            draws.items(),
            MAIN_SLOT_BASE,
        );

        self.bloom.render(
            encoder,
            device,
            queue,
            &self.targets,
            &self.bloom_config,
            frame.bloom.strength,
            output,
        );
    }

    fn write_frame_uniforms(&self, queue: &wgpu::Queue, frame: &FrameInputs<'_>) {
        let lighting = &self.lighting;
        let ambient = linear_rgb(lighting.ambient_color) * lighting.ambient_intensity;
        let key_dir = Vec3::from(lighting.key_direction).normalize_or(Vec3::Y);

        let (point_pos, point_color) = match frame.graph.neon_light(frame.bloom.neon_intensity) {
            Some(light) => (
                light.position.extend(light.intensity).to_array(),
                Vec3::from(light.color).extend(light.range).to_array(),
            ),
            None => ([0.0; 4], [0.0; 4]),
        };

        let uniforms = FrameUniforms {
            view_proj: frame.camera.view_projection_matrix().to_cols_array_2d(),
            camera_pos: frame.camera.position().extend(frame.time).to_array(),
            ambient: ambient.extend(1.0).to_array(),
            key_dir: key_dir.extend(lighting.key_intensity).to_array(),
            key_color: linear_rgb(lighting.key_color).extend(1.0).to_array(),
            point_pos,
            point_color,
        };
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    fn write_item_uniforms(&self, queue: &wgpu::Queue, glow: &[DrawItem], main: &[DrawItem]) {
        let mut staging = vec![0u8; ITEM_STRIDE as usize * SLOTS_PER_PASS * 2];
        for (base, items) in [(GLOW_SLOT_BASE, glow), (MAIN_SLOT_BASE, main)] {
            for (i, item) in items.iter().take(SLOTS_PER_PASS).enumerate() {
                let offset = (base + i) * ITEM_STRIDE as usize;
                let uniforms = ItemUniforms::new(item);
                let bytes = bytemuck::bytes_of(&uniforms);
                staging[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }
        queue.write_buffer(&self.item_buffer, 0, &staging);
    }

    /// Upload geometry (and textures) for a layer whose asset changed
    fn sync_layer(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, item: &DrawItem) {
        let slot = &mut self.layers[item.kind.index()];
        let mesh = item.asset.mesh();
        if let Some(existing) = slot {
            if Arc::ptr_eq(&existing.mesh, mesh) {
                return;
            }
            existing.destroy();
        }

        let label = item.kind.label();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Index Buffer", label)),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let textured = match &item.asset {
            LayerAsset::TexturedPlane {
                diffuse, displacement, ..
            } => Self::create_textured_material(
                device,
                queue,
                &self.textured_layout,
                &self.sampler,
                diffuse,
                displacement,
            ),
            _ => None,
        };

        tracing::debug!(
            layer = label,
            vertices = mesh.vertex_count(),
            indices = mesh.index_count(),
            "Uploaded layer geometry"
        );

        *slot = Some(LayerBuffers {
            mesh: mesh.clone(),
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
            textured,
        });
    }

    fn create_textured_material(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        diffuse: &ImageData,
        displacement: &ImageData,
    ) -> Option<TexturedMaterial> {
        let max = device.limits().max_texture_dimension_2d;
        for image in [diffuse, displacement] {
            if image.width == 0 || image.height == 0 || image.width > max || image.height > max {
                tracing::warn!(
                    width = image.width,
                    height = image.height,
                    max,
                    "Background texture size unsupported, background disabled"
                );
                return None;
            }
        }

        let upload = |label: &str, image: &ImageData, format: wgpu::TextureFormat| {
            device.create_texture_with_data(
                queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: image.width,
                        height: image.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &image.rgba,
            )
        };

        let diffuse_texture = upload("Background Diffuse", diffuse, wgpu::TextureFormat::Rgba8UnormSrgb);
        // Height data, not color
        let displacement_texture = upload("Background Displacement", displacement, wgpu::TextureFormat::Rgba8Unorm);

        let diffuse_view = diffuse_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let displacement_view = displacement_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Textured Material Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&diffuse_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&displacement_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        Some(TexturedMaterial {
            diffuse: diffuse_texture,
            displacement: displacement_texture,
            bind_group,
        })
    }

    /// Rebuild the matte bind group after the texture was reallocated
    fn sync_matte(&mut self, device: &wgpu::Device, matte: &MatteTexture) {
        if matches!(&self.matte_group, Some((generation, _)) if *generation == matte.generation()) {
            return;
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Matte Bind Group"),
            layout: &self.matte_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(matte.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.matte_group = Some((matte.generation(), bind_group));
    }

    /// Pipeline and material bind group for a draw, `None` if its resources are missing
    fn material_binding<'a>(
        &'a self,
        material: DrawMaterial,
        buffers: &'a LayerBuffers,
    ) -> Option<(&'a wgpu::RenderPipeline, Option<&'a wgpu::BindGroup>)> {
        match material {
            DrawMaterial::Surface(LayerMaterial::Emissive { .. }) | DrawMaterial::Occluder => {
                Some((&self.pipelines.flat, None))
            }
            DrawMaterial::Surface(LayerMaterial::Glossy { .. }) => Some((&self.pipelines.lit, None)),
            DrawMaterial::Surface(LayerMaterial::Textured { .. }) => {
                let textured = buffers.textured.as_ref()?;
                Some((&self.pipelines.textured, Some(&textured.bind_group)))
            }
            DrawMaterial::Surface(LayerMaterial::Fabric) => Some((&self.pipelines.fabric, Some(&self.fabric_group))),
            DrawMaterial::Surface(LayerMaterial::Matte) | DrawMaterial::MatteOccluder => {
                let (_, group) = self.matte_group.as_ref()?;
                Some((&self.pipelines.matte, Some(group)))
            }
        }
    }

    fn draw_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        target: &wgpu::TextureView,
        clear: wgpu::Color,
        items: &[DrawItem],
        slot_base: usize,
    ) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.targets.depth(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Discard,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_bind_group(0, &self.frame_group, &[]);

        for (i, item) in items.iter().take(SLOTS_PER_PASS).enumerate() {
            let Some(buffers) = &self.layers[item.kind.index()] else {
                continue;
            };
            let Some((pipeline, material_group)) = self.material_binding(item.material, buffers) else {
                continue;
            };

            let offset = ((slot_base + i) as u64 * ITEM_STRIDE) as u32;
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(1, &self.item_group, &[offset]);
            if let Some(group) = material_group {
                render_pass.set_bind_group(2, group, &[]);
            }
            render_pass.set_vertex_buffer(0, buffers.vertex_buffer.slice(..));
            render_pass.set_index_buffer(buffers.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..buffers.index_count, 0, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_match_shader() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 160);
        assert_eq!(std::mem::size_of::<ItemUniforms>(), 160);
        assert!(std::mem::size_of::<ItemUniforms>() as u64 <= ITEM_STRIDE);
        assert_eq!(std::mem::size_of::<FabricUniforms>(), 80);
    }

    #[test]
    fn test_matte_occluder_sets_flag() {
        let item = DrawItem {
            kind: LayerKind::UserPlane,
            asset: LayerAsset::Plane(Arc::new(MeshData::plane(1.0, 1.0, 1))),
            model: Mat4::from_scale(Vec3::new(4.0, 3.0, 1.0)),
            depth: 0.0,
            material: DrawMaterial::MatteOccluder,
            bloom: false,
        };
        let uniforms = ItemUniforms::new(&item);
        assert_eq!(uniforms.params[3], 1.0);
        assert_eq!(&uniforms.color[..3], &[0.0; 3]);

        // Normal matrix keeps plane normals pointing at the camera
        let n = Mat4::from_cols_array_2d(&uniforms.normal_matrix).transform_vector3(Vec3::Z);
        assert!(n.normalize().abs_diff_eq(Vec3::Z, 1e-6));
    }

    #[test]
    fn test_lighting_sanitize_restores_direction() {
        let mut lighting = LightingConfig {
            key_direction: [0.0; 3],
            ambient_intensity: -1.0,
            ..LightingConfig::default()
        };
        lighting.sanitize();
        assert_eq!(lighting.key_direction, LightingConfig::default().key_direction);
        assert_eq!(lighting.ambient_intensity, 0.0);
    }
}
