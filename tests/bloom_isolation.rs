//! Headless render of a neon sign next to an equally bright model that does
//! not glow. Only the sign may bleed light into its surroundings.
//!
//! The GPU test is skipped when no GPU adapter is available.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use neon_mirror::render::{
    glow_pass_items, BloomConfig, BloomState, DrawList, DrawMaterial, FrameInputs, LightingConfig, SceneRenderer,
};
use neon_mirror::scene::{
    LayerAsset, LayerContent, LayerGraph, LayerKind, LayerMaterial, MeshData, Mode, ModeController, SceneCamera,
    SceneConfig, Viewport,
};
use neon_mirror::surface::FabricParams;

const SIZE: u32 = 128;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const WHITE: LayerMaterial = LayerMaterial::Emissive { color: [1.0, 1.0, 1.0] };

fn request_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Bloom Test Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
        },
        None,
    ))
    .ok()
}

fn unit_model() -> LayerContent {
    let mesh = MeshData::plane(1.0, 1.0, 1);
    let bounds = mesh.bounds().unwrap();
    LayerContent::Ready(LayerAsset::Model {
        mesh: Arc::new(mesh),
        bounds,
    })
}

/// Neon sign on the left, a flat white main model on the right, both at the
/// neon's depth. Nothing else is drawn.
fn scene() -> (LayerGraph, SceneCamera) {
    let config = SceneConfig {
        animate_model: false,
        ..SceneConfig::default()
    };
    let mut graph = LayerGraph::new(&config);
    let mut camera = config.camera();
    graph.layer_mut(LayerKind::NeonModel).content = unit_model();
    graph.layer_mut(LayerKind::MainModel).content = unit_model();

    let mut modes = ModeController::new();
    modes.select(Mode::Three, &mut graph, Viewport::new(SIZE, SIZE), &mut camera);

    // At depth -5 the frustum is about 16.6 units wide, 7.7 px per unit
    let neon = graph.layer_mut(LayerKind::NeonModel);
    let depth = neon.depth;
    neon.offset = Vec2::new(-4.0, 0.0);
    neon.scale = Vec3::splat(3.0);
    let model = graph.layer_mut(LayerKind::MainModel);
    model.depth = depth;
    model.offset = Vec2::new(3.5, 0.0);
    model.scale = Vec3::splat(3.0);
    model.material = WHITE;

    (graph, camera)
}

#[test]
fn test_bright_model_becomes_occluder_in_glow_pass() {
    let (graph, _) = scene();
    let list = DrawList::from_graph(&graph, false);
    let neon = graph.layer(LayerKind::NeonModel);
    let model = graph.layer(LayerKind::MainModel);
    assert_eq!(model.depth, neon.depth);
    assert!(neon.bloom && !model.bloom);

    let before: Vec<_> = list.items().iter().map(|i| (i.kind, i.material)).collect();
    let glow = glow_pass_items(list.items());
    let after: Vec<_> = list.items().iter().map(|i| (i.kind, i.material)).collect();
    assert_eq!(before, after);
    assert!(after.contains(&(LayerKind::MainModel, DrawMaterial::Surface(WHITE))));

    assert_eq!(glow.len(), list.len());
    for item in &glow {
        match item.kind {
            LayerKind::NeonModel => assert_eq!(item.material, DrawMaterial::Surface(neon.material)),
            LayerKind::MainModel => assert_eq!(item.material, DrawMaterial::Occluder),
            other => panic!("unexpected layer {:?}", other),
        }
    }
}

fn render(device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<u8> {
    let (graph, camera) = scene();
    let bloom_config = BloomConfig::default();
    let mut renderer = SceneRenderer::new(
        device,
        FORMAT,
        SIZE,
        SIZE,
        bloom_config,
        LightingConfig::default(),
        FabricParams::default(),
    );

    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Bloom Test Output"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());

    // 128 px * 4 bytes is already a multiple of the 256 byte row alignment
    let bytes_per_row = SIZE * 4;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Bloom Test Readback"),
        size: (bytes_per_row * SIZE) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let bloom = BloomState::steady(&bloom_config);
    let inputs = FrameInputs {
        graph: &graph,
        camera: &camera,
        matte: None,
        bloom: &bloom,
        time: 0.0,
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Bloom Test Encoder"),
    });
    renderer.render(&mut encoder, device, queue, &inputs, &view);
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &target,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(SIZE),
            },
        },
        wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = readback.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| {
        result.unwrap();
    });
    device.poll(wgpu::Maintain::Wait);
    let pixels = slice.get_mapped_range().to_vec();
    readback.unmap();
    pixels
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * SIZE + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

#[test]
fn test_only_neon_sign_glows() {
    let Some((device, queue)) = request_device() else {
        eprintln!("No GPU adapter available, skipping");
        return;
    };
    let pixels = render(&device, &queue);
    let mid = SIZE / 2;

    // Neon spans roughly x 22..45, the model x 79..103
    let on_neon = pixel(&pixels, 33, mid);
    assert!(on_neon[0] > 100, "neon sign not drawn: {:?}", on_neon);
    let on_model = pixel(&pixels, 91, mid);
    assert!(
        on_model[..3].iter().all(|&c| c > 200),
        "model not drawn bright: {:?}",
        on_model
    );

    // Same distance outside each footprint
    let beside_neon = pixel(&pixels, 50, mid);
    assert!(beside_neon[0] > 8, "no glow beside the neon sign: {:?}", beside_neon);
    let beside_model = pixel(&pixels, 108, mid);
    assert!(
        beside_model[..3].iter().all(|&c| c <= 2),
        "model leaked glow: {:?}",
        beside_model
    );
    let above_model = pixel(&pixels, 91, mid - 17);
    assert!(
        above_model[..3].iter().all(|&c| c <= 2),
        "model leaked glow: {:?}",
        above_model
    );
}
