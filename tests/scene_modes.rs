//! End-to-end checks of the CPU side: camera pair to composite, mode
//! selection to layer layout, and the draw lists built from it.

use std::sync::Arc;

use glam::Vec3;
use neon_mirror::matte::{Frame, Mask, MatteCompositor, MatteConfig};
use neon_mirror::ml::upsample_mask;
use neon_mirror::render::{DrawList, DrawMaterial};
use neon_mirror::scene::{
    Aabb, LayerAsset, LayerContent, LayerGraph, LayerKind, MeshData, Mode, ModeController, ModeState, SceneConfig,
    Viewport,
};

fn ready_model(width: f32) -> LayerContent {
    let mut mesh = MeshData::plane(width, 1.0, 1);
    mesh.recenter();
    let bounds = mesh.bounds().unwrap_or(Aabb {
        min: Vec3::new(-width / 2.0, -0.5, 0.0),
        max: Vec3::new(width / 2.0, 0.5, 0.0),
    });
    LayerContent::Ready(LayerAsset::Model {
        mesh: Arc::new(mesh),
        bounds,
    })
}

fn loaded_graph() -> LayerGraph {
    let mut graph = LayerGraph::new(&SceneConfig::default());
    graph.layer_mut(LayerKind::NeonModel).content = ready_model(3.0);
    graph.layer_mut(LayerKind::MainModel).content = ready_model(2.0);
    graph
}

#[test]
fn test_mode_three_layout() {
    let config = SceneConfig::default();
    let mut graph = loaded_graph();
    let mut camera = config.camera();
    let mut modes = ModeController::new();

    modes.select(Mode::Three, &mut graph, Viewport::new(1920, 1080), &mut camera);

    assert_eq!(modes.state(), ModeState::Active(Mode::Three));
    let neon = graph.layer(LayerKind::NeonModel);
    assert!(neon.visible);
    assert_eq!(neon.depth, -5.0);
    let user = graph.layer(LayerKind::UserPlane);
    assert!(user.visible);
    assert_eq!(user.depth, 0.0);
    let model = graph.layer(LayerKind::MainModel);
    assert!(model.visible);
    assert_eq!(model.depth, 5.0);
    assert!(!graph.layer(LayerKind::Background).visible);
    assert!(!graph.layer(LayerKind::LightCatcher).visible);
}

#[test]
fn test_every_mode_keeps_user_and_one_backdrop_at_most() {
    let config = SceneConfig::default();
    let mut graph = loaded_graph();
    let mut camera = config.camera();
    let mut modes = ModeController::new();
    let viewport = Viewport::new(1280, 720);

    // Walk every transition, including re-selecting the active mode
    for from in Mode::ALL {
        for to in Mode::ALL {
            modes.select(from, &mut graph, viewport, &mut camera);
            modes.select(to, &mut graph, viewport, &mut camera);

            let background = graph.layer(LayerKind::Background).visible;
            let catcher = graph.layer(LayerKind::LightCatcher).visible;
            assert!(!(background && catcher), "{} -> {}", from, to);
            assert!(graph.layer(LayerKind::UserPlane).visible, "{} -> {}", from, to);

            let visible = graph.visible_kinds();
            assert_eq!(visible.len(), to.placements().len());
            for placement in to.placements() {
                assert_eq!(graph.layer(placement.kind).depth, placement.depth);
            }
        }
    }
    assert_eq!(modes.switch_count(), 50);
}

#[test]
fn test_refit_follows_viewport_changes() {
    let config = SceneConfig::default();
    let mut graph = loaded_graph();
    let mut camera = config.camera();
    let mut modes = ModeController::new();
    modes.select(Mode::One, &mut graph, Viewport::new(1280, 720), &mut camera);

    let tan = (config.fov_degrees.to_radians() / 2.0).tan();
    for (width, height) in [(1280u32, 720u32), (800, 800), (720, 1280)] {
        graph.refit_to_viewport(Viewport::new(width, height), &mut camera);
        let aspect = width as f32 / height as f32;

        for kind in [LayerKind::Background, LayerKind::UserPlane] {
            let layer = graph.layer(kind);
            let h = 2.0 * tan * (config.camera_distance - layer.depth);
            assert!((layer.scale.y - h).abs() < 1e-3, "{:?} at {}x{}", kind, width, height);
            assert!((layer.scale.x - h * aspect).abs() < 1e-3, "{:?} at {}x{}", kind, width, height);
        }

        // Neon sign spans its share of the frustum width at its own depth
        let neon = graph.layer(LayerKind::NeonModel);
        let visible_width = 2.0 * tan * (config.camera_distance - neon.depth) * aspect;
        let rendered_width = neon.scale.x * 3.0;
        assert!((rendered_width - visible_width * config.neon_width_fraction).abs() < 1e-3);
    }
}

#[test]
fn test_draw_lists_follow_mode() {
    let config = SceneConfig::default();
    let mut graph = loaded_graph();
    let mut camera = config.camera();
    let mut modes = ModeController::new();

    modes.select(Mode::Three, &mut graph, Viewport::new(1280, 720), &mut camera);
    let list = DrawList::from_graph(&graph, true);
    let kinds: Vec<_> = list.items().iter().map(|item| item.kind).collect();
    assert_eq!(
        kinds,
        vec![LayerKind::NeonModel, LayerKind::MainModel, LayerKind::UserPlane]
    );

    let glow = list.glow_pass();
    for item in glow.items() {
        match item.kind {
            LayerKind::NeonModel => assert!(matches!(item.material, DrawMaterial::Surface(_))),
            LayerKind::MainModel => assert_eq!(item.material, DrawMaterial::Occluder),
            LayerKind::UserPlane => assert_eq!(item.material, DrawMaterial::MatteOccluder),
            other => panic!("unexpected layer {:?}", other),
        }
    }
}

#[test]
fn test_resolution_change_resets_matte() {
    let mut compositor = MatteCompositor::new(MatteConfig::default());

    let frame = Frame::solid(1280, 720, [200, 100, 50, 255]);
    let mask = Mask::filled(1280, 720, 0.2);
    for _ in 0..3 {
        compositor.update(&frame, &mask).unwrap();
    }

    let frame = Frame::solid(640, 480, [10, 20, 30, 255]);
    let mask = Mask::filled(640, 480, 0.9);
    let image = compositor.update(&frame, &mask).unwrap();
    assert_eq!((image.width(), image.height()), (640, 480));
    assert_eq!(image.data().len(), 640 * 480 * 4);

    assert_eq!(compositor.dimensions(), Some((640, 480)));
    assert_eq!(compositor.reset_count(), 2);
    assert_eq!(compositor.smoothed_mask().len(), 640 * 480);
    assert!(compositor.smoothed_mask().iter().all(|&m| (m - 0.9).abs() < 1e-6));
}

#[test]
fn test_smoothing_converges_monotonically() {
    let mut compositor = MatteCompositor::new(MatteConfig {
        smoothing_alpha: 0.35,
        ..MatteConfig::default()
    });
    let frame = Frame::solid(32, 24, [255, 255, 255, 255]);
    compositor.update(&frame, &Mask::filled(32, 24, 0.0)).unwrap();

    let target = Mask::filled(32, 24, 1.0);
    let mut previous = 0.0f32;
    for _ in 0..20 {
        compositor.update(&frame, &target).unwrap();
        let value = compositor.smoothed_mask()[0];
        assert!(value >= previous);
        previous = value;
    }
    assert!((1.0 - previous) < 0.01, "still {} after 20 frames", previous);
}

#[test]
fn test_segmenter_mask_matches_frame() {
    // Model output is square and smaller than the camera frame
    let raw = vec![1.0f32; 256 * 256];
    let mask = upsample_mask(&raw, 256, 256, 320, 240);
    let frame = Frame::solid(320, 240, [90, 90, 90, 255]);

    let mut compositor = MatteCompositor::new(MatteConfig::default());
    let image = compositor.update(&frame, &mask).unwrap();
    assert_eq!((image.width(), image.height()), (320, 240));
    // Fully opaque person, premultiplied color unchanged
    assert_eq!(image.pixel(160, 120), [90, 90, 90, 255]);
}
