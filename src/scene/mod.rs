//! Layered scene
//!
//! Five fixed layers (background, light catcher, user plane, neon sign, main
//! model) whose depth and visibility come from the active [`Mode`]. The graph
//! owns placement only; the renderer turns it into draw calls every frame.

pub mod camera;
pub mod layer;
pub mod mesh;
pub mod mode;

use std::sync::Arc;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::assets::{AssetError, BackgroundTextures, ModelAsset, SceneAssets};
use crate::surface::{hex_rgb, srgb_to_linear};

pub use camera::{SceneCamera, Viewport};
pub use layer::{Layer, LayerAsset, LayerContent, LayerKind, LayerMaterial};
pub use mesh::{Aabb, MeshData, Vertex};
pub use mode::{Mode, ModeController, ModeError, ModeState, Placement};

/// Smallest extent the user plane is ever scaled to
const MIN_USER_PLANE_SIZE: f32 = 0.1;
/// Height of the neon light above the sign origin, in model units
const NEON_LIGHT_HEIGHT: f32 = 5.0;
/// Main model spin, radians per second
const MODEL_SPIN_RATE: f32 = 0.5;
/// Main model bob amplitude
const MODEL_BOB_AMPLITUDE: f32 = 0.5;

/// What the background plane is shaded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMaterial {
    /// `bg_diffuse.png` + `bg_displacement.png`
    Textured,
    /// Procedural fabric, no texture files needed
    Fabric,
}

/// Scene layout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Camera distance from the user plane's canonical depth
    pub camera_distance: f32,
    pub near: f32,
    pub far: f32,
    /// Fraction of the visible width the neon sign spans
    pub neon_width_fraction: f32,
    /// Fraction of the visible width the main model spans
    pub model_width_fraction: f32,
    pub background: BackgroundMaterial,
    pub background_displacement: f32,
    pub background_roughness: f32,
    pub background_metalness: f32,
    /// Light-catcher color as 0xRRGGBB
    pub light_catcher_color: u32,
    pub light_catcher_roughness: f32,
    pub light_catcher_metalness: f32,
    /// Neon sign and neon light color as 0xRRGGBB
    pub neon_color: u32,
    pub neon_light_range: f32,
    /// Subdivisions of the displaced background plane
    pub plane_segments: u32,
    /// Spin and bob the main model
    pub animate_model: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            camera_distance: 15.0,
            near: 0.1,
            far: 1000.0,
            neon_width_fraction: 0.9,
            model_width_fraction: 0.5,
            background: BackgroundMaterial::Textured,
            background_displacement: 2.0,
            background_roughness: 0.4,
            background_metalness: 0.1,
            light_catcher_color: 0x111111,
            light_catcher_roughness: 0.1,
            light_catcher_metalness: 0.5,
            neon_color: 0xEB292D,
            neon_light_range: 20.0,
            plane_segments: 128,
            animate_model: true,
        }
    }
}

impl SceneConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.fov_degrees = finite_or(self.fov_degrees, defaults.fov_degrees).clamp(10.0, 120.0);
        // Every layer sits at or behind z = 5, keep the camera in front of it
        self.camera_distance = finite_or(self.camera_distance, defaults.camera_distance).clamp(6.0, 100.0);
        self.near = finite_or(self.near, defaults.near).clamp(0.001, 1.0);
        self.far = finite_or(self.far, defaults.far).max(self.camera_distance + 20.0);
        self.neon_width_fraction = self.neon_width_fraction.clamp(0.05, 1.0);
        self.model_width_fraction = self.model_width_fraction.clamp(0.05, 1.0);
        self.background_roughness = self.background_roughness.clamp(0.0, 1.0);
        self.background_metalness = self.background_metalness.clamp(0.0, 1.0);
        self.light_catcher_roughness = self.light_catcher_roughness.clamp(0.0, 1.0);
        self.light_catcher_metalness = self.light_catcher_metalness.clamp(0.0, 1.0);
        self.neon_light_range = self.neon_light_range.max(0.0);
        self.plane_segments = self.plane_segments.clamp(1, 512);
    }

    pub fn camera(&self) -> SceneCamera {
        SceneCamera::with_params(self.fov_degrees, self.camera_distance, self.near, self.far)
    }

    pub fn neon_color_linear(&self) -> [f32; 3] {
        srgb_to_linear(hex_rgb(self.neon_color))
    }
}

/// Point light carried by the neon sign
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    /// Linear RGB
    pub color: [f32; 3],
    pub intensity: f32,
    /// Distance at which the light's contribution reaches zero
    pub range: f32,
}

/// The five scene layers, indexed by [`LayerKind::index`]
#[derive(Debug)]
pub struct LayerGraph {
    layers: Vec<Layer>,
    config: SceneConfig,
}

impl LayerGraph {
    pub fn new(config: &SceneConfig) -> Self {
        let background = match config.background {
            BackgroundMaterial::Textured => Layer::new(
                LayerKind::Background,
                LayerMaterial::Textured {
                    roughness: config.background_roughness,
                    metalness: config.background_metalness,
                    displacement_scale: config.background_displacement,
                },
                LayerContent::Pending,
            ),
            BackgroundMaterial::Fabric => Layer::new(
                LayerKind::Background,
                LayerMaterial::Fabric,
                LayerContent::Ready(LayerAsset::Plane(Arc::new(MeshData::plane(
                    1.0,
                    1.0,
                    config.plane_segments,
                )))),
            ),
        };

        let light_catcher = Layer::new(
            LayerKind::LightCatcher,
            LayerMaterial::Glossy {
                color: srgb_to_linear(hex_rgb(config.light_catcher_color)),
                roughness: config.light_catcher_roughness,
                metalness: config.light_catcher_metalness,
            },
            LayerContent::Ready(LayerAsset::Plane(Arc::new(MeshData::plane(1.0, 1.0, 1)))),
        );

        let user = Layer::new(
            LayerKind::UserPlane,
            LayerMaterial::Matte,
            LayerContent::Ready(LayerAsset::Plane(Arc::new(MeshData::plane(1.0, 1.0, 1)))),
        );

        let neon = Layer::new(
            LayerKind::NeonModel,
            LayerMaterial::Emissive {
                color: config.neon_color_linear(),
            },
            LayerContent::Pending,
        );

        let model = Layer::new(LayerKind::MainModel, LayerMaterial::Fabric, LayerContent::Pending);

        // Order must match LayerKind::index
        Self {
            layers: vec![background, light_catcher, user, neon, model],
            config: config.clone(),
        }
    }

    pub fn layer(&self, kind: LayerKind) -> &Layer {
        &self.layers[kind.index()]
    }

    pub fn layer_mut(&mut self, kind: LayerKind) -> &mut Layer {
        &mut self.layers[kind.index()]
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Reset every layer, then place and show the layers `mode` lists.
    ///
    /// Applying the same mode twice leaves the graph unchanged.
    pub fn apply_mode(&mut self, mode: Mode) {
        for layer in &mut self.layers {
            layer.reset_placement();
        }
        for placement in mode.placements() {
            let layer = self.layer_mut(placement.kind);
            layer.depth = placement.depth;
            layer.visible = true;
        }
    }

    /// Adopt the viewport's aspect ratio and rescale every layer to the new frustum
    pub fn refit_to_viewport(&mut self, viewport: Viewport, camera: &mut SceneCamera) {
        camera.set_aspect(viewport.aspect());
        self.refit(camera);
    }

    /// Planes fill the frustum at their depth; ready models span a fixed
    /// fraction of its width
    pub fn refit(&mut self, camera: &SceneCamera) {
        let neon_fraction = self.config.neon_width_fraction;
        let model_fraction = self.config.model_width_fraction;

        for layer in &mut self.layers {
            let visible = camera.visible_size_at(layer.depth);

            if layer.kind.is_planar() {
                let size = if layer.kind == LayerKind::UserPlane {
                    visible.max(Vec2::splat(MIN_USER_PLANE_SIZE))
                } else {
                    visible
                };
                layer.scale = Vec3::new(size.x, size.y, 1.0);
                continue;
            }

            let fraction = match layer.kind {
                LayerKind::NeonModel => neon_fraction,
                _ => model_fraction,
            };
            if let LayerContent::Ready(LayerAsset::Model { bounds, .. }) = &layer.content {
                let width = bounds.size().x;
                if width > f32::EPSILON {
                    layer.scale = Vec3::splat(visible.x / width * fraction);
                }
            }
        }
    }

    /// Move finished loads into their layers. Returns true if any layer changed.
    pub fn poll_assets(&mut self, assets: &mut SceneAssets, camera: &SceneCamera) -> bool {
        let mut changed = false;

        if let Some(result) = assets.neon.as_mut().and_then(|h| h.poll()) {
            self.resolve_model(LayerKind::NeonModel, result, camera);
            changed = true;
        }
        if let Some(result) = assets.model.as_mut().and_then(|h| h.poll()) {
            self.resolve_model(LayerKind::MainModel, result, camera);
            changed = true;
        }
        if let Some(result) = assets.background.as_mut().and_then(|h| h.poll()) {
            self.resolve_background(result);
            changed = true;
        }

        changed
    }

    fn resolve_model(&mut self, kind: LayerKind, result: Result<ModelAsset, AssetError>, camera: &SceneCamera) {
        match result {
            Ok(model) => {
                let size = model.bounds.size();
                tracing::info!(layer = kind.label(), width = size.x, height = size.y, "Layer ready");
                self.layer_mut(kind).content = LayerContent::Ready(LayerAsset::Model {
                    mesh: Arc::new(model.mesh),
                    bounds: model.bounds,
                });
                self.refit(camera);
            }
            Err(e) => self.fail(kind, &e),
        }
    }

    fn resolve_background(&mut self, result: Result<BackgroundTextures, AssetError>) {
        match result {
            Ok(textures) => {
                tracing::info!(
                    diffuse = ?(textures.diffuse.width, textures.diffuse.height),
                    displacement = ?(textures.displacement.width, textures.displacement.height),
                    "Background textures ready"
                );
                let mesh = Arc::new(MeshData::plane(1.0, 1.0, self.config.plane_segments));
                self.layer_mut(LayerKind::Background).content = LayerContent::Ready(LayerAsset::TexturedPlane {
                    mesh,
                    diffuse: Arc::new(textures.diffuse),
                    displacement: Arc::new(textures.displacement),
                });
            }
            Err(e) => self.fail(LayerKind::Background, &e),
        }
    }

    fn fail(&mut self, kind: LayerKind, error: &AssetError) {
        tracing::warn!(layer = kind.label(), error = %error, "Asset failed to load, layer disabled");
        self.layer_mut(kind).content = LayerContent::Failed(error.to_string());
    }

    /// Spin and bob the main model
    pub fn animate(&mut self, time: f32) {
        if !self.config.animate_model {
            return;
        }
        let model = self.layer_mut(LayerKind::MainModel);
        model.rotation_y = time * MODEL_SPIN_RATE;
        model.offset.y = time.sin() * MODEL_BOB_AMPLITUDE;
    }

    /// The neon sign's light, present while the sign is on screen
    pub fn neon_light(&self, intensity: f32) -> Option<PointLight> {
        let neon = self.layer(LayerKind::NeonModel);
        if !neon.is_drawable() {
            return None;
        }
        Some(PointLight {
            position: neon
                .model_matrix()
                .transform_point3(Vec3::new(0.0, NEON_LIGHT_HEIGHT, 0.0)),
            color: self.config.neon_color_linear(),
            intensity,
            range: self.config.neon_light_range,
        })
    }

    /// Visible layers, for logging
    pub fn visible_kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().filter(|l| l.visible).map(|l| l.kind).collect()
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetHandle;

    fn model_asset(width: f32) -> ModelAsset {
        let mut mesh = MeshData::plane(width, 1.0, 1);
        mesh.recenter();
        let bounds = mesh.bounds().unwrap();
        ModelAsset { mesh, bounds }
    }

    fn ready_graph() -> (LayerGraph, SceneCamera) {
        let config = SceneConfig::default();
        let mut graph = LayerGraph::new(&config);
        let camera = config.camera();
        let mut assets = SceneAssets {
            neon: Some(AssetHandle::ready("neon", model_asset(2.0))),
            model: Some(AssetHandle::ready("model", model_asset(4.0))),
            background: None,
        };
        assert!(graph.poll_assets(&mut assets, &camera));
        (graph, camera)
    }

    fn snapshot(graph: &LayerGraph) -> Vec<(LayerKind, f32, bool, Vec3)> {
        graph
            .layers()
            .iter()
            .map(|l| (l.kind, l.depth, l.visible, l.scale))
            .collect()
    }

    #[test]
    fn test_initial_fit_fills_frustum_with_user_plane() {
        let config = SceneConfig::default();
        let mut graph = LayerGraph::new(&config);
        let mut camera = config.camera();
        assert_eq!(graph.layer(LayerKind::UserPlane).scale, Vec3::ONE);

        graph.refit_to_viewport(Viewport::new(1280, 720), &mut camera);

        let user = graph.layer(LayerKind::UserPlane);
        let visible = camera.visible_size_at(user.depth);
        assert!(visible.x > 1.0 && visible.y > 1.0);
        assert!((user.scale.x - visible.x).abs() < 1e-4);
        assert!((user.scale.y - visible.y).abs() < 1e-4);
        assert!((visible.x / visible.y - 1280.0 / 720.0).abs() < 1e-4);
    }

    #[test]
    fn test_new_graph_shows_only_user_plane() {
        let graph = LayerGraph::new(&SceneConfig::default());
        assert_eq!(graph.visible_kinds(), vec![LayerKind::UserPlane]);
        assert!(matches!(graph.layer(LayerKind::NeonModel).content, LayerContent::Pending));
        assert!(matches!(graph.layer(LayerKind::Background).content, LayerContent::Pending));
    }

    #[test]
    fn test_fabric_background_is_ready_immediately() {
        let config = SceneConfig {
            background: BackgroundMaterial::Fabric,
            ..SceneConfig::default()
        };
        let graph = LayerGraph::new(&config);
        let background = graph.layer(LayerKind::Background);
        assert!(background.content.is_ready());
        assert_eq!(background.material, LayerMaterial::Fabric);
    }

    #[test]
    fn test_apply_mode_is_idempotent() {
        let (mut graph, mut camera) = ready_graph();
        let viewport = Viewport::new(1920, 1080);
        for mode in Mode::ALL {
            graph.apply_mode(mode);
            graph.refit_to_viewport(viewport, &mut camera);
            let once = snapshot(&graph);
            graph.apply_mode(mode);
            graph.refit_to_viewport(viewport, &mut camera);
            assert_eq!(once, snapshot(&graph), "{}", mode);
        }
    }

    #[test]
    fn test_mode_switch_resets_previous_layout() {
        let mut graph = LayerGraph::new(&SceneConfig::default());
        graph.apply_mode(Mode::Three);
        graph.apply_mode(Mode::Two);
        let model = graph.layer(LayerKind::MainModel);
        assert!(!model.visible);
        assert_eq!(model.depth, LayerKind::MainModel.canonical_depth());
        assert_eq!(graph.layer(LayerKind::NeonModel).depth, 0.0);
        assert_eq!(graph.layer(LayerKind::UserPlane).depth, -5.0);
    }

    #[test]
    fn test_backdrops_exclusive_in_every_mode() {
        let mut graph = LayerGraph::new(&SceneConfig::default());
        for mode in Mode::ALL {
            graph.apply_mode(mode);
            let bg = graph.layer(LayerKind::Background).visible;
            let lc = graph.layer(LayerKind::LightCatcher).visible;
            assert!(!(bg && lc), "{} shows both backdrops", mode);
            assert_eq!(bg || lc, mode != Mode::Three, "{}", mode);
            assert!(graph.layer(LayerKind::UserPlane).visible);
        }
    }

    #[test]
    fn test_refit_matches_frustum() {
        let mut graph = LayerGraph::new(&SceneConfig::default());
        let mut camera = SceneCamera::new();
        graph.apply_mode(Mode::Two);
        graph.refit_to_viewport(Viewport::new(1600, 900), &mut camera);

        let tan = (45f32.to_radians() / 2.0).tan();
        for kind in [LayerKind::LightCatcher, LayerKind::UserPlane] {
            let layer = graph.layer(kind);
            let h = 2.0 * tan * (15.0 - layer.depth);
            assert!((layer.scale.y - h).abs() < 1e-3, "{:?}", kind);
            assert!((layer.scale.x - h * 16.0 / 9.0).abs() < 1e-3, "{:?}", kind);
        }
    }

    #[test]
    fn test_models_fit_width_fraction() {
        let (mut graph, mut camera) = ready_graph();
        graph.apply_mode(Mode::Three);
        graph.refit_to_viewport(Viewport::new(1280, 720), &mut camera);

        let neon = graph.layer(LayerKind::NeonModel);
        let expected = camera.visible_size_at(-5.0).x * 0.9 / 2.0;
        assert!((neon.scale.x - expected).abs() < 1e-4);

        let model = graph.layer(LayerKind::MainModel);
        let expected = camera.visible_size_at(5.0).x * 0.5 / 4.0;
        assert!((model.scale.x - expected).abs() < 1e-4);
        assert_eq!(model.scale.x, model.scale.z);
    }

    #[test]
    fn test_failed_asset_stays_absent() {
        let config = SceneConfig::default();
        let mut graph = LayerGraph::new(&config);
        let camera = config.camera();
        let mut assets = SceneAssets {
            neon: Some(AssetHandle::ready("neon", model_asset(1.0))),
            model: None,
            background: None,
        };
        assets.model = Some(AssetHandle::spawn("model", || {
            Err(AssetError::EmptyModel("model.glb".into()))
        }));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !matches!(graph.layer(LayerKind::MainModel).content, LayerContent::Failed(_)) {
            graph.poll_assets(&mut assets, &camera);
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        graph.apply_mode(Mode::Five);
        assert!(graph.layer(LayerKind::MainModel).visible);
        assert!(!graph.layer(LayerKind::MainModel).is_drawable());
        assert!(graph.layer(LayerKind::NeonModel).content.is_ready());
        assert!(!graph.poll_assets(&mut assets, &camera));
    }

    #[test]
    fn test_neon_light_follows_sign() {
        let (mut graph, mut camera) = ready_graph();
        graph.apply_mode(Mode::Four);
        assert!(graph.neon_light(2.0).is_none());

        graph.apply_mode(Mode::One);
        graph.refit_to_viewport(Viewport::new(1280, 720), &mut camera);
        let light = graph.neon_light(2.5).unwrap();
        let scale = graph.layer(LayerKind::NeonModel).scale.y;
        assert!((light.position - Vec3::new(0.0, 5.0 * scale, -5.0)).length() < 1e-4);
        assert_eq!(light.intensity, 2.5);
        assert_eq!(light.range, 20.0);
    }

    #[test]
    fn test_animate_spins_and_bobs_model() {
        let mut graph = LayerGraph::new(&SceneConfig::default());
        graph.animate(std::f32::consts::FRAC_PI_2);
        let model = graph.layer(LayerKind::MainModel);
        assert!((model.rotation_y - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
        assert!((model.offset.y - 0.5).abs() < 1e-6);
    }
}
