//! Application state holding the wgpu graphics context
//!
//! `App` owns the device, queue and surface plus one `SceneContext` with
//! everything the frame loop touches: camera, layer graph, mode machine,
//! compositor, renderer and the capture/segmentation workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::assets::SceneAssets;
use crate::camera::CameraCapture;
use crate::matte::{MatteCompositor, MatteTexture};
use crate::ml::{MattePair, Segmenter};
use crate::render::{BloomState, FrameInputs, SceneRenderer};
use crate::scene::{BackgroundMaterial, LayerGraph, Mode, ModeController, SceneCamera, Viewport};
use crate::settings::AppSettings;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
}

/// Everything the frame loop reads and writes, apart from the GPU handles
pub struct SceneContext {
    pub camera: SceneCamera,
    pub viewport: Viewport,
    pub graph: LayerGraph,
    pub modes: ModeController,
    pub compositor: MatteCompositor,
    pub matte_texture: Option<MatteTexture>,
    pub renderer: SceneRenderer,
    pub assets: SceneAssets,
    pub bloom: BloomState,
    rng: StdRng,
    started: Instant,
}

impl SceneContext {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Main application state
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    settings: AppSettings,

    scene: SceneContext,

    capture: Option<CameraCapture>,
    segmenter: Option<Segmenter>,

    // Frame timing
    frame_count: u64,
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create the graphics context, start asset loads and the camera pipeline
    pub async fn new(window: Arc<Window>, settings: AppSettings) -> Result<Self, AppError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(AppError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!(gpu = %info.name, backend = ?info.backend, "Using GPU");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Neon Mirror Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(AppError::NoSurfaceFormat)?;

        let present_mode = [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
            .into_iter()
            .find(|mode| surface_caps.present_modes.contains(mode))
            .unwrap_or(wgpu::PresentMode::Fifo);

        tracing::info!(format = ?surface_format, ?present_mode, "Configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let viewport = Viewport::new(config.width, config.height);
        let mut camera = settings.scene.camera();
        let mut graph = LayerGraph::new(&settings.scene);
        graph.refit_to_viewport(viewport, &mut camera);

        let mut compositor = MatteCompositor::new(settings.matte);
        compositor.set_max_dimension(device.limits().max_texture_dimension_2d);

        let renderer = SceneRenderer::new(
            &device,
            surface_format,
            config.width,
            config.height,
            settings.bloom,
            settings.lighting,
            settings.fabric,
        );

        let textured_background = settings.scene.background == BackgroundMaterial::Textured;
        let assets = SceneAssets::spawn(&settings.assets, textured_background);

        let scene = SceneContext {
            camera,
            viewport,
            graph,
            modes: ModeController::new(),
            compositor,
            matte_texture: None,
            renderer,
            assets,
            bloom: BloomState::steady(&settings.bloom),
            rng: StdRng::from_os_rng(),
            started: Instant::now(),
        };

        let (capture, segmenter) = Self::start_camera_pipeline(&settings);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            settings,
            scene,
            capture,
            segmenter,
            frame_count: 0,
            fps: 0.0,
            last_fps_update: Instant::now(),
            frames_since_update: 0,
        })
    }

    /// Capture and segmentation both run in the background. Without either the
    /// user plane simply stays absent.
    fn start_camera_pipeline(settings: &AppSettings) -> (Option<CameraCapture>, Option<Segmenter>) {
        if !settings.segmentation.enabled {
            tracing::info!("Segmentation disabled in settings, user plane will stay hidden");
            return (None, None);
        }

        let cameras = CameraCapture::list_cameras();
        for camera in &cameras {
            tracing::debug!(index = camera.index, name = %camera.name, "Found camera");
        }

        let capture = match CameraCapture::start(&settings.camera) {
            Ok(capture) => Some(capture),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start camera capture");
                return (None, None);
            }
        };

        let segmenter = match Segmenter::start(&settings.segmentation) {
            Ok(segmenter) => Some(segmenter),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start segmentation");
                None
            }
        };

        (capture, segmenter)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn scene(&self) -> &SceneContext {
        &self.scene
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Reconfigure the surface, resize render targets, and refit every layer
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);

        let scene = &mut self.scene;
        scene.renderer.resize(&self.device, new_size.width, new_size.height);
        scene.viewport = Viewport::new(new_size.width, new_size.height);
        scene.graph.refit_to_viewport(scene.viewport, &mut scene.camera);

        tracing::debug!(width = new_size.width, height = new_size.height, "Resized");
    }

    pub fn select_mode(&mut self, mode: Mode) {
        let scene = &mut self.scene;
        scene
            .modes
            .select(mode, &mut scene.graph, scene.viewport, &mut scene.camera);
    }

    /// Select by key number; unknown numbers are logged and ignored
    pub fn select_mode_number(&mut self, number: u8) {
        match Mode::try_from(number) {
            Ok(mode) => self.select_mode(mode),
            Err(e) => tracing::warn!(error = %e, "Ignoring mode request"),
        }
    }

    pub fn return_to_selector(&mut self) {
        self.scene.modes.return_to_selector();
    }

    /// Per-frame CPU work: new matte, finished assets, auto-start, animation
    pub fn update(&mut self) {
        self.feed_segmenter();
        if let Some(pair) = self.segmenter.as_ref().and_then(Segmenter::poll) {
            self.apply_pair(&pair);
        }

        let scene = &mut self.scene;
        if scene.graph.poll_assets(&mut scene.assets, &scene.camera) {
            tracing::debug!(visible = ?scene.graph.visible_kinds(), "Scene assets changed");
        }

        let delay = Duration::from_millis(self.settings.startup.auto_start_delay_ms);
        let auto = self.settings.startup.auto_start_mode();
        if let Some(mode) = scene.modes.auto_start_due(scene.elapsed(), delay, auto) {
            tracing::info!(mode = mode.number(), "No mode chosen, starting default");
            self.select_mode(mode);
        }

        let scene = &mut self.scene;
        let time = scene.elapsed().as_secs_f32();
        scene.graph.animate(time);
        scene.bloom = BloomState::update(scene.renderer.bloom_config(), time, &mut scene.rng);
    }

    fn feed_segmenter(&mut self) {
        let (Some(capture), Some(segmenter)) = (&self.capture, &mut self.segmenter) else {
            return;
        };
        if !segmenter.accepts_frames() {
            return;
        }
        if let Some(frame) = capture.frame_after(segmenter.last_submitted()) {
            segmenter.submit(frame);
        }
    }

    /// Composite a new pair and upload it before this frame renders
    fn apply_pair(&mut self, pair: &MattePair) {
        let scene = &mut self.scene;
        if let Err(e) = scene.compositor.update(&pair.frame, &pair.mask) {
            tracing::debug!(error = %e, "Dropped camera frame");
            return;
        }
        if let Some(image) = scene.compositor.take_dirty() {
            MatteTexture::sync(&mut scene.matte_texture, &self.device, &self.queue, image);
        }
    }

    /// Render one frame to the window
    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        let scene = &mut self.scene;
        let inputs = FrameInputs {
            graph: &scene.graph,
            camera: &scene.camera,
            matte: scene.matte_texture.as_ref(),
            bloom: &scene.bloom,
            time: scene.started.elapsed().as_secs_f32(),
        };
        scene
            .renderer
            .render(&mut encoder, &self.device, &self.queue, &inputs, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();

        self.frame_count += 1;
        self.frames_since_update += 1;
        let since = self.last_fps_update.elapsed();
        if since >= Duration::from_secs(1) {
            self.fps = self.frames_since_update as f64 / since.as_secs_f64();
            self.frames_since_update = 0;
            self.last_fps_update = Instant::now();
            tracing::trace!(fps = self.fps, frames = self.frame_count, "Frame rate");
        }

        Ok(())
    }
}
