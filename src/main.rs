//! Neon Mirror - Main Entry Point
//!
//! Opens a window, starts the camera pipeline and drives the redraw loop.
//! Keys 1-5 pick a mode, Backspace returns to the selector, F11 toggles
//! fullscreen and Escape quits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use neon_mirror::settings::AppSettings;
use neon_mirror::telemetry::init_logging;
use neon_mirror::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Neon Mirror";

/// Application state machine
enum AppState {
    /// Before the window exists
    Uninitialized,
    Running { window: Arc<Window>, app: App },
}

struct NeonMirrorApp {
    state: AppState,
    settings: AppSettings,
    next_redraw_at: Instant,
}

impl NeonMirrorApp {
    fn new(settings: AppSettings) -> Self {
        Self {
            state: AppState::Uninitialized,
            settings,
            next_redraw_at: Instant::now(),
        }
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000u64 / self.settings.target_fps.max(1) as u64)
    }
}

fn toggle_fullscreen(window: &Window) {
    if window.fullscreen().is_some() {
        window.set_fullscreen(None);
        tracing::info!("Exiting fullscreen");
    } else {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        tracing::info!("Entering fullscreen");
    }
}

fn mode_key(key_code: KeyCode) -> Option<u8> {
    match key_code {
        KeyCode::Digit1 | KeyCode::Numpad1 => Some(1),
        KeyCode::Digit2 | KeyCode::Numpad2 => Some(2),
        KeyCode::Digit3 | KeyCode::Numpad3 => Some(3),
        KeyCode::Digit4 | KeyCode::Numpad4 => Some(4),
        KeyCode::Digit5 | KeyCode::Numpad5 => Some(5),
        _ => None,
    }
}

impl ApplicationHandler for NeonMirrorApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }

        let startup = &self.settings.startup;
        let mut window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(startup.window_width, startup.window_height));
        if startup.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create window");
                event_loop.exit();
                return;
            }
        };

        tracing::info!(
            width = window.inner_size().width,
            height = window.inner_size().height,
            "Window created"
        );

        match pollster::block_on(App::new(window.clone(), self.settings.clone())) {
            Ok(app) => {
                tracing::info!("Neon Mirror ready. 1-5 select a mode, Backspace returns, F11 fullscreen, Esc quits");
                self.state = AppState::Running { window, app };
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize graphics");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match key_code {
                KeyCode::Escape => {
                    tracing::info!("Escape pressed, exiting");
                    event_loop.exit();
                }
                KeyCode::F11 => toggle_fullscreen(window),
                KeyCode::Backspace => app.return_to_selector(),
                other => {
                    if let Some(number) = mode_key(other) {
                        app.select_mode_number(number);
                    }
                }
            },

            WindowEvent::Resized(physical_size) => app.resize(physical_size),

            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        tracing::warn!("Surface lost, reconfiguring");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        tracing::error!("Out of GPU memory");
                        event_loop.exit();
                    }
                    Err(e) => tracing::warn!(error = ?e, "Surface error"),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let frame_duration = self.frame_duration();
        let AppState::Running { window, .. } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Wake slightly early and spin for precise pacing
        let wake_early = Duration::from_micros(1000);
        let wake_at = self
            .next_redraw_at
            .checked_sub(wake_early)
            .unwrap_or(self.next_redraw_at);

        if Instant::now() >= wake_at {
            while Instant::now() < self.next_redraw_at {
                std::hint::spin_loop();
            }

            window.request_redraw();
            self.next_redraw_at += frame_duration;

            // Reset if too far behind
            let now = Instant::now();
            if now > self.next_redraw_at + frame_duration * 2 {
                self.next_redraw_at = now + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
    }
}

fn main() -> anyhow::Result<()> {
    let (settings, settings_message) = AppSettings::load();

    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Neon Mirror");
    if let Some(message) = settings_message {
        tracing::info!("{}", message);
    }
    tracing::info!(target_fps = settings.target_fps, "Frame pacing");

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = NeonMirrorApp::new(settings);
    event_loop.run_app(&mut app).context("event loop error")?;
    Ok(())
}
