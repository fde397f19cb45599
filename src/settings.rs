//! Application settings
//!
//! One JSON file with a section per subsystem. Every section defaults, so a
//! partial file (or none at all) is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::AssetConfig;
use crate::camera::CameraConfig;
use crate::matte::MatteConfig;
use crate::ml::SegmenterConfig;
use crate::render::{BloomConfig, LightingConfig};
use crate::scene::{Mode, SceneConfig};
use crate::surface::FabricParams;
use crate::telemetry::LogConfig;

/// Explicit settings file path
pub const CONFIG_ENV: &str = "NEON_MIRROR_CONFIG";
/// Settings file looked for in the working directory
pub const LOCAL_CONFIG_FILE: &str = "neon-mirror.json";

/// Startup behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Mode selected automatically when nothing was chosen, `None` to wait for input
    pub initial_mode: Option<u8>,
    pub auto_start_delay_ms: u64,
    pub fullscreen: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            initial_mode: Some(1),
            auto_start_delay_ms: 500,
            fullscreen: false,
            window_width: 1280,
            window_height: 720,
        }
    }
}

impl StartupConfig {
    /// The configured auto-start mode, if it names a real one
    pub fn auto_start_mode(&self) -> Option<Mode> {
        let number = self.initial_mode?;
        match Mode::try_from(number) {
            Ok(mode) => Some(mode),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid initial mode");
                None
            }
        }
    }
}

/// Everything loaded from the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub camera: CameraConfig,
    pub segmentation: SegmenterConfig,
    pub matte: MatteConfig,
    pub bloom: BloomConfig,
    pub scene: SceneConfig,
    pub fabric: FabricParams,
    pub lighting: LightingConfig,
    pub assets: AssetConfig,
    pub startup: StartupConfig,
    /// Frame pacing target
    pub target_fps: u32,
    pub logging: LogConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            segmentation: SegmenterConfig::default(),
            matte: MatteConfig::default(),
            bloom: BloomConfig::default(),
            scene: SceneConfig::default(),
            fabric: FabricParams::default(),
            lighting: LightingConfig::default(),
            assets: AssetConfig::default(),
            startup: StartupConfig::default(),
            target_fps: 60,
            logging: LogConfig::default(),
        }
    }
}

impl AppSettings {
    /// Clamp FPS to valid range (24-240)
    pub fn clamp_fps(&mut self) {
        self.target_fps = self.target_fps.clamp(24, 240);
    }

    /// Bring every section back into its valid range
    pub fn sanitize(&mut self) {
        self.clamp_fps();
        self.matte.sanitize();
        self.bloom.sanitize();
        self.scene.sanitize();
        self.lighting.sanitize();
        self.camera.sanitize();
        self.segmentation.sanitize();
        self.startup.window_width = self.startup.window_width.max(1);
        self.startup.window_height = self.startup.window_height.max(1);
    }

    /// Load and sanitize a settings file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Self = serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.sanitize();
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating the parent directory
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(SettingsError::Serialize)?;
        fs::write(path, json).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Per-user settings file
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("NeonMirror");
            p.push("settings.json");
            p
        })
    }

    /// Settings file to use: `NEON_MIRROR_CONFIG`, then `./neon-mirror.json`,
    /// then the per-user file. `None` if none exists.
    pub fn locate() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        Self::user_config_path().filter(|p| p.exists())
    }

    /// Load from [`AppSettings::locate`], falling back to defaults.
    ///
    /// Runs before logging is up, so problems come back as a message for the
    /// caller to log once the subscriber exists.
    pub fn load() -> (Self, Option<String>) {
        let Some(path) = Self::locate() else {
            return (Self::default(), None);
        };
        match Self::load_from_file(&path) {
            Ok(settings) => (settings, Some(format!("Loaded settings from {}", path.display()))),
            Err(e) => (Self::default(), Some(format!("Using default settings: {}", e))),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),
}
