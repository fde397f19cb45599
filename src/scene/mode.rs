//! Composition modes and the state machine that switches between them

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::camera::{SceneCamera, Viewport};
use super::layer::LayerKind;
use super::LayerGraph;

/// One of the five fixed layer arrangements
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Background, neon behind the user
    One,
    /// Light catcher, user behind the neon
    Two,
    /// Neon behind the user, model in front
    Three,
    /// Light catcher, model behind the user
    Four,
    /// Background, model behind the user
    Five,
}

/// Where a visible layer sits in a mode
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Placement {
    pub kind: LayerKind,
    pub depth: f32,
}

const fn place(kind: LayerKind, depth: f32) -> Placement {
    Placement { kind, depth }
}

const MODE_ONE: [Placement; 3] = [
    place(LayerKind::Background, -10.0),
    place(LayerKind::NeonModel, -5.0),
    place(LayerKind::UserPlane, 0.0),
];
const MODE_TWO: [Placement; 3] = [
    place(LayerKind::LightCatcher, -10.0),
    place(LayerKind::UserPlane, -5.0),
    place(LayerKind::NeonModel, 0.0),
];
const MODE_THREE: [Placement; 3] = [
    place(LayerKind::NeonModel, -5.0),
    place(LayerKind::UserPlane, 0.0),
    place(LayerKind::MainModel, 5.0),
];
const MODE_FOUR: [Placement; 3] = [
    place(LayerKind::LightCatcher, -10.0),
    place(LayerKind::MainModel, -5.0),
    place(LayerKind::UserPlane, 0.0),
];
const MODE_FIVE: [Placement; 3] = [
    place(LayerKind::Background, -10.0),
    place(LayerKind::MainModel, -5.0),
    place(LayerKind::UserPlane, 0.0),
];

impl Mode {
    pub const ALL: [Mode; 5] = [Mode::One, Mode::Two, Mode::Three, Mode::Four, Mode::Five];

    pub fn number(self) -> u8 {
        match self {
            Mode::One => 1,
            Mode::Two => 2,
            Mode::Three => 3,
            Mode::Four => 4,
            Mode::Five => 5,
        }
    }

    /// Visible layers, far to near. Layers not listed are hidden.
    pub fn placements(self) -> &'static [Placement] {
        match self {
            Mode::One => &MODE_ONE,
            Mode::Two => &MODE_TWO,
            Mode::Three => &MODE_THREE,
            Mode::Four => &MODE_FOUR,
            Mode::Five => &MODE_FIVE,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {}", self.number())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModeError {
    #[error("no mode numbered {0}, expected 1-5")]
    Unknown(u8),
}

impl TryFrom<u8> for Mode {
    type Error = ModeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mode::One),
            2 => Ok(Mode::Two),
            3 => Ok(Mode::Three),
            4 => Ok(Mode::Four),
            5 => Ok(Mode::Five),
            other => Err(ModeError::Unknown(other)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModeState {
    /// No mode chosen yet; the scene shows only what the graph starts with
    Uninitialized,
    Active(Mode),
}

/// Tracks the active mode and reconfigures the graph on every selection
#[derive(Debug)]
pub struct ModeController {
    state: ModeState,
    /// Whether the external selector UI should be shown
    selector_open: bool,
    switches: u64,
}

impl ModeController {
    pub fn new() -> Self {
        Self {
            state: ModeState::Uninitialized,
            selector_open: true,
            switches: 0,
        }
    }

    /// Activate `mode`: apply its layout, then refit to the viewport.
    ///
    /// Selecting the active mode again re-applies it.
    pub fn select(&mut self, mode: Mode, graph: &mut LayerGraph, viewport: Viewport, camera: &mut SceneCamera) {
        let previous = self.state;
        graph.apply_mode(mode);
        graph.refit_to_viewport(viewport, camera);

        self.state = ModeState::Active(mode);
        self.selector_open = false;
        self.switches += 1;

        tracing::info!(?previous, mode = mode.number(), "Mode selected");
    }

    /// Show the selector again. The scene keeps rendering the active mode.
    pub fn return_to_selector(&mut self) {
        if !self.selector_open {
            tracing::info!("Returning to mode selector");
        }
        self.selector_open = true;
    }

    /// Mode to start automatically once `elapsed` reaches `delay`, if none was picked
    pub fn auto_start_due(&self, elapsed: Duration, delay: Duration, mode: Option<Mode>) -> Option<Mode> {
        match self.state {
            ModeState::Uninitialized if elapsed >= delay => mode,
            _ => None,
        }
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn active_mode(&self) -> Option<Mode> {
        match self.state {
            ModeState::Active(mode) => Some(mode),
            ModeState::Uninitialized => None,
        }
    }

    pub fn selector_open(&self) -> bool {
        self.selector_open
    }

    pub fn switch_count(&self) -> u64 {
        self.switches
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}
