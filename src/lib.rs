//! Neon Mirror - live webcam cutout composited into a neon-lit 3D scene
//!
//! A camera frame and its segmentation mask are smoothed, mirrored and
//! composited into a transparent cutout, which is drawn on one plane of a
//! five-layer scene. Five modes reorder the layers; a selective bloom pass
//! makes only the neon sign glow.

pub mod app;
pub mod assets;
pub mod camera;
pub mod matte;
pub mod ml;
pub mod render;
pub mod scene;
pub mod settings;
pub mod shaders;
pub mod surface;
pub mod telemetry;

pub use app::{App, AppError};
