//! Fixed perspective camera looking down -Z
//!
//! Every layer is fitted against this camera's frustum, so the visible-size
//! math lives here next to the projection.

use glam::{Mat4, Vec2, Vec3};

/// Window size in physical pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height, 1.0 for a degenerate viewport
    pub fn aspect(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Perspective camera for the layered scene
#[derive(Clone, Debug)]
pub struct SceneCamera {
    /// Eye position; the camera looks straight down -Z from here
    position: Vec3,
    /// Aspect ratio (width/height) for projection
    aspect: f32,
    /// Vertical field of view in radians
    fov: f32,
    near: f32,
    far: f32,
}

impl SceneCamera {
    /// Camera at (0, 0, 15) with a 45 degree vertical field of view
    pub fn new() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 15.0),
            aspect: 16.0 / 9.0,
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn with_params(fov_degrees: f32, distance: f32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, distance),
            fov: fov_degrees.clamp(1.0, 179.0).to_radians(),
            near: near.max(1e-4),
            far: far.max(near + 1e-3),
            ..Self::new()
        }
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position - Vec3::Z, Vec3::Y)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Size of the frustum cross-section at world depth `z`
    pub fn visible_size_at(&self, z: f32) -> Vec2 {
        let distance = self.position.z - z;
        let height = 2.0 * (self.fov * 0.5).tan() * distance;
        Vec2::new(height * self.aspect, height)
    }

    /// Update aspect ratio on resize
    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self::new()
    }
}
