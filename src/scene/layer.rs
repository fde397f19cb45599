//! Scene layers
//!
//! Five fixed layers whose depth and visibility are driven by the active mode.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3};

use super::mesh::{Aabb, MeshData};
use crate::assets::ImageData;

/// Role of a layer in the composition
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    /// Textured or fabric backdrop
    Background,
    /// Glossy black plane that picks up the neon light
    LightCatcher,
    /// Plane carrying the live matte
    UserPlane,
    /// Neon sign model, the only glowing layer
    NeonModel,
    /// Decorative 3D model
    MainModel,
}

impl LayerKind {
    pub const ALL: [LayerKind; 5] = [
        LayerKind::Background,
        LayerKind::LightCatcher,
        LayerKind::UserPlane,
        LayerKind::NeonModel,
        LayerKind::MainModel,
    ];

    /// Planes are stretched to the frustum; models are scaled uniformly
    pub fn is_planar(self) -> bool {
        matches!(
            self,
            LayerKind::Background | LayerKind::LightCatcher | LayerKind::UserPlane
        )
    }

    /// Depth a layer returns to before every mode is applied
    pub fn canonical_depth(self) -> f32 {
        match self {
            LayerKind::Background | LayerKind::LightCatcher => -10.0,
            LayerKind::UserPlane => 0.0,
            LayerKind::NeonModel => -5.0,
            LayerKind::MainModel => -3.0,
        }
    }

    pub fn blooms(self) -> bool {
        matches!(self, LayerKind::NeonModel)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            LayerKind::Background => "background",
            LayerKind::LightCatcher => "light-catcher",
            LayerKind::UserPlane => "user",
            LayerKind::NeonModel => "neon",
            LayerKind::MainModel => "model",
        }
    }
}

/// How a layer is shaded
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LayerMaterial {
    /// Diffuse texture with a displacement map, lit
    Textured {
        roughness: f32,
        metalness: f32,
        displacement_scale: f32,
    },
    /// Procedural fabric
    Fabric,
    /// Untextured lit surface
    Glossy {
        color: [f32; 3],
        roughness: f32,
        metalness: f32,
    },
    /// Unlit flat color
    Emissive { color: [f32; 3] },
    /// Premultiplied matte texture, alpha blended
    Matte,
}

impl LayerMaterial {
    pub fn is_transparent(&self) -> bool {
        matches!(self, LayerMaterial::Matte)
    }
}

/// Geometry and textures a ready layer draws with
#[derive(Clone, Debug)]
pub enum LayerAsset {
    Plane(Arc<MeshData>),
    TexturedPlane {
        mesh: Arc<MeshData>,
        diffuse: Arc<ImageData>,
        displacement: Arc<ImageData>,
    },
    Model { mesh: Arc<MeshData>, bounds: Aabb },
}

impl LayerAsset {
    pub fn mesh(&self) -> &Arc<MeshData> {
        match self {
            LayerAsset::Plane(mesh) => mesh,
            LayerAsset::TexturedPlane { mesh, .. } => mesh,
            LayerAsset::Model { mesh, .. } => mesh,
        }
    }
}

/// Load state of a layer's content
#[derive(Clone, Debug)]
pub enum LayerContent {
    Pending,
    Ready(LayerAsset),
    Failed(String),
}

impl LayerContent {
    pub fn is_ready(&self) -> bool {
        matches!(self, LayerContent::Ready(_))
    }

    pub fn asset(&self) -> Option<&LayerAsset> {
        match self {
            LayerContent::Ready(asset) => Some(asset),
            _ => None,
        }
    }
}

/// One node of the layer graph
#[derive(Clone, Debug)]
pub struct Layer {
    pub kind: LayerKind,
    /// World Z of the layer origin
    pub depth: f32,
    pub visible: bool,
    /// Rendered into the glow pass with its own material
    pub bloom: bool,
    pub scale: Vec3,
    /// World XY of the layer origin
    pub offset: Vec2,
    /// Rotation about the Y axis in radians
    pub rotation_y: f32,
    pub material: LayerMaterial,
    pub content: LayerContent,
}

impl Layer {
    pub fn new(kind: LayerKind, material: LayerMaterial, content: LayerContent) -> Self {
        let mut layer = Self {
            kind,
            depth: 0.0,
            visible: false,
            bloom: kind.blooms(),
            scale: Vec3::ONE,
            offset: Vec2::ZERO,
            rotation_y: 0.0,
            material,
            content,
        };
        layer.reset_placement();
        layer
    }

    /// Hidden (the user plane excepted) at the canonical depth, no offset or rotation
    pub fn reset_placement(&mut self) {
        self.depth = self.kind.canonical_depth();
        self.visible = self.kind == LayerKind::UserPlane;
        self.offset = Vec2::ZERO;
        self.rotation_y = 0.0;
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.scale,
            Quat::from_rotation_y(self.rotation_y),
            Vec3::new(self.offset.x, self.offset.y, self.depth),
        )
    }

    /// Visible with content ready to draw
    pub fn is_drawable(&self) -> bool {
        self.visible && self.content.is_ready()
    }
}
