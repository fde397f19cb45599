//! Mesh data for scene layers
//!
//! Generates the subdivided planes used by the background, light catcher and
//! user layers, and holds merged model geometry loaded from glTF.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};

/// Vertex shared by every scene pipeline
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Normal vector (for lighting)
    pub normal: [f32; 3],
    /// Texture coordinates, v = 0 at the top edge
    pub uv: [f32; 2],
}

impl Vertex {
    /// Size of vertex in bytes
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Vertex buffer layout for wgpu
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::SIZE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                // position
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // normal
                wgpu::VertexAttribute {
                    offset: 12,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // uv
                wgpu::VertexAttribute {
                    offset: 24,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Axis-aligned bounding box
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Indexed triangle list
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Plane in the XY plane facing +Z, centered on the origin.
    ///
    /// `segments` subdivisions along each axis; displacement needs the extra vertices.
    pub fn plane(width: f32, height: f32, segments: u32) -> Self {
        let segments = segments.max(1);
        let row = segments + 1;
        let mut vertices = Vec::with_capacity((row * row) as usize);
        let mut indices = Vec::with_capacity((segments * segments * 6) as usize);

        for iy in 0..row {
            let v = iy as f32 / segments as f32;
            for ix in 0..row {
                let u = ix as f32 / segments as f32;
                vertices.push(Vertex {
                    position: [(u - 0.5) * width, (0.5 - v) * height, 0.0],
                    normal: [0.0, 0.0, 1.0],
                    uv: [u, v],
                });
            }
        }

        // CCW winding seen from +Z
        for iy in 0..segments {
            for ix in 0..segments {
                let top_left = iy * row + ix;
                let top_right = top_left + 1;
                let bottom_left = top_left + row;
                let bottom_right = bottom_left + 1;
                indices.extend_from_slice(&[top_left, bottom_left, top_right]);
                indices.extend_from_slice(&[top_right, bottom_left, bottom_right]);
            }
        }

        Self { vertices, indices }
    }

    /// Bounds of all vertices, `None` for an empty mesh
    pub fn bounds(&self) -> Option<Aabb> {
        let first = Vec3::from(self.vertices.first()?.position);
        let (min, max) = self.vertices.iter().fold((first, first), |(min, max), v| {
            let p = Vec3::from(v.position);
            (min.min(p), max.max(p))
        });
        Some(Aabb { min, max })
    }

    /// Append `other` transformed by `transform`
    pub fn append_transformed(&mut self, other: &MeshData, transform: Mat4) {
        let base = self.vertices.len() as u32;
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();

        self.vertices.extend(other.vertices.iter().map(|v| Vertex {
            position: transform.transform_point3(Vec3::from(v.position)).to_array(),
            normal: (normal_matrix * Vec3::from(v.normal))
                .normalize_or(Vec3::Z)
                .to_array(),
            uv: v.uv,
        }));
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Shift every vertex so the bounding box is centered on the origin
    pub fn recenter(&mut self) {
        let Some(bounds) = self.bounds() else { return };
        let center = bounds.center();
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) - center).to_array();
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}
