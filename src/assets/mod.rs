//! Asynchronous asset loading
//!
//! Models and textures load on worker threads. Each load is an
//! [`AssetHandle`] the scene polls once per frame; until it resolves, the
//! layer that needs it is simply not drawn.

use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, TryRecvError};
use glam::Mat4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::mesh::{Aabb, MeshData, Vertex};

/// Asset file locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory the other paths are relative to
    pub root: PathBuf,
    pub neon_model: PathBuf,
    pub main_model: PathBuf,
    pub background_diffuse: PathBuf,
    pub background_displacement: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            neon_model: PathBuf::from("model.gltf"),
            main_model: PathBuf::from("model.glb"),
            background_diffuse: PathBuf::from("bg_diffuse.png"),
            background_displacement: PathBuf::from("bg_displacement.png"),
        }
    }
}

impl AssetConfig {
    pub fn resolve(&self, file: &Path) -> PathBuf {
        self.root.join(file)
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to import glTF {path}: {source}")]
    Gltf {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },

    #[error("glTF {0} contains no triangle geometry")]
    EmptyModel(PathBuf),

    #[error("failed to load image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("loader for {0} stopped without a result")]
    Disconnected(String),

    #[error("failed to spawn loader thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Decoded RGBA8 image
#[derive(Clone, Debug)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Model geometry merged into one mesh, centered on the origin
#[derive(Clone, Debug)]
pub struct ModelAsset {
    pub mesh: MeshData,
    pub bounds: Aabb,
}

/// Diffuse and displacement maps for the background plane
#[derive(Clone, Debug)]
pub struct BackgroundTextures {
    pub diffuse: ImageData,
    pub displacement: ImageData,
}

/// Result of a load running on a worker thread
pub struct AssetHandle<T> {
    name: String,
    receiver: Option<Receiver<Result<T, AssetError>>>,
}

impl<T: Send + 'static> AssetHandle<T> {
    /// Start `load` on its own thread
    pub fn spawn<F>(name: impl Into<String>, load: F) -> Self
    where
        F: FnOnce() -> Result<T, AssetError> + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let fallback = sender.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("asset-{}", name))
            .spawn(move || {
                let _ = sender.send(load());
            });

        if let Err(e) = spawned {
            let _ = fallback.send(Err(AssetError::Spawn(e)));
        }

        Self {
            name,
            receiver: Some(receiver),
        }
    }

    /// Handle that resolves immediately
    pub fn ready(name: impl Into<String>, value: T) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let _ = sender.send(Ok(value));
        Self {
            name: name.into(),
            receiver: Some(receiver),
        }
    }

    /// Take the result if the load finished. Returns `Some` exactly once.
    pub fn poll(&mut self) -> Option<Result<T, AssetError>> {
        let receiver = self.receiver.as_ref()?;
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(AssetError::Disconnected(self.name.clone())),
        };
        self.receiver = None;
        Some(result)
    }

    /// The result has been handed out
    pub fn is_finished(&self) -> bool {
        self.receiver.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Loads in flight for the scene layers
#[derive(Default)]
pub struct SceneAssets {
    pub neon: Option<AssetHandle<ModelAsset>>,
    pub model: Option<AssetHandle<ModelAsset>>,
    pub background: Option<AssetHandle<BackgroundTextures>>,
}

impl SceneAssets {
    /// Start every load. Background textures load only when the background uses them.
    pub fn spawn(config: &AssetConfig, textured_background: bool) -> Self {
        let neon_path = config.resolve(&config.neon_model);
        let model_path = config.resolve(&config.main_model);

        let background = textured_background.then(|| {
            let diffuse = config.resolve(&config.background_diffuse);
            let displacement = config.resolve(&config.background_displacement);
            AssetHandle::spawn("background", move || {
                Ok(BackgroundTextures {
                    diffuse: load_image(&diffuse)?,
                    displacement: load_image(&displacement)?,
                })
            })
        });

        tracing::info!(root = %config.root.display(), textured_background, "Loading scene assets");

        Self {
            neon: Some(AssetHandle::spawn("neon", move || load_model(&neon_path))),
            model: Some(AssetHandle::spawn("model", move || load_model(&model_path))),
            background,
        }
    }
}

/// Import a glTF/GLB file, flattening every node of the default scene into one mesh
pub fn load_model(path: &Path) -> Result<ModelAsset, AssetError> {
    let (document, buffers, _images) = gltf::import(path).map_err(|source| AssetError::Gltf {
        path: path.to_path_buf(),
        source,
    })?;

    let mut merged = MeshData::default();
    match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => {
            for node in scene.nodes() {
                append_node(&node, Mat4::IDENTITY, &buffers, &mut merged);
            }
        }
        None => {
            for mesh in document.meshes() {
                append_mesh(&mesh, Mat4::IDENTITY, &buffers, &mut merged);
            }
        }
    }

    if merged.indices.is_empty() {
        return Err(AssetError::EmptyModel(path.to_path_buf()));
    }

    merged.recenter();
    let bounds = merged
        .bounds()
        .ok_or_else(|| AssetError::EmptyModel(path.to_path_buf()))?;

    tracing::info!(
        path = %path.display(),
        vertices = merged.vertex_count(),
        triangles = merged.index_count() / 3,
        "Model loaded"
    );

    Ok(ModelAsset { mesh: merged, bounds })
}

fn append_node(node: &gltf::Node, parent: Mat4, buffers: &[gltf::buffer::Data], out: &mut MeshData) {
    let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    if let Some(mesh) = node.mesh() {
        append_mesh(&mesh, transform, buffers, out);
    }
    for child in node.children() {
        append_node(&child, transform, buffers, out);
    }
}

fn append_mesh(mesh: &gltf::Mesh, transform: Mat4, buffers: &[gltf::buffer::Data], out: &mut MeshData) {
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            continue;
        }

        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| d.0.as_slice()));
        let Some(positions) = reader.read_positions() else {
            continue;
        };
        let positions: Vec<[f32; 3]> = positions.collect();
        let normals: Vec<[f32; 3]> = reader.read_normals().map(|n| n.collect()).unwrap_or_default();
        let uvs: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|t| t.into_f32().collect())
            .unwrap_or_default();

        let indices: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            // No indices: the positions are already a triangle list
            None => (0..positions.len() as u32).collect(),
        };

        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| Vertex {
                position,
                normal: normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]),
                uv: uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            })
            .collect();

        out.append_transformed(&MeshData { vertices, indices }, transform);
    }
}

/// Decode an image file to RGBA8
pub fn load_image(path: &Path) -> Result<ImageData, AssetError> {
    let image = image::open(path)
        .map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    let (width, height) = image.dimensions();
    tracing::debug!(path = %path.display(), width, height, "Image loaded");

    Ok(ImageData {
        width,
        height,
        rgba: image.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait<T: Send + 'static>(handle: &mut AssetHandle<T>) -> Result<T, AssetError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(result) = handle.poll() {
                return result;
            }
            assert!(Instant::now() < deadline, "asset {} never resolved", handle.name());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_handle_resolves_once() {
        let mut handle = AssetHandle::spawn("answer", || Ok(42));
        assert_eq!(wait(&mut handle).unwrap(), 42);
        assert!(handle.is_finished());
        assert!(handle.poll().is_none());
    }

    #[test]
    fn test_handle_reports_failure() {
        let mut handle: AssetHandle<u32> =
            AssetHandle::spawn("broken", || Err(AssetError::EmptyModel(PathBuf::from("x.gltf"))));
        assert!(matches!(wait(&mut handle), Err(AssetError::EmptyModel(_))));
    }

    #[test]
    fn test_panicking_loader_disconnects() {
        let mut handle: AssetHandle<u32> = AssetHandle::spawn("panics", || panic!("loader crashed"));
        assert!(matches!(wait(&mut handle), Err(AssetError::Disconnected(name)) if name == "panics"));
    }

    #[test]
    fn test_ready_handle() {
        let mut handle = AssetHandle::ready("now", "value");
        assert_eq!(handle.poll().unwrap().unwrap(), "value");
    }

    #[test]
    fn test_missing_files_fail() {
        assert!(matches!(
            load_model(Path::new("definitely/missing/model.gltf")),
            Err(AssetError::Gltf { .. })
        ));
        assert!(matches!(
            load_image(Path::new("definitely/missing/bg.png")),
            Err(AssetError::Image { .. })
        ));
    }

    #[test]
    fn test_load_model_merges_node_instances() {
        let dir = std::env::temp_dir().join(format!("neon-mirror-gltf-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        std::fs::write(dir.join("triangle.bin"), bytemuck::cast_slice(&positions)).unwrap();
        let gltf = r#"{
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "nodes": [0, 1] }],
            "nodes": [
                { "mesh": 0 },
                { "mesh": 0, "translation": [3.0, 0.0, 0.0] }
            ],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
            "buffers": [{ "uri": "triangle.bin", "byteLength": 36 }],
            "bufferViews": [{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }],
            "accessors": [{
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "min": [0.0, 0.0, 0.0],
                "max": [1.0, 1.0, 0.0]
            }]
        }"#;
        let path = dir.join("pair.gltf");
        std::fs::write(&path, gltf).unwrap();

        let model = load_model(&path).unwrap();
        assert_eq!(model.mesh.vertex_count(), 6);
        assert_eq!(model.mesh.index_count(), 6);
        assert!((model.bounds.size().x - 4.0).abs() < 1e-5);
        assert!(model.bounds.center().length() < 1e-5);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
