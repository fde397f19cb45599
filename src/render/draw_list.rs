//! Per-frame draw lists
//!
//! The glow pass draws a filtered copy of the scene's draw list, so live
//! layer materials are never swapped out and back.

use glam::Mat4;

use crate::scene::{LayerAsset, LayerGraph, LayerKind, LayerMaterial};

/// Material a draw item is rendered with
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DrawMaterial {
    /// The layer's own material
    Surface(LayerMaterial),
    /// Opaque black, hides glow behind non-glowing geometry
    Occluder,
    /// Black cut out by the matte alpha
    MatteOccluder,
}

impl DrawMaterial {
    /// Blended and drawn after all opaque items, without writing depth
    pub fn is_transparent(&self) -> bool {
        matches!(
            self,
            DrawMaterial::Surface(LayerMaterial::Matte) | DrawMaterial::MatteOccluder
        )
    }
}

/// One mesh to draw
#[derive(Clone, Debug)]
pub struct DrawItem {
    pub kind: LayerKind,
    pub asset: LayerAsset,
    pub model: Mat4,
    pub depth: f32,
    pub material: DrawMaterial,
    pub bloom: bool,
}

/// Ordered draws for one pass: opaque far to near, then transparent
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    items: Vec<DrawItem>,
}

impl DrawList {
    /// Visible, loaded layers. The user plane is left out until a matte texture exists.
    pub fn from_graph(graph: &LayerGraph, matte_available: bool) -> Self {
        let mut items: Vec<DrawItem> = graph
            .layers()
            .iter()
            .filter(|layer| layer.is_drawable())
            .filter(|layer| matte_available || !layer.material.is_transparent())
            .filter_map(|layer| {
                let asset = layer.content.asset()?.clone();
                Some(DrawItem {
                    kind: layer.kind,
                    asset,
                    model: layer.model_matrix(),
                    depth: layer.depth,
                    material: DrawMaterial::Surface(layer.material),
                    bloom: layer.bloom,
                })
            })
            .collect();

        items.sort_by(|a, b| {
            a.material
                .is_transparent()
                .cmp(&b.material.is_transparent())
                .then(a.depth.total_cmp(&b.depth))
        });

        Self { items }
    }

    /// Copy of this list for the glow pass
    pub fn glow_pass(&self) -> Self {
        Self {
            items: glow_pass_items(&self.items),
        }
    }

    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Replace the material of every non-glowing item with a black occluder.
///
/// Order and geometry are kept, so occluders still hide glow behind them.
pub fn glow_pass_items(items: &[DrawItem]) -> Vec<DrawItem> {
    items
        .iter()
        .map(|item| {
            let mut glow = item.clone();
            if !item.bloom {
                glow.material = if item.material.is_transparent() {
                    DrawMaterial::MatteOccluder
                } else {
                    DrawMaterial::Occluder
                };
            }
            glow
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Aabb, LayerContent, MeshData, Mode, SceneConfig};
    use glam::Vec3;
    use std::sync::Arc;

    fn graph_with_models(mode: Mode) -> LayerGraph {
        let mut graph = LayerGraph::new(&SceneConfig::default());
        let mesh = Arc::new(MeshData::plane(1.0, 1.0, 1));
        let bounds = Aabb {
            min: Vec3::new(-0.5, -0.5, 0.0),
            max: Vec3::new(0.5, 0.5, 0.0),
        };
        for kind in [LayerKind::NeonModel, LayerKind::MainModel] {
            graph.layer_mut(kind).content = LayerContent::Ready(LayerAsset::Model {
                mesh: mesh.clone(),
                bounds,
            });
        }
        graph.apply_mode(mode);
        graph
    }

    #[test]
    fn test_user_plane_waits_for_matte() {
        let graph = graph_with_models(Mode::One);
        let kinds: Vec<_> = DrawList::from_graph(&graph, false).items().iter().map(|i| i.kind).collect();
        // Textured background is still loading
        assert_eq!(kinds, vec![LayerKind::NeonModel]);

        let kinds: Vec<_> = DrawList::from_graph(&graph, true).items().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![LayerKind::NeonModel, LayerKind::UserPlane]);
    }

    #[test]
    fn test_transparent_items_last() {
        // Mode 2 puts the neon sign in front of the user
        let graph = graph_with_models(Mode::Two);
        let list = DrawList::from_graph(&graph, true);
        let last = list.items().last().unwrap();
        assert_eq!(last.kind, LayerKind::UserPlane);
        assert!(list.items()[..list.len() - 1].iter().all(|i| !i.material.is_transparent()));
    }

    #[test]
    fn test_glow_pass_only_carries_bloom_materials() {
        for mode in Mode::ALL {
            let graph = graph_with_models(mode);
            let list = DrawList::from_graph(&graph, true);
            let glow = list.glow_pass();
            assert_eq!(glow.len(), list.len());

            for item in glow.items() {
                match item.material {
                    DrawMaterial::Surface(_) => assert!(item.bloom, "{:?} kept its material in {}", item.kind, mode),
                    DrawMaterial::Occluder => assert!(!item.bloom),
                    DrawMaterial::MatteOccluder => assert_eq!(item.kind, LayerKind::UserPlane),
                }
            }
        }
    }

    #[test]
    fn test_glow_pass_leaves_source_untouched() {
        let graph = graph_with_models(Mode::Three);
        let list = DrawList::from_graph(&graph, true);
        let before: Vec<_> = list.items().iter().map(|i| i.material).collect();
        let _ = list.glow_pass();
        let after: Vec<_> = list.items().iter().map(|i| i.material).collect();
        assert_eq!(before, after);
        assert!(after.contains(&DrawMaterial::Surface(LayerMaterial::Fabric)));
    }
}
