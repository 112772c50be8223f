//! Bounding volume hierarchies.
//!
//! Two levels are built with the same binned-SAH builder:
//! - one bottom-level tree per mesh, over triangle bounds
//! - one top-level tree over world-space instance bounds
//!
//! Builders emit a [`Bvh`] arena with explicit child indices. The
//! [`BvhFlattener`] then links every tree into the single pre-order
//! [`FlatNode`] array the render device traverses.

mod build;
mod flatten;

pub use build::{build_bvh, BuildParams};
pub use flatten::{BvhFlattener, FlatNode, InstanceRef, NodeKind, NodeStats};

use crate::util::BBox3f;

/// What a builder node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhNodeKind {
    /// Children live at arbitrary indices of the same arena.
    Internal { left: u32, right: u32 },
    /// Range into [`Bvh::prim_indices`].
    Leaf { start: u32, count: u32 },
}

/// Arena node produced by [`build_bvh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub bounds: BBox3f,
    pub kind: BvhNodeKind,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, BvhNodeKind::Leaf { .. })
    }
}

/// Built BVH result.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    /// Node arena (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<u32>,
}

impl Bvh {
    /// Root bounds, empty for a tree without primitives.
    pub fn bounds(&self) -> BBox3f {
        self.nodes.first().map(|n| n.bounds).unwrap_or(BBox3f::EMPTY)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn prim_count(&self) -> usize {
        self.prim_indices.len()
    }
}
