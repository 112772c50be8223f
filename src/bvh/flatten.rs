//! Two-level BVH flattening.
//!
//! All bottom-level trees are laid out first, in mesh order, followed by the
//! top-level tree starting at [`BvhFlattener::top_level_index`]. Every tree is
//! written in pre-order (node, left subtree, right subtree) with absolute child
//! indices, so a device can walk the whole structure with a plain index stack.
//!
//! Record layout (`lr_leaf`):
//! - internal node: `(left, right, 0)`
//! - geometry leaf: `(first_tri, tri_count, 1)`
//! - instance leaf: `(blas_root, material_id, -instance_id - 1)`

use bytemuck::{Pod, Zeroable};

use super::{Bvh, BvhNodeKind};
use crate::util::{BBox3f, Error, Result, Vec3};

const TAG_INTERNAL: i32 = 0;
const TAG_GEOMETRY: i32 = 1;

/// Device node record (36 bytes).
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FlatNode {
    bbox_min: [f32; 3],
    bbox_max: [f32; 3],
    lr_leaf: [i32; 3],
}

/// Decoded view of a [`FlatNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal { left: u32, right: u32 },
    Geometry { first_tri: u32, tri_count: u32 },
    Instance { blas_root: u32, material_id: u32, instance_id: u32 },
}

impl FlatNode {
    pub fn internal(bounds: BBox3f, left: u32, right: u32) -> Self {
        Self::with_tag(bounds, left as i32, right as i32, TAG_INTERNAL)
    }

    pub fn geometry(bounds: BBox3f, first_tri: u32, tri_count: u32) -> Self {
        Self::with_tag(bounds, first_tri as i32, tri_count as i32, TAG_GEOMETRY)
    }

    pub fn instance(bounds: BBox3f, blas_root: u32, material_id: u32, instance_id: u32) -> Self {
        Self::with_tag(bounds, blas_root as i32, material_id as i32, -(instance_id as i32) - 1)
    }

    #[inline]
    fn with_tag(bounds: BBox3f, a: i32, b: i32, tag: i32) -> Self {
        Self {
            bbox_min: bounds.min.to_array(),
            bbox_max: bounds.max.to_array(),
            lr_leaf: [a, b, tag],
        }
    }

    pub fn bounds(&self) -> BBox3f {
        BBox3f::new(Vec3::from_array(self.bbox_min), Vec3::from_array(self.bbox_max))
    }

    /// Raw `(a, b, tag)` triple as stored on the device.
    pub fn raw(&self) -> [i32; 3] {
        self.lr_leaf
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        let [a, b, tag] = self.lr_leaf;
        match tag {
            TAG_INTERNAL => NodeKind::Internal {
                left: a as u32,
                right: b as u32,
            },
            TAG_GEOMETRY => NodeKind::Geometry {
                first_tri: a as u32,
                tri_count: b as u32,
            },
            t if t < 0 => NodeKind::Instance {
                blas_root: a as u32,
                material_id: b as u32,
                instance_id: (-t - 1) as u32,
            },
            t => panic!("corrupt flat node tag {t}"),
        }
    }

    fn set_child(&mut self, right: bool, index: u32) {
        debug_assert_eq!(self.lr_leaf[2], TAG_INTERNAL);
        self.lr_leaf[right as usize] = index as i32;
    }
}

impl std::fmt::Debug for FlatNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FlatNode({:?}, {:?})", self.kind(), self.bounds())
    }
}

/// What a top-level leaf needs to know about its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRef {
    pub mesh_id: u32,
    pub material_id: u32,
}

/// Node counts per kind, for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub internal: usize,
    pub geometry_leaves: usize,
    pub instance_leaves: usize,
}

/// Owns the flattened node array of the whole scene.
#[derive(Debug, Clone, Default)]
pub struct BvhFlattener {
    nodes: Vec<FlatNode>,
    blas_root_offsets: Vec<u32>,
    tri_offsets: Vec<u32>,
    top_level_index: usize,
    instance_count: usize,
}

impl BvhFlattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten every bottom-level tree, then the top-level tree.
    ///
    /// Geometry leaves are rebased onto the concatenated triangle array, in
    /// mesh order and each mesh's primitive order. Instance leaves resolve to
    /// the referenced mesh's root offset.
    ///
    /// # Panics
    /// On malformed trees or an instance referencing an unknown mesh.
    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    pub fn full_rebuild<'a>(
        &mut self,
        blas: impl IntoIterator<Item = &'a Bvh>,
        tlas: &Bvh,
        instances: &[InstanceRef],
    ) {
        self.nodes.clear();
        self.blas_root_offsets.clear();
        self.tri_offsets.clear();

        let mut tri_base = 0u32;
        for tree in blas {
            let root = flatten_tree(tree, 0, &mut self.nodes, |bounds, start, count| {
                FlatNode::geometry(bounds, tri_base + start, count)
            });
            self.blas_root_offsets.push(root);
            self.tri_offsets.push(tri_base);
            tri_base += tree.prim_count() as u32;
        }

        self.top_level_index = self.nodes.len();
        self.instance_count = instances.len();

        let mut top = Vec::with_capacity(tlas.node_count());
        self.flatten_top_level(tlas, instances, &mut top);
        self.nodes.extend_from_slice(&top);

        tracing::debug!(
            meshes = self.blas_root_offsets.len(),
            top_level_index = self.top_level_index,
            total_nodes = self.nodes.len(),
            "flattened scene BVH"
        );
    }

    /// Re-flatten only the top-level region in place.
    ///
    /// Entries before [`top_level_index`](Self::top_level_index) are never
    /// written. Fails with [`Error::TopologyChanged`] when the instance count or
    /// the top-level node count differs from the last full rebuild.
    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    pub fn incremental_rebuild(&mut self, tlas: &Bvh, instances: &[InstanceRef]) -> Result<()> {
        if instances.len() != self.instance_count {
            return Err(Error::TopologyChanged {
                what: "instances",
                expected: self.instance_count,
                actual: instances.len(),
            });
        }

        let mut top = Vec::with_capacity(tlas.node_count());
        self.flatten_top_level(tlas, instances, &mut top);

        let region = &mut self.nodes[self.top_level_index..];
        if top.len() != region.len() {
            return Err(Error::TopologyChanged {
                what: "top-level nodes",
                expected: region.len(),
                actual: top.len(),
            });
        }
        region.copy_from_slice(&top);
        Ok(())
    }

    fn flatten_top_level(&self, tlas: &Bvh, instances: &[InstanceRef], out: &mut Vec<FlatNode>) {
        let base = self.top_level_index;
        let roots = &self.blas_root_offsets;
        flatten_tree(tlas, base, out, |bounds, start, count| {
            match count {
                0 => FlatNode::geometry(BBox3f::EMPTY, 0, 0),
                1 => {
                    let instance_id = tlas.prim_indices[start as usize];
                    let inst = instances
                        .get(instance_id as usize)
                        .unwrap_or_else(|| panic!("top-level leaf references instance {instance_id}"));
                    let root = roots
                        .get(inst.mesh_id as usize)
                        .unwrap_or_else(|| panic!("instance {instance_id} references unknown mesh {}", inst.mesh_id));
                    FlatNode::instance(bounds, *root, inst.material_id, instance_id)
                }
                n => panic!("top-level leaf holds {n} instances"),
            }
        });
    }

    /// The whole array: bottom-level prefix followed by the top-level region.
    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    /// Index of the first top-level node, equal to the bottom-level node count.
    pub fn top_level_index(&self) -> usize {
        self.top_level_index
    }

    /// The region rewritten by [`incremental_rebuild`](Self::incremental_rebuild).
    pub fn top_level_nodes(&self) -> &[FlatNode] {
        &self.nodes[self.top_level_index..]
    }

    pub fn blas_root_offsets(&self) -> &[u32] {
        &self.blas_root_offsets
    }

    /// First global triangle of each mesh.
    pub fn tri_offsets(&self) -> &[u32] {
        &self.tri_offsets
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    /// World bounds of every instance, empty when there are none.
    pub fn scene_bounds(&self) -> BBox3f {
        self.nodes
            .get(self.top_level_index)
            .map(|n| n.bounds())
            .unwrap_or(BBox3f::EMPTY)
    }

    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.nodes)
    }

    pub fn stats(&self) -> NodeStats {
        let mut stats = NodeStats::default();
        for node in &self.nodes {
            match node.kind() {
                NodeKind::Internal { .. } => stats.internal += 1,
                NodeKind::Geometry { .. } => stats.geometry_leaves += 1,
                NodeKind::Instance { .. } => stats.instance_leaves += 1,
            }
        }
        stats
    }

    /// Check the layout invariants of the whole array.
    pub fn validate(&self) -> Result<()> {
        let tli = self.top_level_index;
        if tli >= self.nodes.len() {
            return Err(Error::other(format!(
                "top-level index {tli} outside {} nodes",
                self.nodes.len()
            )));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let in_top = i >= tli;
            match node.kind() {
                NodeKind::Internal { left, right } => {
                    let (lo, hi) = if in_top { (tli, self.nodes.len()) } else { (0, tli) };
                    for child in [left, right] {
                        let c = child as usize;
                        if c <= i || c < lo || c >= hi {
                            return Err(Error::other(format!("node {i} has child {c} outside its region")));
                        }
                    }
                    if left as usize != i + 1 {
                        return Err(Error::other(format!("node {i} is not in pre-order")));
                    }
                }
                NodeKind::Geometry { .. } => {}
                NodeKind::Instance {
                    blas_root,
                    instance_id,
                    ..
                } => {
                    if !in_top {
                        return Err(Error::other(format!("instance leaf {i} in bottom-level region")));
                    }
                    if !self.blas_root_offsets.contains(&blas_root) {
                        return Err(Error::other(format!(
                            "instance {instance_id} points at {blas_root}, not a mesh root"
                        )));
                    }
                    if instance_id as usize >= self.instance_count {
                        return Err(Error::other(format!("instance id {instance_id} out of range")));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pre-order copy of `tree` into `out`; node `k` of `out` lands at `base + k`
/// of the final array. Returns the absolute root index.
fn flatten_tree<F>(tree: &Bvh, base: usize, out: &mut Vec<FlatNode>, mut make_leaf: F) -> u32
where
    F: FnMut(BBox3f, u32, u32) -> FlatNode,
{
    let root = (base + out.len()) as u32;
    let start_len = out.len();
    // (source node, parent slot in `out`, is right child)
    let mut stack: Vec<(u32, Option<(usize, bool)>)> = vec![(0, None)];
    let mut visited = 0usize;

    while let Some((src, parent)) = stack.pop() {
        let node = tree
            .nodes
            .get(src as usize)
            .unwrap_or_else(|| panic!("BVH child {src} out of range ({} nodes)", tree.nodes.len()));
        visited += 1;
        assert!(
            visited <= tree.nodes.len(),
            "BVH contains a cycle ({} nodes, {} visits)",
            tree.nodes.len(),
            visited
        );

        let slot = out.len();
        let abs = (base + slot) as u32;
        if let Some((p, right)) = parent {
            out[p].set_child(right, abs);
        }

        match node.kind {
            BvhNodeKind::Internal { left, right } => {
                out.push(FlatNode::internal(node.bounds, 0, 0));
                stack.push((right, Some((slot, true))));
                stack.push((left, Some((slot, false))));
            }
            BvhNodeKind::Leaf { start, count } => {
                out.push(make_leaf(node.bounds, start, count));
            }
        }
    }

    debug_assert!(out.len() > start_len);
    root
}
