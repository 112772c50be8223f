//! SAH-based BVH builder.
//!
//! Constructs a node arena from a list of primitive bounds. Uses the
//! Surface Area Heuristic for split decisions; children are always
//! allocated as adjacent pairs but are addressed explicitly so the
//! flattener never relies on this layout.

use super::{Bvh, BvhNode, BvhNodeKind};
use crate::util::{BBox3f, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Builder knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildParams {
    /// Ranges at or below this size become leaves.
    pub max_leaf_size: usize,
    /// Let SAH stop early with a larger leaf when splitting costs more.
    /// Off for the top level, where every leaf must hold exactly one instance.
    pub sah_leaves: bool,
}

impl BuildParams {
    /// Bottom-level trees over triangles.
    pub const MESH: Self = Self {
        max_leaf_size: 4,
        sah_leaves: true,
    };

    /// Top-level tree over instances: one instance per leaf, `2n - 1` nodes.
    pub const INSTANCES: Self = Self {
        max_leaf_size: 1,
        sah_leaves: false,
    };
}

impl Default for BuildParams {
    fn default() -> Self {
        Self::MESH
    }
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: BBox3f,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: BBox3f::EMPTY,
        count: 0,
    };
}

/// Build a BVH over primitive bounds using binned SAH.
///
/// Returns the node arena plus a reordered primitive index list. With no
/// primitives the tree is a single empty leaf.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[BBox3f], params: BuildParams) -> Bvh {
    let n = bounds.len();
    let max_leaf = params.max_leaf_size.max(1);

    if n == 0 {
        return Bvh {
            nodes: vec![leaf(BBox3f::EMPTY, 0, 0)],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = bounds.iter().map(|b| b.center()).collect();

    // Working index array (will be reordered by partitioning)
    let mut indices: Vec<u32> = (0..n as u32).collect();

    // Worst case: 2*n - 1 for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(leaf(BBox3f::EMPTY, 0, 0));

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let (start, end) = (task.start, task.end);
        let count = end - start;

        let mut node_bounds = BBox3f::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&bounds[idx as usize]);
        }

        if count <= max_leaf {
            nodes[task.node_idx] = leaf(node_bounds, start, count);
            continue;
        }

        let mut centroid_bounds = BBox3f::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx as usize]);
        }

        let split = find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);

        if params.sah_leaves {
            let area = node_bounds.area().max(f32::MIN_POSITIVE);
            let leaf_cost = count as f32 * INTERSECT_COST;
            let split_cheaper = split.is_some_and(|(_, _, cost)| TRAVERSAL_COST + cost / area < leaf_cost);
            if !split_cheaper {
                nodes[task.node_idx] = leaf(node_bounds, start, count);
                continue;
            }
        }

        let mid = match split {
            Some((axis, pos, _)) => {
                partition(&mut indices[start..end], |&idx| centroids[idx as usize][axis] < pos) + start
            }
            None => start,
        };

        // Degenerate partition or coincident centroids: split in the middle
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left_idx = nodes.len();
        let right_idx = left_idx + 1;
        nodes.push(leaf(BBox3f::EMPTY, 0, 0));
        nodes.push(leaf(BBox3f::EMPTY, 0, 0));

        nodes[task.node_idx] = BvhNode {
            bounds: node_bounds,
            kind: BvhNodeKind::Internal {
                left: left_idx as u32,
                right: right_idx as u32,
            },
        };

        // Right first so left is processed first
        stack.push(Task {
            node_idx: right_idx,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

#[inline]
fn leaf(bounds: BBox3f, start: usize, count: usize) -> BvhNode {
    BvhNode {
        bounds,
        kind: BvhNodeKind::Leaf {
            start: start as u32,
            count: count as u32,
        },
    }
}

/// SAH binned split search across all 3 axes.
/// Returns (axis, split_position, area-weighted cost), or `None` if every
/// axis is degenerate.
fn find_best_split(
    indices: &[u32],
    bounds: &[BBox3f],
    centroids: &[Vec3],
    centroid_bounds: &BBox3f,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((centroids[idx as usize][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&bounds[idx as usize]);
            bin.count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = BBox3f::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = BBox3f::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            if sweep_count == 0 || left_count[i - 1] == 0 {
                continue;
            }
            let cost =
                INTERSECT_COST * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.area());

            if best.map(|(_, _, c)| cost < c).unwrap_or(true) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(cx: f32, cy: f32, cz: f32) -> BBox3f {
        BBox3f::new(Vec3::new(cx - 0.5, cy - 0.5, cz), Vec3::new(cx + 0.5, cy + 0.5, cz))
    }

    fn leaves(bvh: &Bvh) -> Vec<(u32, u32)> {
        bvh.nodes
            .iter()
            .filter_map(|n| match n.kind {
                BvhNodeKind::Leaf { start, count } => Some((start, count)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[], BuildParams::MESH);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.prim_indices.len(), 0);
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_single_primitive() {
        let bvh = build_bvh(&[unit_box(0.0, 0.0, 0.0)], BuildParams::MESH);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].kind, BvhNodeKind::Leaf { start: 0, count: 1 });
    }

    #[test]
    fn test_many_primitives_builds_tree() {
        let boxes: Vec<BBox3f> = (0..100).map(|i| unit_box(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&boxes, BuildParams::MESH);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = bvh.bounds();
        assert!(root.min.x < 0.0);
        assert!(root.max.x > 198.0);

        // Leaves cover every primitive exactly once
        let covered: u32 = leaves(&bvh).iter().map(|&(_, c)| c).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn test_small_set_is_single_leaf() {
        let boxes = vec![unit_box(0.0, 0.0, 0.0), unit_box(1.0, 0.0, 0.0), unit_box(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&boxes, BuildParams::MESH);
        assert_eq!(bvh.nodes[0].kind, BvhNodeKind::Leaf { start: 0, count: 3 });
    }

    #[test]
    fn test_instance_params_one_prim_per_leaf() {
        // Coincident boxes defeat SAH binning; the builder must still split
        let boxes = vec![unit_box(0.0, 0.0, 0.0); 7];
        let bvh = build_bvh(&boxes, BuildParams::INSTANCES);
        assert_eq!(bvh.nodes.len(), 2 * 7 - 1);
        assert!(leaves(&bvh).iter().all(|&(_, c)| c == 1));
    }

    #[test]
    fn test_children_in_range() {
        let boxes: Vec<BBox3f> = (0..37).map(|i| unit_box((i * 7 % 11) as f32, i as f32, 0.0)).collect();
        let bvh = build_bvh(&boxes, BuildParams::INSTANCES);
        for node in &bvh.nodes {
            if let BvhNodeKind::Internal { left, right } = node.kind {
                assert!((left as usize) < bvh.nodes.len());
                assert!((right as usize) < bvh.nodes.len());
            }
        }
    }
}
