//! Math type re-exports and bounding-box utilities.
//!
//! This module re-exports the `glam` types used across the crate and
//! provides [`BBox3f`], the bounds type shared by the BVH builder, the
//! flattener and the scene graph.

pub use glam::{Mat3, Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// 3D bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BBox3f {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox3f {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Bounds of a set of points; empty for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_by_point(p);
        }
        b
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area (for SAH cost). Zero for empty boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Bounds of this box after an affine transform.
    ///
    /// Each basis column is scaled by the min and max extent on its axis and the
    /// smaller/larger products are summed onto the translation (Arvo's method), so
    /// the cost is constant regardless of the geometry inside the box.
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let translation = m.w_axis.truncate();
        let mut min = translation;
        let mut max = translation;
        let basis = [m.x_axis.truncate(), m.y_axis.truncate(), m.z_axis.truncate()];
        for (axis, column) in basis.iter().enumerate() {
            let a = *column * self.min[axis];
            let b = *column * self.max[axis];
            min += a.min(b);
            max += a.max(b);
        }
        Self { min, max }
    }

    /// Slab test. Returns the entry distance if the ray hits within `[t_min, t_max]`.
    #[inline]
    pub fn intersect_ray(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(t_min);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

impl Default for BBox3f {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BBox3f {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BBox3f({:?} - {:?})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox3f() {
        let mut b = BBox3f::EMPTY;
        assert!(b.is_empty());

        b.expand_by_point(Vec3::ZERO);
        assert!(!b.is_empty());
        assert_eq!(b.min, Vec3::ZERO);
        assert_eq!(b.max, Vec3::ZERO);

        b.expand_by_point(Vec3::ONE);
        assert_eq!(b.min, Vec3::ZERO);
        assert_eq!(b.max, Vec3::ONE);
        assert_eq!(b.center(), Vec3::splat(0.5));
        assert_eq!(b.size(), Vec3::ONE);
        assert_eq!(b.area(), 6.0);
    }

    #[test]
    fn test_empty_box_ignored_on_expand() {
        let mut b = BBox3f::new(Vec3::ZERO, Vec3::ONE);
        b.expand_by_box(&BBox3f::EMPTY);
        assert_eq!(b, BBox3f::new(Vec3::ZERO, Vec3::ONE));
        assert_eq!(BBox3f::EMPTY.area(), 0.0);
    }

    #[test]
    fn test_longest_axis() {
        let b = BBox3f::new(Vec3::ZERO, Vec3::new(1.0, 3.0, 2.0));
        assert_eq!(b.longest_axis(), 1);
    }

    #[test]
    fn test_transformed_matches_corners() {
        let b = BBox3f::new(Vec3::new(-1.0, 0.0, -2.0), Vec3::new(1.0, 2.0, 0.5));
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.3),
            Vec3::new(5.0, -1.0, 3.0),
        );

        let mut expected = BBox3f::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { b.min.x } else { b.max.x },
                if i & 2 == 0 { b.min.y } else { b.max.y },
                if i & 4 == 0 { b.min.z } else { b.max.z },
            );
            expected.expand_by_point(m.transform_point3(corner));
        }

        let got = b.transformed(&m);
        assert!((got.min - expected.min).abs().max_element() < 1e-4);
        assert!((got.max - expected.max).abs().max_element() < 1e-4);
    }

    #[test]
    fn test_intersect_ray() {
        let b = BBox3f::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let origin = Vec3::new(0.0, 0.0, 5.0);
        let dir = Vec3::new(0.0, 0.0, -1.0);
        let t = b.intersect_ray(origin, dir.recip(), 0.0, f32::MAX);
        assert_eq!(t, Some(4.0));
        assert!(b.intersect_ray(origin, -dir.recip(), 0.0, f32::MAX).is_none());
        assert!(BBox3f::EMPTY.intersect_ray(origin, dir.recip(), 0.0, f32::MAX).is_none());
    }

    #[test]
    fn test_bbox_pod() {
        assert_eq!(std::mem::size_of::<BBox3f>(), 24);
    }
}
