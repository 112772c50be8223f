//! Analytic lights.

use bytemuck::{Pod, Zeroable};

use crate::util::Vec3;

/// Light shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Parallelogram spanned by `u` and `v` at `position`.
    Rect,
    Sphere,
    /// Directional light shining along `-position`.
    Distant,
}

impl LightKind {
    fn code(self) -> u32 {
        match self {
            LightKind::Rect => 0,
            LightKind::Sphere => 1,
            LightKind::Distant => 2,
        }
    }
}

/// Light record for device storage (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Light {
    pub position: [f32; 3],
    pub radius: f32,
    pub emission: [f32; 3],
    pub area: f32,
    pub u: [f32; 3],
    kind: u32,
    pub v: [f32; 3],
    _pad: f32,
}

impl Light {
    /// Rect light with corner `position` and edges `u`, `v`.
    pub fn rect(position: Vec3, u: Vec3, v: Vec3, emission: Vec3) -> Self {
        Self {
            position: position.to_array(),
            radius: 0.0,
            emission: emission.to_array(),
            area: u.cross(v).length(),
            u: u.to_array(),
            kind: LightKind::Rect.code(),
            v: v.to_array(),
            _pad: 0.0,
        }
    }

    pub fn sphere(position: Vec3, radius: f32, emission: Vec3) -> Self {
        Self {
            position: position.to_array(),
            radius,
            emission: emission.to_array(),
            area: 4.0 * std::f32::consts::PI * radius * radius,
            u: [0.0; 3],
            kind: LightKind::Sphere.code(),
            v: [0.0; 3],
            _pad: 0.0,
        }
    }

    pub fn distant(direction: Vec3, emission: Vec3) -> Self {
        Self {
            position: (-direction.normalize_or_zero()).to_array(),
            radius: 0.0,
            emission: emission.to_array(),
            area: 0.0,
            u: [0.0; 3],
            kind: LightKind::Distant.code(),
            v: [0.0; 3],
            _pad: 0.0,
        }
    }

    pub fn kind(&self) -> LightKind {
        match self.kind {
            0 => LightKind::Rect,
            1 => LightKind::Sphere,
            _ => LightKind::Distant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_size() {
        assert_eq!(std::mem::size_of::<Light>(), 64);
    }

    #[test]
    fn test_rect_area() {
        let l = Light::rect(Vec3::ZERO, Vec3::X * 2.0, Vec3::Z * 3.0, Vec3::ONE);
        assert_eq!(l.area, 6.0);
        assert_eq!(l.kind(), LightKind::Rect);
    }
}
