//! Surface materials.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Texture slot value meaning "no texture".
pub const NO_TEXTURE: i32 = -1;

/// Material parameters for device storage (64 bytes).
///
/// Layout packs scalars into the `w` lane of the preceding vec3:
/// - `base_color` + `metallic`
/// - `emission` + `roughness`
/// - `opacity`, `ior`, `spec_trans`, `clearcoat`
/// - four texture slots, [`NO_TEXTURE`] when unused
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub base_color: [f32; 3],
    pub metallic: f32,
    pub emission: [f32; 3],
    pub roughness: f32,
    pub opacity: f32,
    pub ior: f32,
    pub spec_trans: f32,
    pub clearcoat: f32,
    pub base_color_tex: i32,
    pub metallic_roughness_tex: i32,
    pub normal_tex: i32,
    pub emission_tex: i32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0],
            metallic: 0.0,
            emission: [0.0, 0.0, 0.0],
            roughness: 0.5,
            opacity: 1.0,
            ior: 1.45,
            spec_trans: 0.0,
            clearcoat: 0.0,
            base_color_tex: NO_TEXTURE,
            metallic_roughness_tex: NO_TEXTURE,
            normal_tex: NO_TEXTURE,
            emission_tex: NO_TEXTURE,
        }
    }
}

impl Material {
    pub fn diffuse(color: [f32; 3]) -> Self {
        Self {
            base_color: color,
            ..Default::default()
        }
    }

    pub fn emissive(emission: [f32; 3]) -> Self {
        Self {
            base_color: [0.0; 3],
            emission,
            ..Default::default()
        }
    }

    /// Every texture slot in use.
    pub fn texture_slots(&self) -> impl Iterator<Item = i32> {
        [
            self.base_color_tex,
            self.metallic_roughness_tex,
            self.normal_tex,
            self.emission_tex,
        ]
        .into_iter()
        .filter(|&t| t != NO_TEXTURE)
    }
}
