//! Placements of meshes in the world.

use crate::util::{BBox3f, Mat4};

/// One placement of a mesh with its own transform and material.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshInstance {
    pub name: String,
    pub mesh_id: usize,
    pub material_id: usize,
    pub transform: Mat4,
}

impl MeshInstance {
    pub fn new(name: impl Into<String>, mesh_id: usize, material_id: usize, transform: Mat4) -> Self {
        Self {
            name: name.into(),
            mesh_id,
            material_id,
            transform,
        }
    }

    /// World bounds of this instance given its mesh's local bounds.
    #[inline]
    pub fn world_bounds(&self, local: &BBox3f) -> BBox3f {
        local.transformed(&self.transform)
    }
}
