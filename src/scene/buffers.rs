//! Device-ready scene arrays.

use crate::util::Mat4;

/// Concatenated geometry, transforms and textures.
///
/// Triangles are stored in bottom-level primitive order so geometry leaves
/// index `vertex_indices` directly.
#[derive(Debug, Clone, Default)]
pub struct SceneBuffers {
    /// Global vertex indices per triangle.
    pub vertex_indices: Vec<[u32; 3]>,
    /// `[x, y, z, u]` per vertex.
    pub vertices_uvx: Vec<[f32; 4]>,
    /// `[nx, ny, nz, v]` per vertex.
    pub normals_uvy: Vec<[f32; 4]>,
    /// One per instance, same order as the scene's instances.
    pub transforms: Vec<Mat4>,
    /// RGBA8 layers of `texture_size`, back to back.
    pub texture_array: Vec<u8>,
    pub texture_size: (u32, u32),
    pub texture_count: usize,
}

impl SceneBuffers {
    pub fn triangle_count(&self) -> usize {
        self.vertex_indices.len()
    }

    pub fn vertex_index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertex_indices)
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices_uvx)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals_uvy)
    }

    pub fn transform_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.transforms)
    }

    /// Total size of every array, for logging.
    pub fn byte_size(&self) -> usize {
        self.vertex_index_bytes().len()
            + self.vertex_bytes().len()
            + self.normal_bytes().len()
            + self.transform_bytes().len()
            + self.texture_array.len()
    }
}
