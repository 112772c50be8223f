//! Mesh geometry and its bottom-level BVH.

use crate::bvh::{build_bvh, BuildParams, Bvh};
use crate::util::{BBox3f, Error, Result, Vec2, Vec3};

/// Triangle mesh in local space.
///
/// Vertex records pack the texture `u` into `w` of the position and `v` into
/// `w` of the normal, matching the device-side layout.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    /// `[x, y, z, u]`
    pub vertices: Vec<[f32; 4]>,
    /// `[nx, ny, nz, v]`
    pub normals: Vec<[f32; 4]>,
    /// Local triangle index triples.
    pub indices: Vec<[u32; 3]>,
    bvh: Bvh,
    bvh_built: bool,
}

impl Mesh {
    /// Build from indexed data. Missing normals are computed (area weighted),
    /// missing uvs default to zero.
    pub fn from_indexed(
        name: impl Into<String>,
        positions: &[Vec3],
        normals: Option<&[Vec3]>,
        uvs: Option<&[Vec2]>,
        indices: &[u32],
    ) -> Result<Self> {
        let name = name.into();
        if indices.len() % 3 != 0 {
            return Err(Error::config(format!(
                "mesh '{name}': index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(Error::config(format!(
                "mesh '{name}': index {bad} out of range ({} vertices)",
                positions.len()
            )));
        }
        for (what, len) in [("normal", normals.map(<[Vec3]>::len)), ("uv", uvs.map(<[Vec2]>::len))] {
            if let Some(len) = len {
                if len != positions.len() {
                    return Err(Error::config(format!(
                        "mesh '{name}': {len} {what}s for {} vertices",
                        positions.len()
                    )));
                }
            }
        }

        let tris: Vec<[u32; 3]> = indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
        let normals = match normals {
            Some(n) => n.to_vec(),
            None => smooth_normals(positions, &tris),
        };

        let uv = |i: usize| uvs.map(|u| u[i]).unwrap_or(Vec2::ZERO);
        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, p)| [p.x, p.y, p.z, uv(i).x])
            .collect();
        let normals = normals
            .iter()
            .enumerate()
            .map(|(i, n)| [n.x, n.y, n.z, uv(i).y])
            .collect();

        Ok(Self {
            name,
            vertices,
            normals,
            indices: tris,
            ..Default::default()
        })
    }

    /// Build from a non-indexed triangle list (three positions per triangle).
    pub fn from_triangle_soup(name: impl Into<String>, positions: &[Vec3]) -> Result<Self> {
        let indices: Vec<u32> = (0..positions.len() as u32).collect();
        Self::from_indexed(name, positions, None, None, &indices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn position(&self, i: u32) -> Vec3 {
        let v = self.vertices[i as usize];
        Vec3::new(v[0], v[1], v[2])
    }

    /// Local bounds of one triangle.
    pub fn triangle_bounds(&self, tri: usize) -> BBox3f {
        let [a, b, c] = self.indices[tri];
        BBox3f::from_points([self.position(a), self.position(b), self.position(c)])
    }

    /// (Re)build the bottom-level BVH over this mesh's triangles.
    #[tracing::instrument(skip_all, fields(mesh = %self.name, tri_count = self.indices.len()))]
    pub fn build_bvh(&mut self) {
        let bounds: Vec<BBox3f> = (0..self.indices.len()).map(|t| self.triangle_bounds(t)).collect();
        self.bvh = build_bvh(&bounds, BuildParams::MESH);
        self.bvh_built = true;
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn has_bvh(&self) -> bool {
        self.bvh_built
    }

    /// Local bounds, from the BVH root when built.
    pub fn local_bounds(&self) -> BBox3f {
        if self.bvh_built {
            self.bvh.bounds()
        } else {
            BBox3f::from_points(self.vertices.iter().map(|v| Vec3::new(v[0], v[1], v[2])))
        }
    }
}

/// Area-weighted vertex normals; isolated vertices get +Y.
fn smooth_normals(positions: &[Vec3], tris: &[[u32; 3]]) -> Vec<Vec3> {
    let mut acc = vec![Vec3::ZERO; positions.len()];
    for &[a, b, c] in tris {
        let (pa, pb, pc) = (positions[a as usize], positions[b as usize], positions[c as usize]);
        let n = (pb - pa).cross(pc - pa);
        acc[a as usize] += n;
        acc[b as usize] += n;
        acc[c as usize] += n;
    }
    acc.into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        let p = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let uv = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        Mesh::from_indexed("quad", &p, None, Some(&uv), &[0, 1, 2, 0, 2, 3]).unwrap()
    }

    #[test]
    fn test_packed_uvs_and_normals() {
        let m = quad();
        assert_eq!(m.triangle_count(), 2);
        assert_eq!(m.vertices[2], [1.0, 1.0, 0.0, 1.0]);
        assert_eq!(m.normals[2], [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_index_out_of_range() {
        let p = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let err = Mesh::from_indexed("bad", &p, None, None, &[0, 1, 3]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_bad_index_count() {
        let p = [Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!(Mesh::from_indexed("bad", &p, None, None, &[0, 1]).is_err());
    }

    #[test]
    fn test_build_bvh_bounds() {
        let mut m = quad();
        assert!(!m.has_bvh());
        m.build_bvh();
        assert!(m.has_bvh());
        assert_eq!(m.bvh().prim_count(), 2);
        assert_eq!(m.local_bounds(), BBox3f::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn test_triangle_soup() {
        let p = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z, Vec3::X, Vec3::Y];
        let m = Mesh::from_triangle_soup("soup", &p).unwrap();
        assert_eq!(m.indices, vec![[0, 1, 2], [3, 4, 5]]);
    }
}
