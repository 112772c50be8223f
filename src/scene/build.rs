//! Scene processing: bottom-level builds, top-level build, flattening and
//! buffer assembly.

use rayon::prelude::*;

use super::texture::pack_texture_array;
use super::{Camera, Mesh, Scene};
use crate::bvh::{build_bvh, BuildParams, InstanceRef};
use crate::util::{BBox3f, Error, Result, Vec3};

/// Field of view of the camera synthesized for scenes without one.
const DEFAULT_FOV: f32 = 45.0;

impl Scene {
    /// Build every acceleration structure and device array from scratch.
    ///
    /// References are validated first; an invalid scene is rejected before any
    /// work is done and the previous derived state is kept.
    #[tracing::instrument(skip_all, fields(meshes = self.meshes.len(), instances = self.instances.len()))]
    pub fn process(&mut self) -> Result<()> {
        self.validate()?;

        {
            let _span = tracing::info_span!("blas").entered();
            self.meshes.par_iter_mut().for_each(Mesh::build_bvh);
        }

        self.build_top_level();
        {
            let _span = tracing::info_span!("flatten").entered();
            let refs = self.instance_refs();
            self.flattener
                .full_rebuild(self.meshes.iter().map(|m| m.bvh()), &self.tlas, &refs);
        }
        self.bounds = self.flattener.scene_bounds();

        self.pack_geometry();
        self.pack_transforms();
        self.pack_textures();

        if self.camera.is_none() {
            let (center, dist) = if self.bounds.is_empty() {
                (Vec3::ZERO, 1.0)
            } else {
                (self.bounds.center(), self.bounds.size().length() * 2.0)
            };
            self.camera = Some(Camera::new(center + Vec3::new(0.0, 0.0, dist), center, DEFAULT_FOV));
        }

        self.processed = true;
        self.generation += 1;
        self.dirty = true;
        self.instances_modified = false;

        tracing::info!(
            nodes = self.flattener.nodes().len(),
            top_level_index = self.flattener.top_level_index(),
            triangles = self.buffers.triangle_count(),
            bytes = self.buffers.byte_size(),
            "scene processed"
        );
        Ok(())
    }

    /// Rebuild only the top level after instance transforms changed.
    ///
    /// Bottom-level nodes are left untouched. Fails with
    /// [`Error::TopologyChanged`] if meshes or instances were added since the
    /// last [`process`](Self::process).
    #[tracing::instrument(skip_all, fields(instances = self.instances.len()))]
    pub fn rebuild_instances(&mut self) -> Result<()> {
        if self.generation == 0 {
            return Err(Error::NotProcessed);
        }
        let built_meshes = self.flattener.blas_root_offsets().len();
        if self.meshes.len() != built_meshes {
            return Err(Error::TopologyChanged {
                what: "meshes",
                expected: built_meshes,
                actual: self.meshes.len(),
            });
        }
        self.validate()?;

        self.build_top_level();
        let refs = self.instance_refs();
        self.flattener.incremental_rebuild(&self.tlas, &refs)?;
        self.bounds = self.flattener.scene_bounds();
        self.pack_transforms();

        self.instances_modified = true;
        self.dirty = true;
        Ok(())
    }

    /// Check every cross reference before building.
    pub fn validate(&self) -> Result<()> {
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.mesh_id >= self.meshes.len() {
                return Err(Error::config(format!(
                    "instance {i} ('{}') references mesh {} ({} meshes)",
                    inst.name,
                    inst.mesh_id,
                    self.meshes.len()
                )));
            }
            if inst.material_id >= self.materials.len() {
                return Err(Error::config(format!(
                    "instance {i} ('{}') references material {} ({} materials)",
                    inst.name,
                    inst.material_id,
                    self.materials.len()
                )));
            }
        }
        for (i, mat) in self.materials.iter().enumerate() {
            if let Some(tex) = mat
                .texture_slots()
                .find(|&t| t < 0 || t as usize >= self.textures.len())
            {
                return Err(Error::config(format!(
                    "material {i} references texture {tex} ({} textures)",
                    self.textures.len()
                )));
            }
        }
        Ok(())
    }

    /// World bounds of each instance, from the transformed local bounds.
    pub fn instance_bounds(&self) -> Vec<BBox3f> {
        self.instances
            .iter()
            .map(|inst| inst.world_bounds(&self.meshes[inst.mesh_id].local_bounds()))
            .collect()
    }

    fn instance_refs(&self) -> Vec<InstanceRef> {
        self.instances
            .iter()
            .map(|inst| InstanceRef {
                mesh_id: inst.mesh_id as u32,
                material_id: inst.material_id as u32,
            })
            .collect()
    }

    fn build_top_level(&mut self) {
        let _span = tracing::info_span!("tlas").entered();
        self.tlas = build_bvh(&self.instance_bounds(), BuildParams::INSTANCES);
    }

    /// Concatenate vertices and normals, and emit global triangle indices in
    /// each mesh's bottom-level primitive order.
    fn pack_geometry(&mut self) {
        let buf = &mut self.buffers;
        buf.vertex_indices.clear();
        buf.vertices_uvx.clear();
        buf.normals_uvy.clear();

        let mut vertex_base = 0u32;
        for mesh in &self.meshes {
            buf.vertex_indices.extend(mesh.bvh().prim_indices.iter().map(|&prim| {
                let [a, b, c] = mesh.indices[prim as usize];
                [a + vertex_base, b + vertex_base, c + vertex_base]
            }));
            buf.vertices_uvx.extend_from_slice(&mesh.vertices);
            buf.normals_uvy.extend_from_slice(&mesh.normals);
            vertex_base += mesh.vertex_count() as u32;
        }
    }

    fn pack_transforms(&mut self) {
        self.buffers.transforms = self.instances.iter().map(|i| i.transform).collect();
    }

    pub(super) fn pack_textures(&mut self) {
        let (w, h) = (self.options.texture_width, self.options.texture_height);
        self.buffers.texture_array = pack_texture_array(&self.textures, w, h);
        self.buffers.texture_size = (w, h);
        self.buffers.texture_count = self.textures.len();
    }
}
