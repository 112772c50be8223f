//! Scene graph: meshes, instances, materials, lights, textures, environment
//! and camera, plus the device-ready arrays derived from them.
//!
//! [`Scene::process`] turns the authored data into a flattened two-level BVH
//! and packed buffers. Instance edits go through
//! [`Scene::rebuild_instances`], which only touches the top level.
//!
//! The scene carries three flags read by the frame loop:
//! - `dirty`: accumulated samples are stale
//! - `instances_modified`: transforms, materials and top-level nodes changed
//! - `env_map_modified`: the environment map was replaced

mod build;
mod buffers;
pub mod camera;
pub mod environment;
pub mod instance;
pub mod light;
pub mod material;
pub mod mesh;
pub mod texture;

pub use buffers::SceneBuffers;
pub use camera::{Camera, CameraDesc, CameraUniform};
pub use environment::{EnvSample, EnvironmentMap};
pub use instance::MeshInstance;
pub use light::{Light, LightKind};
pub use material::{Material, NO_TEXTURE};
pub use mesh::Mesh;
pub use texture::Texture;

use std::path::Path;

use crate::bvh::{Bvh, BvhFlattener};
use crate::render::RenderOptions;
use crate::util::{BBox3f, Error, Mat4, Result};

/// Device-side work requested since the last [`Scene::take_updates`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneUpdates {
    pub instances: bool,
    pub environment: bool,
}

#[derive(Debug, Default)]
pub struct Scene {
    meshes: Vec<Mesh>,
    instances: Vec<MeshInstance>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    textures: Vec<Texture>,
    env_map: Option<EnvironmentMap>,
    camera: Option<Camera>,
    options: RenderOptions,

    tlas: Bvh,
    flattener: BvhFlattener,
    buffers: SceneBuffers,
    bounds: BBox3f,
    generation: u64,
    processed: bool,

    dirty: bool,
    instances_modified: bool,
    env_map_modified: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut options: RenderOptions) -> Self {
        options.sanitize();
        Self {
            options,
            ..Default::default()
        }
    }

    // ---- authoring -------------------------------------------------------

    /// Add a mesh; a mesh with the same name is reused.
    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        if let Some(id) = self.meshes.iter().position(|m| m.name == mesh.name) {
            return id;
        }
        self.processed = false;
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Add a texture; a texture with the same name is reused.
    pub fn add_texture(&mut self, texture: Texture) -> usize {
        if let Some(id) = self.texture_id(&texture.name) {
            return id;
        }
        self.processed = false;
        self.textures.push(texture);
        self.textures.len() - 1
    }

    /// Load a texture from disk unless it is already present.
    pub fn load_texture(&mut self, path: &Path) -> Result<usize> {
        if let Some(id) = self.texture_id(&path.display().to_string()) {
            return Ok(id);
        }
        Ok(self.add_texture(Texture::load(path)?))
    }

    fn texture_id(&self, name: &str) -> Option<usize> {
        self.textures.iter().position(|t| t.name == name)
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.dirty = true;
        self.lights.len() - 1
    }

    pub fn add_instance(&mut self, instance: MeshInstance) -> usize {
        self.processed = false;
        self.instances.push(instance);
        self.instances.len() - 1
    }

    /// Replace (or remove) the environment map.
    pub fn set_environment_map(&mut self, env: Option<EnvironmentMap>) {
        self.env_map = env;
        self.env_map_modified = true;
        self.dirty = true;
    }

    pub fn load_environment_map(&mut self, path: &Path) -> Result<()> {
        let env = EnvironmentMap::load(path)?;
        self.set_environment_map(Some(env));
        Ok(())
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
        self.dirty = true;
    }

    /// Mutable camera access; any change invalidates accumulated samples.
    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.dirty = true;
        self.camera.as_mut()
    }

    /// Replace the render options. Changes that affect sampling reset
    /// accumulation (see [`RenderOptions::requires_reset`]); a new texture
    /// size also repacks the texture array.
    pub fn set_options(&mut self, mut options: RenderOptions) {
        options.sanitize();
        if options == self.options {
            return;
        }
        let repack = options.texture_size_differs(&self.options);
        if options.requires_reset(&self.options) {
            self.dirty = true;
        }
        self.options = options;
        if repack && self.processed {
            self.pack_textures();
            self.generation += 1;
        }
    }

    /// Change one instance transform without rebuilding anything.
    pub fn set_instance_transform(&mut self, id: usize, transform: Mat4) -> Result<()> {
        let count = self.instances.len();
        let inst = self
            .instances
            .get_mut(id)
            .ok_or_else(|| Error::config(format!("instance {id} out of range ({count} instances)")))?;
        inst.transform = transform;
        Ok(())
    }

    /// Change one instance transform and refresh the top level.
    pub fn move_instance(&mut self, id: usize, transform: Mat4) -> Result<()> {
        self.set_instance_transform(id, transform)?;
        self.rebuild_instances()
    }

    // ---- frame-loop flags --------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Pending device updates; clears the flags.
    pub fn take_updates(&mut self) -> SceneUpdates {
        let updates = SceneUpdates {
            instances: self.instances_modified,
            environment: self.env_map_modified,
        };
        self.instances_modified = false;
        self.env_map_modified = false;
        updates
    }

    // ---- accessors ---------------------------------------------------------

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn environment_map(&self) -> Option<&EnvironmentMap> {
        self.env_map.as_ref()
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn flattener(&self) -> &BvhFlattener {
        &self.flattener
    }

    pub fn top_level_bvh(&self) -> &Bvh {
        &self.tlas
    }

    pub fn buffers(&self) -> &SceneBuffers {
        &self.buffers
    }

    /// World bounds of all instances.
    pub fn bounds(&self) -> BBox3f {
        self.bounds
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Bumped by every full [`process`](Self::process); devices re-upload
    /// everything when it changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
