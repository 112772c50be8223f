//! # pathtile
//!
//! Core of a progressive, tile-based path tracer.
//!
//! A [`Scene`](scene::Scene) holds meshes, instances, materials, lights,
//! textures, an environment map and a camera. [`Scene::process`](scene::Scene::process)
//! builds one bottom-level BVH per mesh, a top-level BVH over instances, and
//! flattens both into a single node array a compute device can traverse
//! without recursion. The [`TileScheduler`](render::TileScheduler) then drives
//! a [`RenderDevice`](render::RenderDevice) one tile per frame, accumulating
//! samples and alternating between two output buffers.
//!
//! ## Modules
//!
//! - [`util`] - Math types and errors
//! - [`bvh`] - BVH construction and flattening
//! - [`scene`] - Scene graph and device-ready buffers
//! - [`loader`] - JSON and OBJ scene loading
//! - [`render`] - Tile scheduler, device contract and CPU reference device
//!
//! ## Example
//!
//! ```ignore
//! use pathtile::prelude::*;
//!
//! let mut scene = pathtile::loader::load_scene("cornell.json".as_ref())?;
//! scene.process()?;
//!
//! let mut scheduler = TileScheduler::new(CpuDevice::new(), scene.options());
//! while !scheduler.is_finished() {
//!     scheduler.frame(&mut scene)?;
//! }
//! let image = scheduler.output_image(&scene);
//! ```

pub mod util;
pub mod bvh;
pub mod scene;
pub mod loader;
pub mod render;

pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{BBox3f, Error, Result};
    pub use crate::bvh::{BvhFlattener, FlatNode, NodeKind};
    pub use crate::scene::{Camera, Light, Material, Mesh, MeshInstance, Scene};
    pub use crate::loader::LoaderRegistry;
    pub use crate::render::{
        CpuDevice, Denoiser, FrameAction, RenderDevice, RenderOptions, TileGrid, TileScheduler,
    };
}
