//! Render device contract.
//!
//! A device owns its copy of the scene arrays. The scheduler uploads
//! everything once per processed scene generation, then pushes only what the
//! scene flags as modified.

use image::Rgba32FImage;

use super::tiles::Tile;
use crate::scene::{CameraUniform, Scene};
use crate::util::{Error, Result};

/// Per-frame constants, rebuilt from the scene every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub camera: CameraUniform,
    pub max_depth: u32,
    pub rr_depth: u32,
    pub enable_rr: bool,
    pub background: [f32; 3],
    pub enable_background: bool,
    pub transparent_background: bool,
    pub enable_env_map: bool,
    pub env_map_intensity: f32,
    /// Degrees.
    pub env_map_rotation: f32,
}

impl FrameUniforms {
    /// Uniforms for a tile frame, or for the preview when `preview` is set
    /// (which swaps in the preview bounce depth).
    pub fn from_scene(scene: &Scene, preview: bool) -> Result<Self> {
        let camera = scene.camera().ok_or(Error::NotProcessed)?;
        let o = scene.options();
        Ok(Self {
            camera: camera.to_uniform(),
            max_depth: if preview { o.preview_max_depth } else { o.max_depth },
            rr_depth: o.rr_depth,
            enable_rr: o.enable_rr,
            background: o.background_color,
            enable_background: o.enable_background,
            transparent_background: o.transparent_background,
            enable_env_map: o.enable_env_map && scene.environment_map().is_some(),
            env_map_intensity: o.env_map_intensity,
            env_map_rotation: o.env_map_rotation,
        })
    }
}

/// One tile of one sample.
#[derive(Debug, Clone, Copy)]
pub struct TileRequest<'a> {
    pub tile: Tile,
    /// Full image size the tile belongs to.
    pub image_size: (u32, u32),
    /// 1-based sample being accumulated.
    pub sample: u32,
    pub frame: u32,
    pub uniforms: &'a FrameUniforms,
    /// Accumulated radiance so far, full image size.
    pub history: &'a Rgba32FImage,
}

/// Whole-frame, single-sample, low-resolution render.
#[derive(Debug, Clone, Copy)]
pub struct PreviewRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub frame: u32,
    pub uniforms: &'a FrameUniforms,
}

pub trait RenderDevice {
    /// Upload every scene array. Called once per processed scene generation.
    fn upload_scene(&mut self, scene: &Scene) -> Result<()>;

    /// Refresh transforms, materials and the top-level node region.
    fn update_instances(&mut self, scene: &Scene) -> Result<()>;

    /// Refresh the environment map and its sampling tables.
    fn update_environment(&mut self, scene: &Scene) -> Result<()>;

    /// Render one new sample for every pixel of `req.tile`.
    ///
    /// Returns a tile-sized image holding history plus the new sample.
    fn render_tile(&mut self, req: &TileRequest<'_>) -> Result<Rgba32FImage>;

    /// Render the preview; returns linear radiance of `width x height`.
    fn render_preview(&mut self, req: &PreviewRequest<'_>) -> Result<Rgba32FImage>;
}
