//! Render options shared by the scene, the scheduler and devices.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::Result;

/// Options that persist between sessions and may be embedded in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    // Output
    pub resolution: [u32; 2],
    pub tile_width: u32,
    pub tile_height: u32,

    // Integrator
    pub max_depth: u32,
    /// Bounce depth used for the low-resolution preview while the scene is dirty.
    pub preview_max_depth: u32,
    /// Preview resolution relative to the full resolution.
    pub preview_scale: f32,
    /// Stop accumulating once this many samples per pixel are reached.
    pub max_spp: Option<u32>,
    pub rr_depth: u32,
    pub enable_rr: bool,

    // Texture array
    pub texture_width: u32,
    pub texture_height: u32,

    // Denoiser
    pub enable_denoiser: bool,
    /// Denoise every this many full passes over the tile grid.
    pub denoiser_frame_count: u32,

    // Display
    pub enable_tonemap: bool,
    pub enable_aces: bool,
    pub background_color: [f32; 3],
    pub enable_background: bool,
    pub transparent_background: bool,

    // Environment
    pub enable_env_map: bool,
    pub env_map_intensity: f32,
    /// Rotation around the vertical axis in degrees.
    pub env_map_rotation: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            resolution: [1280, 720],
            tile_width: 100,
            tile_height: 100,
            max_depth: 2,
            preview_max_depth: 2,
            preview_scale: 0.25,
            max_spp: None,
            rr_depth: 2,
            enable_rr: true,
            texture_width: 2048,
            texture_height: 2048,
            enable_denoiser: false,
            denoiser_frame_count: 20,
            enable_tonemap: true,
            enable_aces: false,
            background_color: [1.0, 1.0, 1.0],
            enable_background: false,
            transparent_background: false,
            enable_env_map: false,
            env_map_intensity: 1.0,
            env_map_rotation: 0.0,
        }
    }
}

impl RenderOptions {
    /// Per-user options file (`<config>/pathtile/options.json`).
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("pathtile");
            p.push("options.json");
            p
        })
    }

    /// Load options from the per-user file, falling back to defaults.
    pub fn load_user() -> Self {
        Self::user_path()
            .and_then(|p| Self::load(&p).ok())
            .unwrap_or_default()
    }

    /// Save options to the per-user file.
    pub fn save_user(&self) -> Result<()> {
        match Self::user_path() {
            Some(path) => self.save(&path),
            None => Ok(()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut opts: Self = serde_json::from_str(&json)?;
        opts.sanitize();
        Ok(opts)
    }

    /// Write pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamp values that would make the tile grid or texture array degenerate.
    pub fn sanitize(&mut self) {
        self.resolution = [self.resolution[0].max(1), self.resolution[1].max(1)];
        self.tile_width = self.tile_width.max(1);
        self.tile_height = self.tile_height.max(1);
        self.texture_width = self.texture_width.max(1);
        self.texture_height = self.texture_height.max(1);
        self.denoiser_frame_count = self.denoiser_frame_count.max(1);
        if !(self.preview_scale > 0.0 && self.preview_scale <= 1.0) {
            self.preview_scale = 0.25;
        }
        if self.max_spp == Some(0) {
            self.max_spp = None;
        }
    }

    pub fn width(&self) -> u32 {
        self.resolution[0]
    }

    pub fn height(&self) -> u32 {
        self.resolution[1]
    }

    /// Preview image size, at least one pixel on each side.
    pub fn preview_size(&self) -> (u32, u32) {
        let w = (self.width() as f32 * self.preview_scale) as u32;
        let h = (self.height() as f32 * self.preview_scale) as u32;
        (w.max(1), h.max(1))
    }

    /// True when switching from `self` to `other` needs a new buffer allocation.
    pub fn layout_differs(&self, other: &Self) -> bool {
        self.resolution != other.resolution
            || self.tile_width != other.tile_width
            || self.tile_height != other.tile_height
    }

    /// True when switching from `self` to `other` invalidates accumulated
    /// samples. Display and denoiser settings only affect how finished
    /// samples are shown, and the preview settings only the next preview.
    pub fn requires_reset(&self, other: &Self) -> bool {
        self.layout_differs(other)
            || self.texture_size_differs(other)
            || self.max_depth != other.max_depth
            || self.max_spp != other.max_spp
            || self.rr_depth != other.rr_depth
            || self.enable_rr != other.enable_rr
            || self.background_color != other.background_color
            || self.enable_background != other.enable_background
            || self.transparent_background != other.transparent_background
            || self.enable_env_map != other.enable_env_map
            || self.env_map_intensity != other.env_map_intensity
            || self.env_map_rotation != other.env_map_rotation
    }

    /// True when the packed texture array has to be rebuilt.
    pub fn texture_size_differs(&self, other: &Self) -> bool {
        self.texture_width != other.texture_width || self.texture_height != other.texture_height
    }
}
