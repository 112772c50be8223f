//! Material textures and the packed texture array.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;

use crate::util::{Error, Result};

#[derive(Debug, Clone)]
pub struct Texture {
    /// Source path or caller-supplied key; used to deduplicate.
    pub name: String,
    pub image: RgbaImage,
}

impl Texture {
    pub fn new(name: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let image = image::open(path)?.to_rgba8();
        tracing::debug!(path = %path.display(), w = image.width(), h = image.height(), "texture loaded");
        Ok(Self::new(path.display().to_string(), image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resample every texture to `width x height` and pack them back to back as
/// RGBA8 layers.
#[tracing::instrument(skip_all, fields(count = textures.len(), width = width, height = height))]
pub fn pack_texture_array(textures: &[Texture], width: u32, height: u32) -> Vec<u8> {
    let layer_bytes = width as usize * height as usize * 4;
    let mut packed = vec![0u8; layer_bytes * textures.len()];
    if layer_bytes == 0 {
        return packed;
    }

    packed
        .par_chunks_exact_mut(layer_bytes)
        .zip(textures.par_iter())
        .for_each(|(layer, tex)| {
            if tex.width() == width && tex.height() == height {
                layer.copy_from_slice(tex.image.as_raw());
            } else {
                let resized = imageops::resize(&tex.image, width, height, FilterType::Triangle);
                layer.copy_from_slice(resized.as_raw());
            }
        });

    packed
}
