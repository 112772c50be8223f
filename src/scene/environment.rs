//! Equirectangular environment map with importance-sampling tables.

use std::f32::consts::PI;
use std::path::Path;

use image::Rgb32FImage;

use crate::util::{Error, Result, Vec3};

#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    pub name: String,
    image: Rgb32FImage,
    conditional_cdf: Vec<f32>,
    marginal_cdf: Vec<f32>,
    total_luminance: f32,
}

/// One importance sample of the environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSample {
    pub direction: Vec3,
    pub radiance: Vec3,
    /// Solid-angle density.
    pub pdf: f32,
}

impl EnvironmentMap {
    /// Load an HDR or EXR image.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let img = image::open(path)?.to_rgb32f();
        let name = path.display().to_string();
        let env = Self::from_image(name, img)?;
        tracing::info!(width = env.width(), height = env.height(), "environment map loaded");
        Ok(env)
    }

    pub fn from_image(name: impl Into<String>, image: Rgb32FImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::config("environment map has zero size"));
        }
        let luminance: Vec<f32> = image
            .pixels()
            .map(|p| 0.2126 * p[0] + 0.7152 * p[1] + 0.0722 * p[2])
            .collect();
        let (conditional_cdf, marginal_cdf, total_luminance) =
            build_env_cdfs(image.width(), image.height(), &luminance);
        Ok(Self {
            name: name.into(),
            image,
            conditional_cdf,
            marginal_cdf,
            total_luminance,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &Rgb32FImage {
        &self.image
    }

    /// Per-row CDFs, `width * height` entries, each row normalized to 1.
    pub fn conditional_cdf(&self) -> &[f32] {
        &self.conditional_cdf
    }

    /// CDF over rows, `height` entries.
    pub fn marginal_cdf(&self) -> &[f32] {
        &self.marginal_cdf
    }

    pub fn total_luminance(&self) -> f32 {
        self.total_luminance
    }

    pub fn pixel_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.image.as_raw())
    }

    /// Radiance seen along `dir`, with the map rotated by `rotation` degrees.
    pub fn lookup(&self, dir: Vec3, rotation: f32) -> Vec3 {
        let (u, v) = dir_to_uv(dir, rotation);
        self.texel(u, v)
    }

    /// Draw a direction proportional to luminance from two uniform numbers.
    pub fn sample(&self, r1: f32, r2: f32, rotation: f32) -> Option<EnvSample> {
        if self.total_luminance <= 0.0 {
            return None;
        }
        let (w, h) = (self.width() as usize, self.height() as usize);
        let row = lower_bound(&self.marginal_cdf, r1).min(h - 1);
        let cols = &self.conditional_cdf[row * w..(row + 1) * w];
        let col = lower_bound(cols, r2).min(w - 1);

        let u = (col as f32 + 0.5) / w as f32;
        let v = (row as f32 + 0.5) / h as f32;
        let direction = uv_to_dir(u - rotation / 360.0, v);

        let p = self.image.get_pixel(col as u32, row as u32);
        let radiance = Vec3::new(p[0], p[1], p[2]);
        let lum = 0.2126 * p[0] + 0.7152 * p[1] + 0.0722 * p[2];
        let pdf = lum * (w * h) as f32 / (self.total_luminance * 2.0 * PI * PI);

        Some(EnvSample {
            direction,
            radiance,
            pdf,
        })
    }

    fn texel(&self, u: f32, v: f32) -> Vec3 {
        let (w, h) = (self.width(), self.height());
        let x = ((u.rem_euclid(1.0) * w as f32) as u32).min(w - 1);
        let y = ((v.clamp(0.0, 1.0) * h as f32) as u32).min(h - 1);
        let p = self.image.get_pixel(x, y);
        Vec3::new(p[0], p[1], p[2])
    }
}

fn dir_to_uv(dir: Vec3, rotation: f32) -> (f32, f32) {
    let d = dir.normalize_or_zero();
    let u = (PI + d.z.atan2(d.x)) / (2.0 * PI) + rotation / 360.0;
    let v = d.y.clamp(-1.0, 1.0).acos() / PI;
    (u, v)
}

fn uv_to_dir(u: f32, v: f32) -> Vec3 {
    let phi = u * 2.0 * PI - PI;
    let theta = v * PI;
    Vec3::new(phi.cos() * theta.sin(), theta.cos(), phi.sin() * theta.sin())
}

/// First index whose value is >= `x`.
fn lower_bound(cdf: &[f32], x: f32) -> usize {
    cdf.partition_point(|&c| c < x)
}

/// Build importance sampling CDFs from luminance data.
/// Returns (conditional_cdf, marginal_cdf, total_luminance).
///
/// Rows are weighted by sin(theta) to account for the solid angle of an
/// equirectangular texel.
fn build_env_cdfs(width: u32, height: u32, luminance: &[f32]) -> (Vec<f32>, Vec<f32>, f32) {
    let w = width as usize;
    let h = height as usize;

    let mut conditional_cdf = vec![0.0f32; w * h];
    let mut row_integrals = vec![0.0f32; h];

    for (y, row) in conditional_cdf.chunks_exact_mut(w).enumerate() {
        let theta = PI * (y as f32 + 0.5) / h as f32;
        let sin_theta = theta.sin();

        let mut row_sum = 0.0f32;
        for (x, c) in row.iter_mut().enumerate() {
            row_sum += luminance[y * w + x] * sin_theta;
            *c = row_sum;
        }
        if row_sum > 0.0 {
            row.iter_mut().for_each(|c| *c /= row_sum);
        }
        row_integrals[y] = row_sum;
    }

    let mut marginal_cdf = vec![0.0f32; h];
    let mut total = 0.0f32;
    for (m, integral) in marginal_cdf.iter_mut().zip(&row_integrals) {
        total += integral;
        *m = total;
    }
    if total > 0.0 {
        marginal_cdf.iter_mut().for_each(|m| *m /= total);
    }

    (conditional_cdf, marginal_cdf, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn hot_spot(w: u32, h: u32, x: u32, y: u32) -> EnvironmentMap {
        let mut img = Rgb32FImage::from_pixel(w, h, Rgb([0.01, 0.01, 0.01]));
        img.put_pixel(x, y, Rgb([100.0, 100.0, 100.0]));
        EnvironmentMap::from_image("hot", img).unwrap()
    }

    #[test]
    fn test_cdfs_monotonic_and_normalized() {
        let env = hot_spot(16, 8, 3, 2);
        let m = env.marginal_cdf();
        assert!(m.windows(2).all(|p| p[0] <= p[1]));
        assert!((m[m.len() - 1] - 1.0).abs() < 1e-5);
        for row in env.conditional_cdf().chunks(16) {
            assert!(row.windows(2).all(|p| p[0] <= p[1]));
            assert!((row[15] - 1.0).abs() < 1e-5);
        }
        assert!(env.total_luminance() > 0.0);
    }

    #[test]
    fn test_sample_finds_hot_spot() {
        let env = hot_spot(16, 8, 11, 5);
        let s = env.sample(0.5, 0.5, 0.0).unwrap();
        assert_eq!(s.radiance, Vec3::splat(100.0));
        // The sampled direction looks the hot texel back up
        assert_eq!(env.lookup(s.direction, 0.0), Vec3::splat(100.0));
        assert!(s.pdf > 0.0);
    }

    #[test]
    fn test_black_map_has_no_samples() {
        let env = EnvironmentMap::from_image("black", Rgb32FImage::new(4, 2)).unwrap();
        assert!(env.sample(0.3, 0.7, 0.0).is_none());
        assert_eq!(env.lookup(Vec3::Y, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(EnvironmentMap::from_image("empty", Rgb32FImage::new(0, 0)).is_err());
    }
}
