//! Display transform applied when writing output buffers.

use image::{Rgba, Rgba32FImage};

use super::RenderOptions;
use crate::util::Vec3;

const REINHARD_LIMIT: f32 = 1.5;
const INV_GAMMA: f32 = 1.0 / 2.2;

#[inline]
fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.212671, 0.715160, 0.072169))
}

/// Luminance-based Reinhard with a white limit.
#[inline]
pub fn reinhard(c: Vec3) -> Vec3 {
    c / (1.0 + luminance(c) / REINHARD_LIMIT)
}

/// Narkowicz ACES filmic fit.
#[inline]
pub fn aces(c: Vec3) -> Vec3 {
    let (a, b, cc, d, e) = (2.51, 0.03, 2.43, 0.59, 0.14);
    ((c * (a * c + b)) / (c * (cc * c + d) + e)).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Map linear radiance to display values.
#[inline]
pub fn display(c: Vec3, options: &RenderOptions) -> Vec3 {
    let c = c.max(Vec3::ZERO);
    let mapped = match (options.enable_tonemap, options.enable_aces) {
        (false, _) => c,
        (true, true) => aces(c),
        (true, false) => reinhard(c),
    };
    mapped.powf(INV_GAMMA)
}

/// Write `src / samples` through the display transform into `dst`.
pub fn resolve_into(src: &Rgba32FImage, samples: u32, options: &RenderOptions, dst: &mut Rgba32FImage) {
    debug_assert_eq!(src.dimensions(), dst.dimensions());
    let inv = 1.0 / samples.max(1) as f32;
    for (s, d) in src.pixels().zip(dst.pixels_mut()) {
        let c = display(Vec3::new(s[0], s[1], s[2]) * inv, options);
        *d = Rgba([c.x, c.y, c.z, (s[3] * inv).clamp(0.0, 1.0)]);
    }
}
