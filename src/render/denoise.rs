//! Denoiser hook.

use image::Rgb32FImage;

use crate::util::Result;

/// Opaque filter applied to the displayed image.
///
/// Failures are reported as [`Error::Filter`](crate::Error::Filter); the
/// scheduler logs them and keeps showing the noisy image.
pub trait Denoiser {
    fn denoise(&mut self, image: &Rgb32FImage) -> Result<Rgb32FImage>;
}

impl<F> Denoiser for F
where
    F: FnMut(&Rgb32FImage) -> Result<Rgb32FImage>,
{
    fn denoise(&mut self, image: &Rgb32FImage) -> Result<Rgb32FImage> {
        self(image)
    }
}
