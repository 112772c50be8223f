//! Progressive tile scheduler.
//!
//! Each call to [`TileScheduler::frame`] performs one step of the accumulation
//! loop: either a low-resolution preview (after any scene change) or exactly
//! one tile of the current sample. Completed passes alternate between two
//! output buffers so the displayed image is always a finished pass.

use image::{imageops, DynamicImage, Rgb, Rgb32FImage, Rgba, Rgba32FImage, RgbaImage};
use tracing::{debug, info, warn};

use super::denoise::Denoiser;
use super::device::{FrameUniforms, PreviewRequest, RenderDevice, TileRequest};
use super::state::{FrameAction, FrameEvent, SchedulerState};
use super::tiles::{TileCursor, TileGrid};
use super::tonemap::resolve_into;
use super::RenderOptions;
use crate::scene::Scene;
use crate::util::{Error, Result};

/// Which image [`TileScheduler::present`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentSource {
    Preview,
    Denoised,
    Output(usize),
}

pub struct TileScheduler<D: RenderDevice> {
    device: D,
    denoiser: Option<Box<dyn Denoiser>>,
    options: RenderOptions,
    grid: TileGrid,
    state: SchedulerState,
    accumulation: Rgba32FImage,
    outputs: [Rgba32FImage; 2],
    preview: Rgba32FImage,
    denoised: Option<Rgba32FImage>,
    uploaded_generation: Option<u64>,
    force_dirty: bool,
    /// Monotonic frame index, seeds the device's sampler.
    frame_index: u32,
}

impl<D: RenderDevice> TileScheduler<D> {
    pub fn new(device: D, options: &RenderOptions) -> Self {
        let mut options = options.clone();
        options.sanitize();
        let grid = grid_for(&options);
        let (w, h) = (options.width(), options.height());
        let (pw, ph) = options.preview_size();
        Self {
            device,
            denoiser: None,
            grid,
            state: SchedulerState::new(&grid),
            accumulation: Rgba32FImage::new(w, h),
            outputs: [Rgba32FImage::new(w, h), Rgba32FImage::new(w, h)],
            preview: Rgba32FImage::new(pw, ph),
            denoised: None,
            uploaded_generation: None,
            force_dirty: true,
            frame_index: 0,
            options,
        }
    }

    pub fn with_denoiser(mut self, denoiser: impl Denoiser + 'static) -> Self {
        self.denoiser = Some(Box::new(denoiser));
        self
    }

    pub fn set_denoiser(&mut self, denoiser: Option<Box<dyn Denoiser>>) {
        self.denoiser = denoiser;
        self.denoised = None;
        self.state.denoised = false;
    }

    /// Run one step of the render loop.
    pub fn frame(&mut self, scene: &mut Scene) -> Result<FrameAction> {
        if !scene.is_processed() {
            return Err(Error::NotProcessed);
        }
        if scene.options().layout_differs(&self.options) {
            self.reallocate(scene.options().clone());
        } else {
            self.options = scene.options().clone();
        }
        self.sync_device(scene)?;

        let event = if scene.is_dirty() || self.force_dirty {
            FrameEvent::Dirty
        } else {
            FrameEvent::Clean {
                max_samples: self.options.max_spp,
            }
        };
        let (next, action) = self.state.advance(&self.grid, event);
        self.frame_index = self.frame_index.wrapping_add(1);

        match action {
            FrameAction::Preview => {
                self.render_preview(scene)?;
                scene.clear_dirty();
                self.force_dirty = false;
                self.state = next;
            }
            FrameAction::RenderTile {
                cursor, sample, buffer, ..
            } => {
                self.render_tile(scene, cursor, sample, buffer)?;
                self.state = next;
                self.run_denoiser();
            }
            FrameAction::Idle => {}
        }
        Ok(action)
    }

    /// Full upload on a new scene generation, incremental updates otherwise.
    fn sync_device(&mut self, scene: &mut Scene) -> Result<()> {
        let generation = scene.generation();
        if self.uploaded_generation != Some(generation) {
            self.device.upload_scene(scene)?;
            scene.take_updates();
            self.uploaded_generation = Some(generation);
            self.force_dirty = true;
            debug!(generation, "scene uploaded to device");
            return Ok(());
        }
        let updates = scene.take_updates();
        if updates.instances {
            self.device.update_instances(scene)?;
        }
        if updates.environment {
            self.device.update_environment(scene)?;
        }
        Ok(())
    }

    fn render_preview(&mut self, scene: &Scene) -> Result<()> {
        let uniforms = FrameUniforms::from_scene(scene, true)?;
        let (width, height) = self.options.preview_size();
        let radiance = self.device.render_preview(&PreviewRequest {
            width,
            height,
            frame: self.frame_index,
            uniforms: &uniforms,
        })?;
        if radiance.dimensions() != (width, height) {
            return Err(Error::resource(format!(
                "preview is {:?}, expected {:?}",
                radiance.dimensions(),
                (width, height)
            )));
        }

        self.accumulation.fill(0.0);
        self.denoised = None;
        if self.preview.dimensions() != (width, height) {
            self.preview = Rgba32FImage::new(width, height);
        }
        resolve_into(&radiance, 1, &self.options, &mut self.preview);
        Ok(())
    }

    fn render_tile(&mut self, scene: &Scene, cursor: TileCursor, sample: u32, buffer: usize) -> Result<()> {
        let uniforms = FrameUniforms::from_scene(scene, false)?;
        let tile = self.grid.tile(cursor);
        let rendered = self.device.render_tile(&TileRequest {
            tile,
            image_size: self.accumulation.dimensions(),
            sample,
            frame: self.frame_index,
            uniforms: &uniforms,
            history: &self.accumulation,
        })?;
        if rendered.dimensions() != (tile.width, tile.height) {
            return Err(Error::resource(format!(
                "tile is {:?}, expected {:?}",
                rendered.dimensions(),
                (tile.width, tile.height)
            )));
        }

        imageops::replace(&mut self.accumulation, &rendered, tile.x as i64, tile.y as i64);
        resolve_into(&self.accumulation, sample, &self.options, &mut self.outputs[buffer]);
        Ok(())
    }

    fn run_denoiser(&mut self) {
        let Some(denoiser) = self.denoiser.as_mut().filter(|_| self.options.enable_denoiser) else {
            self.denoised = None;
            self.state.denoised = false;
            return;
        };
        if !self
            .state
            .should_denoise(true, self.options.denoiser_frame_count, self.grid.tile_count())
        {
            return;
        }

        let displayed = &self.outputs[self.state.displayed_buffer()];
        let rgb = Rgb32FImage::from_fn(displayed.width(), displayed.height(), |x, y| {
            let p = displayed.get_pixel(x, y);
            Rgb([p[0], p[1], p[2]])
        });
        let result = denoiser.denoise(&rgb).and_then(|out| {
            if out.dimensions() == rgb.dimensions() {
                Ok(out)
            } else {
                Err(Error::filter(format!(
                    "denoiser returned {:?} for a {:?} image",
                    out.dimensions(),
                    rgb.dimensions()
                )))
            }
        });

        match result {
            Ok(out) => {
                self.denoised = Some(Rgba32FImage::from_fn(out.width(), out.height(), |x, y| {
                    let c = out.get_pixel(x, y);
                    Rgba([c[0], c[1], c[2], displayed.get_pixel(x, y)[3]])
                }));
                self.state.denoised = true;
                debug!(sample = self.state.sample_counter, "denoised");
            }
            Err(e) => {
                warn!(error = %e, "denoiser failed; showing noisy image");
                self.denoised = None;
                self.state.denoised = false;
            }
        }
    }

    fn reallocate(&mut self, mut options: RenderOptions) {
        options.sanitize();
        let (w, h) = (options.width(), options.height());
        let (pw, ph) = options.preview_size();
        self.grid = grid_for(&options);
        self.state = SchedulerState::new(&self.grid);
        self.accumulation = Rgba32FImage::new(w, h);
        self.outputs = [Rgba32FImage::new(w, h), Rgba32FImage::new(w, h)];
        self.preview = Rgba32FImage::new(pw, ph);
        self.denoised = None;
        self.force_dirty = true;
        self.options = options;
        info!(
            width = w,
            height = h,
            cols = self.grid.cols,
            rows = self.grid.rows,
            "render buffers allocated"
        );
    }

    /// Change the render resolution. Every buffer is discarded and the next
    /// frame starts over with a preview.
    pub fn resize(&mut self, scene: &mut Scene, width: u32, height: u32) {
        let mut options = scene.options().clone();
        options.resolution = [width, height];
        scene.set_options(options);
        self.reallocate(scene.options().clone());
    }

    // ---- presentation ------------------------------------------------------

    /// The preview is shown while `scene` has unrendered edits and during the
    /// first pass; afterwards the denoised image when one exists, else the
    /// last completed pass.
    pub fn present_source(&self, scene: &Scene) -> PresentSource {
        if self.force_dirty || scene.is_dirty() || self.state.sample_counter == 1 {
            PresentSource::Preview
        } else if self.denoised.is_some() {
            PresentSource::Denoised
        } else {
            PresentSource::Output(self.state.displayed_buffer())
        }
    }

    /// Image to display: tonemapped, gamma encoded, RGBA.
    ///
    /// The preview is smaller than the render resolution.
    pub fn present(&self, scene: &Scene) -> &Rgba32FImage {
        match (self.present_source(scene), &self.denoised) {
            (PresentSource::Preview, _) => &self.preview,
            (PresentSource::Denoised, Some(img)) => img,
            (PresentSource::Output(i), _) => &self.outputs[i],
            (PresentSource::Denoised, None) => &self.outputs[self.state.displayed_buffer()],
        }
    }

    /// Presented image as 8-bit RGBA at the full render resolution.
    pub fn output_image(&self, scene: &Scene) -> RgbaImage {
        let (w, h) = (self.options.width(), self.options.height());
        let img = self.present(scene);
        let img = if img.dimensions() == (w, h) {
            img.clone()
        } else {
            imageops::resize(img, w, h, imageops::FilterType::Triangle)
        };
        DynamicImage::ImageRgba32F(img).to_rgba8()
    }

    /// Fraction of the sample budget reached, `None` without a budget.
    pub fn progress(&self) -> Option<f32> {
        self.options
            .max_spp
            .map(|max| (self.state.sample_counter as f32 / max as f32).min(1.0))
    }

    /// Sample currently being accumulated (1-based).
    pub fn sample_count(&self) -> u32 {
        self.state.sample_counter
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished(self.options.max_spp)
    }

    // ---- accessors ---------------------------------------------------------

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Summed radiance of every accumulated sample.
    pub fn accumulation(&self) -> &Rgba32FImage {
        &self.accumulation
    }

    pub fn output(&self, buffer: usize) -> &Rgba32FImage {
        &self.outputs[buffer]
    }

    pub fn denoised(&self) -> Option<&Rgba32FImage> {
        self.denoised.as_ref()
    }
}

fn grid_for(options: &RenderOptions) -> TileGrid {
    TileGrid::new(options.width(), options.height(), options.tile_width, options.tile_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::CpuDevice;
    use crate::scene::{Camera, Material, Mesh, MeshInstance};
    use crate::util::{Mat4, Vec3};

    fn scene() -> Scene {
        let mut scene = Scene::with_options(RenderOptions {
            resolution: [8, 8],
            tile_width: 4,
            tile_height: 4,
            max_spp: Some(3),
            ..Default::default()
        });
        let p = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let mesh = scene.add_mesh(Mesh::from_triangle_soup("tri", &p).unwrap());
        let mat = scene.add_material(Material::diffuse([0.5; 3]));
        scene.add_instance(MeshInstance::new("tri", mesh, mat, Mat4::IDENTITY));
        scene.set_camera(Camera::new(Vec3::new(0.3, 0.3, 3.0), Vec3::new(0.3, 0.3, 0.0), 45.0));
        scene.process().unwrap();
        scene
    }

    #[test]
    fn test_runs_to_budget_with_cpu_device() {
        let mut scene = scene();
        let mut sched = TileScheduler::new(CpuDevice::new(), scene.options());

        assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
        assert_eq!(sched.present_source(&scene), PresentSource::Preview);

        // 4 tiles per pass, two passes to reach sample 3
        for _ in 0..8 {
            assert!(matches!(sched.frame(&mut scene).unwrap(), FrameAction::RenderTile { .. }));
        }
        assert_eq!(sched.sample_count(), 3);
        assert!(sched.is_finished());
        assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Idle);
        assert_eq!(sched.progress(), Some(1.0));
        // Two completed passes flip the buffers twice
        assert_eq!(sched.present_source(&scene), PresentSource::Output(1));
        assert_eq!(sched.output_image(&scene).dimensions(), (8, 8));
    }

    #[test]
    fn test_unprocessed_scene_rejected() {
        let mut scene = Scene::new();
        let mut sched = TileScheduler::new(CpuDevice::new(), &RenderOptions::default());
        assert!(matches!(sched.frame(&mut scene), Err(Error::NotProcessed)));
    }

    #[test]
    fn test_preview_output_is_upscaled() {
        let mut scene = scene();
        let mut sched = TileScheduler::new(CpuDevice::new(), scene.options());
        sched.frame(&mut scene).unwrap();
        assert_eq!(sched.present(&scene).dimensions(), (2, 2));
        assert_eq!(sched.output_image(&scene).dimensions(), (8, 8));
    }
}
