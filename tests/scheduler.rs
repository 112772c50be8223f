//! Tile scheduler behavior against a recording device.

use std::cell::Cell;
use std::rc::Rc;

use image::{Rgb, Rgb32FImage, Rgba, Rgba32FImage};
use pathtile::render::tonemap::display;
use pathtile::render::{
    FrameAction, PresentSource, PreviewRequest, RenderDevice, RenderOptions, Tile, TileCursor, TileRequest,
    TileScheduler,
};
use pathtile::scene::{EnvironmentMap, Material, Mesh, MeshInstance, Scene};
use pathtile::util::{Mat4, Vec3};
use pathtile::{Error, Result};

/// Adds a constant sample to the history and records every call.
#[derive(Debug, Default)]
struct RecordingDevice {
    uploads: u32,
    instance_updates: u32,
    env_updates: u32,
    previews: u32,
    tiles: Vec<Tile>,
    fail_tiles: bool,
}

const SAMPLE: f32 = 0.5;

impl RenderDevice for RecordingDevice {
    fn upload_scene(&mut self, _scene: &Scene) -> Result<()> {
        self.uploads += 1;
        Ok(())
    }

    fn update_instances(&mut self, _scene: &Scene) -> Result<()> {
        self.instance_updates += 1;
        Ok(())
    }

    fn update_environment(&mut self, _scene: &Scene) -> Result<()> {
        self.env_updates += 1;
        Ok(())
    }

    fn render_tile(&mut self, req: &TileRequest<'_>) -> Result<Rgba32FImage> {
        if self.fail_tiles {
            return Err(Error::resource("device lost"));
        }
        let t = req.tile;
        self.tiles.push(t);
        Ok(Rgba32FImage::from_fn(t.width, t.height, |x, y| {
            let h = req.history.get_pixel(t.x + x, t.y + y);
            Rgba([h[0] + SAMPLE, h[1] + SAMPLE, h[2] + SAMPLE, h[3] + 1.0])
        }))
    }

    fn render_preview(&mut self, req: &PreviewRequest<'_>) -> Result<Rgba32FImage> {
        self.previews += 1;
        Ok(Rgba32FImage::from_pixel(req.width, req.height, Rgba([0.25, 0.25, 0.25, 1.0])))
    }
}

fn options(w: u32, h: u32, tw: u32, th: u32) -> RenderOptions {
    RenderOptions {
        resolution: [w, h],
        tile_width: tw,
        tile_height: th,
        ..Default::default()
    }
}

fn scene(options: RenderOptions) -> Scene {
    let mut scene = Scene::with_options(options);
    let mesh = scene.add_mesh(Mesh::from_triangle_soup("tri", &[Vec3::ZERO, Vec3::X, Vec3::Y]).unwrap());
    let mat = scene.add_material(Material::default());
    scene.add_instance(MeshInstance::new("tri", mesh, mat, Mat4::IDENTITY));
    scene.process().unwrap();
    scene
}

fn setup(options: RenderOptions) -> (Scene, TileScheduler<RecordingDevice>) {
    let scene = scene(options);
    let sched = TileScheduler::new(RecordingDevice::default(), scene.options());
    (scene, sched)
}

fn run(sched: &mut TileScheduler<RecordingDevice>, scene: &mut Scene, frames: usize) {
    for _ in 0..frames {
        sched.frame(scene).unwrap();
    }
}

#[test]
fn test_first_frame_uploads_and_previews() {
    let (mut scene, mut sched) = setup(options(200, 200, 100, 100));
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.device().uploads, 1);
    assert_eq!(sched.device().previews, 1);
    assert!(!scene.is_dirty());
    assert_eq!(sched.present_source(&scene), PresentSource::Preview);
    // Default preview scale is a quarter of the resolution
    assert_eq!(sched.present(&scene).dimensions(), (50, 50));
}

#[test]
fn test_two_by_two_grid_flips_after_four_tiles() {
    let (mut scene, mut sched) = setup(options(200, 200, 100, 100));
    run(&mut sched, &mut scene, 1);

    for i in 0..3 {
        let action = sched.frame(&mut scene).unwrap();
        assert!(matches!(action, FrameAction::RenderTile { sample: 1, buffer: 0, pass_complete: false, .. }), "tile {i}");
    }
    let last = sched.frame(&mut scene).unwrap();
    assert!(matches!(last, FrameAction::RenderTile { sample: 1, buffer: 0, pass_complete: true, .. }));

    let state = sched.state();
    assert_eq!(state.sample_counter, 2);
    assert_eq!(state.current_buffer, 1);
    assert_eq!(state.cursor, TileCursor { x: 0, y: 1 });
    assert_eq!(sched.present_source(&scene), PresentSource::Output(0));
}

#[test]
fn test_tiles_start_at_top_row() {
    let (mut scene, mut sched) = setup(options(200, 150, 100, 100));
    run(&mut sched, &mut scene, 5);

    // The partial row sits at the top of the image
    let origins: Vec<(u32, u32, u32)> = sched.device().tiles.iter().map(|t| (t.x, t.y, t.height)).collect();
    assert_eq!(origins, vec![(0, 0, 50), (100, 0, 50), (0, 50, 100), (100, 50, 100)]);
}

#[test]
fn test_sample_counter_follows_tile_count() {
    let (mut scene, mut sched) = setup(options(300, 200, 100, 100));
    let tiles = sched.grid().tile_count();
    assert_eq!(tiles, 6);
    run(&mut sched, &mut scene, 1);

    for n in 1..=20u32 {
        sched.frame(&mut scene).unwrap();
        assert_eq!(sched.sample_count(), 1 + n / tiles, "after {n} tiles");
    }
}

#[test]
fn test_every_tile_once_per_sample() {
    let (mut scene, mut sched) = setup(options(250, 130, 64, 64));
    let tiles = sched.grid().tile_count() as usize;
    run(&mut sched, &mut scene, 1 + 2 * tiles);

    let rendered = &sched.device().tiles;
    let (first, second) = rendered.split_at(tiles);
    let mut a = first.to_vec();
    a.sort_by_key(|t| (t.y, t.x));
    a.dedup();
    assert_eq!(a.len(), tiles);
    assert_eq!(first, second);

    let covered: u32 = a.iter().map(|t| t.width * t.height).sum();
    assert_eq!(covered, 250 * 130);
}

#[test]
fn test_accumulation_and_output_after_one_pass() {
    let (mut scene, mut sched) = setup(options(8, 8, 4, 4));
    run(&mut sched, &mut scene, 5);

    assert!(sched.accumulation().pixels().all(|p| p.0 == [SAMPLE, SAMPLE, SAMPLE, 1.0]));
    let expected = display(Vec3::splat(SAMPLE), scene.options());
    let p = sched.output(0).get_pixel(3, 3);
    assert!((p[0] - expected.x).abs() < 1e-6);
    assert_eq!(p[3], 1.0);
    assert_eq!(sched.present(&scene), sched.output(0));
}

#[test]
fn test_dirty_resets_from_any_state() {
    let (mut scene, mut sched) = setup(options(200, 200, 100, 100));
    run(&mut sched, &mut scene, 7);
    assert_eq!(sched.sample_count(), 2);

    scene.mark_dirty();
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.sample_count(), 1);
    assert_eq!(sched.state().frame_counter, 1);
    assert_eq!(sched.state().cursor, sched.grid().first());
    assert!(sched.accumulation().pixels().all(|p| p.0 == [0.0; 4]));
    assert_eq!(sched.present_source(&scene), PresentSource::Preview);
}

#[test]
fn test_camera_edit_marks_dirty() {
    let (mut scene, mut sched) = setup(options(16, 16, 8, 8));
    run(&mut sched, &mut scene, 5);
    assert_eq!(sched.present_source(&scene), PresentSource::Output(0));

    if let Some(cam) = scene.camera_mut() {
        cam.strafe(0.1, 0.0);
    }
    // The finished pass is stale as soon as the camera moves
    assert_eq!(sched.present_source(&scene), PresentSource::Preview);
    assert_eq!(sched.present(&scene).dimensions(), (4, 4));
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
}

#[test]
fn test_display_option_change_keeps_samples() {
    let calls = Rc::new(Cell::new(0));
    let scene_opts = options(200, 200, 100, 100);
    let mut scene = scene(scene_opts.clone());
    let mut sched =
        TileScheduler::new(RecordingDevice::default(), &scene_opts).with_denoiser(counting_denoiser(calls.clone(), false));
    run(&mut sched, &mut scene, 13);
    assert_eq!(sched.sample_count(), 4);

    let mut opts = scene.options().clone();
    opts.enable_denoiser = true;
    opts.enable_aces = true;
    scene.set_options(opts);
    assert!(!scene.is_dirty());

    assert!(matches!(sched.frame(&mut scene).unwrap(), FrameAction::RenderTile { sample: 4, .. }));
    assert_eq!(sched.sample_count(), 4);
    assert_eq!(calls.get(), 1);
    assert_eq!(sched.present_source(&scene), PresentSource::Denoised);

    // A sampling option still starts over
    let mut opts = scene.options().clone();
    opts.max_depth += 1;
    scene.set_options(opts);
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.sample_count(), 1);
}

#[test]
fn test_sample_budget_leaves_buffers_unchanged() {
    let mut opts = options(200, 200, 100, 100);
    opts.max_spp = Some(2);
    let (mut scene, mut sched) = setup(opts);
    run(&mut sched, &mut scene, 5);
    assert!(sched.is_finished());
    assert_eq!(sched.progress(), Some(1.0));

    let acc = sched.accumulation().clone();
    let outputs = [sched.output(0).clone(), sched.output(1).clone()];
    let calls = sched.device().tiles.len();

    for _ in 0..3 {
        assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Idle);
    }
    assert_eq!(sched.accumulation(), &acc);
    assert_eq!(sched.output(0), &outputs[0]);
    assert_eq!(sched.output(1), &outputs[1]);
    assert_eq!(sched.device().tiles.len(), calls);
}

#[test]
fn test_progress_without_budget() {
    let (mut scene, mut sched) = setup(options(16, 16, 8, 8));
    run(&mut sched, &mut scene, 2);
    assert_eq!(sched.progress(), None);
}

fn counting_denoiser(calls: Rc<Cell<u32>>, fail: bool) -> impl FnMut(&Rgb32FImage) -> Result<Rgb32FImage> {
    move |img: &Rgb32FImage| {
        calls.set(calls.get() + 1);
        if fail {
            Err(Error::filter("out of memory"))
        } else {
            Ok(Rgb32FImage::from_pixel(img.width(), img.height(), Rgb([0.1, 0.2, 0.3])))
        }
    }
}

fn denoise_options() -> RenderOptions {
    let mut opts = options(200, 200, 100, 100);
    opts.enable_denoiser = true;
    opts.denoiser_frame_count = 1;
    opts
}

#[test]
fn test_denoiser_cadence() {
    let calls = Rc::new(Cell::new(0));
    let scene_opts = denoise_options();
    let mut scene = scene(scene_opts.clone());
    let mut sched =
        TileScheduler::new(RecordingDevice::default(), &scene_opts).with_denoiser(counting_denoiser(calls.clone(), false));

    // Preview plus the first pass: nothing to denoise yet
    run(&mut sched, &mut scene, 4);
    assert_eq!(calls.get(), 0);

    // Completing the first pass produces the first denoised image
    run(&mut sched, &mut scene, 1);
    assert_eq!(calls.get(), 1);
    assert_eq!(sched.present_source(&scene), PresentSource::Denoised);
    let p = sched.present(&scene).get_pixel(0, 0);
    assert_eq!(p.0, [0.1, 0.2, 0.3, 1.0]);

    // Then once every denoiser_frame_count * tile_count frames
    run(&mut sched, &mut scene, 3);
    assert_eq!(calls.get(), 2);
    run(&mut sched, &mut scene, 4);
    assert_eq!(calls.get(), 3);

    // Never while dirty
    scene.mark_dirty();
    run(&mut sched, &mut scene, 1);
    assert_eq!(calls.get(), 3);
    assert!(sched.denoised().is_none());
}

#[test]
fn test_denoiser_failure_keeps_noisy_image() {
    let calls = Rc::new(Cell::new(0));
    let scene_opts = denoise_options();
    let mut scene = scene(scene_opts.clone());
    let mut sched =
        TileScheduler::new(RecordingDevice::default(), &scene_opts).with_denoiser(counting_denoiser(calls.clone(), true));

    run(&mut sched, &mut scene, 5);
    assert_eq!(calls.get(), 1);
    assert!(!sched.state().denoised);
    assert_eq!(sched.present_source(&scene), PresentSource::Output(0));

    // Retried on the next tile since no denoised image exists
    run(&mut sched, &mut scene, 1);
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_disabled_denoiser_is_not_called() {
    let calls = Rc::new(Cell::new(0));
    let mut scene_opts = denoise_options();
    scene_opts.enable_denoiser = false;
    let mut scene = scene(scene_opts.clone());
    let mut sched =
        TileScheduler::new(RecordingDevice::default(), &scene_opts).with_denoiser(counting_denoiser(calls.clone(), false));

    run(&mut sched, &mut scene, 12);
    assert_eq!(calls.get(), 0);
    assert!(!sched.state().denoised);
}

#[test]
fn test_resize_resets_everything() {
    let (mut scene, mut sched) = setup(options(200, 200, 100, 100));
    run(&mut sched, &mut scene, 6);

    sched.resize(&mut scene, 300, 100);
    assert_eq!(scene.options().resolution, [300, 100]);
    assert_eq!((sched.grid().cols, sched.grid().rows), (3, 1));
    assert_eq!(sched.accumulation().dimensions(), (300, 100));
    assert_eq!(sched.sample_count(), 1);

    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.output_image(&scene).dimensions(), (300, 100));
}

#[test]
fn test_option_change_reallocates() {
    let (mut scene, mut sched) = setup(options(200, 200, 100, 100));
    run(&mut sched, &mut scene, 3);

    let mut opts = scene.options().clone();
    opts.tile_width = 50;
    scene.set_options(opts);

    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.grid().tile_count(), 8);
}

#[test]
fn test_output_image_is_full_resolution() {
    let (mut scene, mut sched) = setup(options(64, 48, 32, 32));
    run(&mut sched, &mut scene, 1);
    assert_eq!(sched.present(&scene).dimensions(), (16, 12));
    assert_eq!(sched.output_image(&scene).dimensions(), (64, 48));

    run(&mut sched, &mut scene, 4);
    let img = sched.output_image(&scene);
    assert_eq!(img.dimensions(), (64, 48));
    assert_eq!(img.get_pixel(10, 10)[3], 255);
}

#[test]
fn test_instance_and_environment_updates_reach_device() {
    let (mut scene, mut sched) = setup(options(16, 16, 8, 8));
    run(&mut sched, &mut scene, 2);

    scene.move_instance(0, Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))).unwrap();
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.device().instance_updates, 1);
    assert_eq!(sched.device().uploads, 1);

    let sky = EnvironmentMap::from_image("sky", Rgb32FImage::from_pixel(8, 4, Rgb([1.0, 1.0, 1.0]))).unwrap();
    scene.set_environment_map(Some(sky));
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.device().env_updates, 1);

    // Flags are consumed
    run(&mut sched, &mut scene, 2);
    assert_eq!(sched.device().instance_updates, 1);
    assert_eq!(sched.device().env_updates, 1);
}

#[test]
fn test_reprocess_uploads_again() {
    let (mut scene, mut sched) = setup(options(16, 16, 8, 8));
    run(&mut sched, &mut scene, 3);
    scene.process().unwrap();
    assert_eq!(sched.frame(&mut scene).unwrap(), FrameAction::Preview);
    assert_eq!(sched.device().uploads, 2);
}

#[test]
fn test_device_failure_keeps_state() {
    let (mut scene, mut sched) = setup(options(16, 16, 8, 8));
    run(&mut sched, &mut scene, 2);
    let before = *sched.state();

    sched.device_mut().fail_tiles = true;
    assert!(matches!(sched.frame(&mut scene), Err(Error::Resource(_))));
    assert_eq!(*sched.state(), before);

    sched.device_mut().fail_tiles = false;
    assert!(matches!(sched.frame(&mut scene).unwrap(), FrameAction::RenderTile { .. }));
}
