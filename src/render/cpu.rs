//! CPU reference device.
//!
//! Consumes exactly the arrays a compute device receives: the flattened node
//! array, global triangle indices, packed vertices/normals, per-instance
//! transforms, materials, lights and the texture array. Traversal is
//! iterative over both levels with a single index stack; entering an instance
//! pushes a `-1` marker that restores the world-space ray when popped.
//!
//! The integrator is deliberately small: emissive surfaces, analytic rect and
//! sphere lights hit by chance, cosine-weighted diffuse bounces, Russian
//! roulette and environment or background radiance on a miss.

use std::f32::consts::PI;

use image::Rgba32FImage;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::device::{FrameUniforms, PreviewRequest, RenderDevice, TileRequest};
use crate::bvh::{FlatNode, NodeKind};
use crate::scene::{EnvironmentMap, Light, LightKind, Material, Scene, NO_TEXTURE};
use crate::util::{Error, Mat4, Result, Vec2, Vec3};

const EPSILON: f32 = 1e-4;

/// Inline traversal stack size before spilling to the heap.
const STACK_SIZE: usize = 64;

/// Marker that restores the world-space ray.
const POP_INSTANCE: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct Ray {
    origin: Vec3,
    dir: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    t: f32,
    tri: u32,
    instance: u32,
    material: u32,
    u: f32,
    v: f32,
}

#[derive(Debug, Default)]
pub struct CpuDevice {
    nodes: Vec<FlatNode>,
    top_level_index: usize,
    vertex_indices: Vec<[u32; 3]>,
    vertices: Vec<[f32; 4]>,
    normals: Vec<[f32; 4]>,
    transforms: Vec<Mat4>,
    inv_transforms: Vec<Mat4>,
    materials: Vec<Material>,
    lights: Vec<Light>,
    textures: Vec<u8>,
    texture_size: (u32, u32),
    env: Option<EnvironmentMap>,
    uploaded: bool,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded
    }

    /// Uploaded node array, for inspection.
    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    fn set_transforms(&mut self, transforms: &[Mat4]) {
        self.transforms = transforms.to_vec();
        self.inv_transforms = transforms.iter().map(Mat4::inverse).collect();
    }

    fn require_upload(&self) -> Result<()> {
        if self.uploaded {
            Ok(())
        } else {
            Err(Error::resource("scene has not been uploaded to the CPU device"))
        }
    }

    // ---- traversal ---------------------------------------------------------

    /// Closest hit along `world` within `t_max`.
    fn intersect(&self, world: &Ray, t_max: f32) -> Option<Hit> {
        if self.nodes.len() <= self.top_level_index {
            return None;
        }
        let mut stack: SmallVec<[i32; STACK_SIZE]> = SmallVec::new();
        stack.push(self.top_level_index as i32);

        let mut ray = *world;
        let mut inv_dir = ray.dir.recip();
        let mut instance: Option<(u32, u32)> = None;
        let mut closest = t_max;
        let mut best = None;

        while let Some(index) = stack.pop() {
            if index == POP_INSTANCE {
                ray = *world;
                inv_dir = ray.dir.recip();
                instance = None;
                continue;
            }
            let node = &self.nodes[index as usize];
            if node.bounds().intersect_ray(ray.origin, inv_dir, 0.0, closest).is_none() {
                continue;
            }
            match node.kind() {
                NodeKind::Internal { left, right } => {
                    stack.push(right as i32);
                    stack.push(left as i32);
                }
                NodeKind::Geometry { first_tri, tri_count } => {
                    let Some((inst, material)) = instance else {
                        continue;
                    };
                    for tri in first_tri..first_tri + tri_count {
                        if let Some((t, u, v)) = self.intersect_triangle(&ray, tri, closest) {
                            closest = t;
                            best = Some(Hit {
                                t,
                                tri,
                                instance: inst,
                                material,
                                u,
                                v,
                            });
                        }
                    }
                }
                NodeKind::Instance {
                    blas_root,
                    material_id,
                    instance_id,
                } => {
                    // Local direction stays unnormalized so t is shared with world space
                    let inv = &self.inv_transforms[instance_id as usize];
                    ray = Ray {
                        origin: inv.transform_point3(world.origin),
                        dir: inv.transform_vector3(world.dir),
                    };
                    inv_dir = ray.dir.recip();
                    instance = Some((instance_id, material_id));
                    stack.push(POP_INSTANCE);
                    stack.push(blas_root as i32);
                }
            }
        }
        best
    }

    #[inline]
    fn position(&self, i: u32) -> Vec3 {
        let v = self.vertices[i as usize];
        Vec3::new(v[0], v[1], v[2])
    }

    /// Moller-Trumbore. Returns (t, u, v).
    fn intersect_triangle(&self, ray: &Ray, tri: u32, t_max: f32) -> Option<(f32, f32, f32)> {
        let [a, b, c] = self.vertex_indices[tri as usize];
        let p0 = self.position(a);
        let e1 = self.position(b) - p0;
        let e2 = self.position(c) - p0;

        let pv = ray.dir.cross(e2);
        let det = e1.dot(pv);
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let tv = ray.origin - p0;
        let u = tv.dot(pv) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let qv = tv.cross(e1);
        let v = ray.dir.dot(qv) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(qv) * inv_det;
        (t > EPSILON && t < t_max).then_some((t, u, v))
    }

    /// Nearest analytic light closer than `t_max`: (t, emission).
    fn intersect_lights(&self, ray: &Ray, t_max: f32) -> Option<(f32, Vec3)> {
        let mut best: Option<(f32, Vec3)> = None;
        for light in &self.lights {
            let pos = Vec3::from(light.position);
            let t = match light.kind() {
                LightKind::Sphere => intersect_sphere(ray, pos, light.radius),
                LightKind::Rect => intersect_rect(ray, pos, Vec3::from(light.u), Vec3::from(light.v)),
                LightKind::Distant => None,
            };
            if let Some(t) = t {
                if t < t_max && best.map_or(true, |(bt, _)| t < bt) {
                    best = Some((t, Vec3::from(light.emission)));
                }
            }
        }
        best
    }

    // ---- shading -----------------------------------------------------------

    fn texel(&self, layer: i32, uv: Vec2) -> Vec3 {
        let (w, h) = self.texture_size;
        let layer_bytes = w as usize * h as usize * 4;
        let x = ((uv.x.rem_euclid(1.0) * w as f32) as u32).min(w.saturating_sub(1));
        let y = (((1.0 - uv.y.rem_euclid(1.0)) * h as f32) as u32).min(h.saturating_sub(1));
        let at = layer as usize * layer_bytes + (y as usize * w as usize + x as usize) * 4;
        let srgb = match self.textures.get(at..at + 3) {
            Some(px) => Vec3::new(px[0] as f32, px[1] as f32, px[2] as f32) / 255.0,
            None => Vec3::ONE,
        };
        srgb.powf(2.2)
    }

    fn miss(&self, dir: Vec3, u: &FrameUniforms) -> Vec3 {
        match &self.env {
            Some(env) if u.enable_env_map => env.lookup(dir, u.env_map_rotation) * u.env_map_intensity,
            _ => Vec3::from(u.background),
        }
    }

    /// One path sample: linear RGB plus coverage alpha.
    fn trace(&self, mut ray: Ray, u: &FrameUniforms, rng: &mut Rng) -> [f32; 4] {
        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;

        for depth in 0..=u.max_depth {
            let hit = self.intersect(&ray, f32::MAX);
            let t_surface = hit.map_or(f32::MAX, |h| h.t);

            if let Some((_, emission)) = self.intersect_lights(&ray, t_surface) {
                radiance += throughput * emission;
                break;
            }

            let Some(hit) = hit else {
                if depth == 0 && u.transparent_background {
                    return [radiance.x, radiance.y, radiance.z, 0.0];
                }
                let sky = if depth == 0 && u.enable_background {
                    Vec3::from(u.background)
                } else {
                    self.miss(ray.dir, u)
                };
                radiance += throughput * sky;
                break;
            };

            let [a, b, c] = self.vertex_indices[hit.tri as usize];
            let w = 1.0 - hit.u - hit.v;
            let attr = |i: u32| {
                let n = self.normals[i as usize];
                (Vec3::new(n[0], n[1], n[2]), Vec2::new(self.vertices[i as usize][3], n[3]))
            };
            let ((na, ta), (nb, tb), (nc, tc)) = (attr(a), attr(b), attr(c));
            let uv = ta * w + tb * hit.u + tc * hit.v;

            let inv = &self.inv_transforms[hit.instance as usize];
            let mut normal = inv
                .transpose()
                .transform_vector3(na * w + nb * hit.u + nc * hit.v)
                .normalize_or_zero();
            if normal == Vec3::ZERO {
                normal = -ray.dir.normalize();
            }
            if normal.dot(ray.dir) > 0.0 {
                normal = -normal;
            }

            let material = self.materials.get(hit.material as usize).copied().unwrap_or_default();
            radiance += throughput * Vec3::from(material.emission);
            if depth == u.max_depth {
                break;
            }

            let mut albedo = Vec3::from(material.base_color);
            if material.base_color_tex != NO_TEXTURE {
                albedo *= self.texel(material.base_color_tex, uv);
            }
            throughput *= albedo;

            if u.enable_rr && depth >= u.rr_depth {
                let q = throughput.max_element().min(0.95);
                if q <= 0.0 || rng.next_f32() > q {
                    break;
                }
                throughput /= q;
            }

            let position = ray.origin + ray.dir * hit.t;
            ray = Ray {
                origin: position + normal * EPSILON,
                dir: cosine_hemisphere(normal, rng.next_f32(), rng.next_f32()),
            };
        }

        [radiance.x, radiance.y, radiance.z, 1.0]
    }

    fn shade_pixel(&self, x: u32, y: u32, size: (u32, u32), seed: u32, u: &FrameUniforms) -> [f32; 4] {
        let (w, h) = size;
        let mut rng = Rng::new(x, y, seed);
        let jx = rng.next_f32();
        let jy = rng.next_f32();
        let ndc_x = 2.0 * (x as f32 + jx) / w as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * (y as f32 + jy) / h as f32;
        let ray = Ray {
            origin: Vec3::from(u.camera.position),
            dir: u.camera.ray_direction(ndc_x, ndc_y, w as f32 / h as f32),
        };
        self.trace(ray, u, &mut rng)
    }
}

impl RenderDevice for CpuDevice {
    #[tracing::instrument(skip_all)]
    fn upload_scene(&mut self, scene: &Scene) -> Result<()> {
        if !scene.is_processed() {
            return Err(Error::NotProcessed);
        }
        let flat = scene.flattener();
        let buf = scene.buffers();
        self.nodes = flat.nodes().to_vec();
        self.top_level_index = flat.top_level_index();
        self.vertex_indices = buf.vertex_indices.clone();
        self.vertices = buf.vertices_uvx.clone();
        self.normals = buf.normals_uvy.clone();
        self.set_transforms(&buf.transforms);
        self.materials = scene.materials().to_vec();
        self.lights = scene.lights().to_vec();
        self.textures = buf.texture_array.clone();
        self.texture_size = buf.texture_size;
        self.env = scene.environment_map().cloned();
        self.uploaded = true;
        tracing::debug!(nodes = self.nodes.len(), triangles = self.vertex_indices.len(), "scene uploaded");
        Ok(())
    }

    fn update_instances(&mut self, scene: &Scene) -> Result<()> {
        self.require_upload()?;
        let flat = scene.flattener();
        let top = flat.top_level_nodes();
        if flat.top_level_index() != self.top_level_index || self.nodes.len() - self.top_level_index != top.len() {
            return Err(Error::resource("top-level region changed size; full upload required"));
        }
        self.nodes[self.top_level_index..].copy_from_slice(top);
        self.set_transforms(&scene.buffers().transforms);
        self.materials = scene.materials().to_vec();
        Ok(())
    }

    fn update_environment(&mut self, scene: &Scene) -> Result<()> {
        self.require_upload()?;
        self.env = scene.environment_map().cloned();
        Ok(())
    }

    fn render_tile(&mut self, req: &TileRequest<'_>) -> Result<Rgba32FImage> {
        self.require_upload()?;
        if req.history.dimensions() != req.image_size {
            return Err(Error::resource(format!(
                "history is {:?}, image is {:?}",
                req.history.dimensions(),
                req.image_size
            )));
        }
        let tile = req.tile;
        let seed = req.frame.wrapping_mul(0x9e37_79b9) ^ req.sample;
        let mut out = Rgba32FImage::new(tile.width, tile.height);
        let this: &Self = self;

        out.par_chunks_exact_mut(tile.width as usize * 4)
            .enumerate()
            .for_each(|(ty, row)| {
                let y = tile.y + ty as u32;
                for (tx, px) in row.chunks_exact_mut(4).enumerate() {
                    let x = tile.x + tx as u32;
                    let s = this.shade_pixel(x, y, req.image_size, seed, req.uniforms);
                    let h = req.history.get_pixel(x, y);
                    for k in 0..4 {
                        px[k] = h[k] + s[k];
                    }
                }
            });
        Ok(out)
    }

    fn render_preview(&mut self, req: &PreviewRequest<'_>) -> Result<Rgba32FImage> {
        self.require_upload()?;
        let size = (req.width.max(1), req.height.max(1));
        let mut out = Rgba32FImage::new(size.0, size.1);
        let this: &Self = self;

        out.par_chunks_exact_mut(size.0 as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let s = this.shade_pixel(x as u32, y as u32, size, req.frame, req.uniforms);
                    px.copy_from_slice(&s);
                }
            });
        Ok(out)
    }
}

fn intersect_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let oc = ray.origin - center;
    let a = ray.dir.length_squared();
    let half_b = oc.dot(ray.dir);
    let c = oc.length_squared() - radius * radius;
    let disc = half_b * half_b - a * c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    [(-half_b - sq) / a, (-half_b + sq) / a]
        .into_iter()
        .find(|&t| t > EPSILON)
}

fn intersect_rect(ray: &Ray, corner: Vec3, u: Vec3, v: Vec3) -> Option<f32> {
    let n = u.cross(v);
    let denom = n.dot(ray.dir);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = n.dot(corner - ray.origin) / denom;
    if t <= EPSILON {
        return None;
    }
    let d = ray.origin + ray.dir * t - corner;
    let a1 = d.dot(u) / u.length_squared();
    let a2 = d.dot(v) / v.length_squared();
    ((0.0..=1.0).contains(&a1) && (0.0..=1.0).contains(&a2)).then_some(t)
}

fn cosine_hemisphere(n: Vec3, r1: f32, r2: f32) -> Vec3 {
    let phi = 2.0 * PI * r1;
    let r = r2.sqrt();
    let (t, b) = n.any_orthonormal_pair();
    (t * (r * phi.cos()) + b * (r * phi.sin()) + n * (1.0 - r2).max(0.0).sqrt()).normalize()
}

/// PCG hash based per-pixel generator.
struct Rng(u32);

impl Rng {
    fn new(x: u32, y: u32, seed: u32) -> Self {
        Self(pcg(x ^ pcg(y ^ pcg(seed))))
    }

    fn next_f32(&mut self) -> f32 {
        self.0 = pcg(self.0);
        (self.0 >> 8) as f32 / (1u32 << 24) as f32
    }
}

#[inline]
fn pcg(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}
