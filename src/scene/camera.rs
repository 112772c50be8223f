//! Orbit camera.
//!
//! The camera orbits a pivot at a given radius. Yaw and pitch are kept in
//! radians; pitch is clamped just short of the poles so the basis stays valid.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::util::Vec3;

const PITCH_LIMIT: f32 = 1.55;
const MIN_RADIUS: f32 = 1e-3;

/// Serializable camera description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraDesc {
    pub position: [f32; 3],
    pub look_at: [f32; 3],
    /// Vertical field of view in degrees.
    pub fov: f32,
    #[serde(default)]
    pub aperture: f32,
    #[serde(default = "default_focal_dist")]
    pub focal_dist: f32,
}

fn default_focal_dist() -> f32 {
    0.1
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub focal_dist: f32,
    pub aperture: f32,
    pivot: Vec3,
    yaw: f32,
    pitch: f32,
    radius: f32,
}

impl Camera {
    /// Camera at `eye` looking at `look_at` with a vertical fov in degrees.
    pub fn new(eye: Vec3, look_at: Vec3, fov_degrees: f32) -> Self {
        let dir = (look_at - eye).try_normalize().unwrap_or(Vec3::NEG_Z);
        let mut cam = Self {
            position: eye,
            forward: dir,
            right: Vec3::X,
            up: Vec3::Y,
            fov: fov_degrees.to_radians(),
            focal_dist: 0.1,
            aperture: 0.0,
            pivot: look_at,
            yaw: dir.z.atan2(dir.x),
            pitch: dir.y.clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT),
            radius: eye.distance(look_at).max(MIN_RADIUS),
        };
        cam.update();
        cam
    }

    pub fn from_desc(desc: &CameraDesc) -> Self {
        let mut cam = Self::new(Vec3::from(desc.position), Vec3::from(desc.look_at), desc.fov);
        cam.aperture = desc.aperture;
        cam.focal_dist = desc.focal_dist;
        cam
    }

    /// Rotate around the pivot by yaw/pitch deltas in radians.
    pub fn offset_orientation(&mut self, dx: f32, dy: f32) {
        self.yaw += dx;
        self.pitch = (self.pitch - dy).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.update();
    }

    /// Pan the pivot in the view plane.
    pub fn strafe(&mut self, dx: f32, dy: f32) {
        self.pivot += self.right * -dx + self.up * dy;
        self.update();
    }

    /// Move toward (negative) or away from (positive) the pivot.
    pub fn set_radius(&mut self, dr: f32) {
        self.radius = (self.radius + dr).max(MIN_RADIUS);
        self.update();
    }

    pub fn set_fov(&mut self, fov_degrees: f32) {
        self.fov = fov_degrees.to_radians();
    }

    pub fn pivot(&self) -> Vec3 {
        self.pivot
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    fn update(&mut self) {
        let forward = Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize();
        self.forward = forward;
        self.position = self.pivot - forward * self.radius;
        self.right = forward.cross(Vec3::Y).normalize();
        self.up = self.right.cross(forward).normalize();
    }

    /// Pinhole ray direction through normalized device coordinates in `[-1, 1]`
    /// (`+y` up).
    pub fn ray_direction(&self, ndc_x: f32, ndc_y: f32, aspect: f32) -> Vec3 {
        self.to_uniform().ray_direction(ndc_x, ndc_y, aspect)
    }

    pub fn to_uniform(&self) -> CameraUniform {
        CameraUniform {
            position: self.position.to_array(),
            fov: self.fov,
            right: self.right.to_array(),
            focal_dist: self.focal_dist,
            up: self.up.to_array(),
            aperture: self.aperture,
            forward: self.forward.to_array(),
            _pad: 0.0,
        }
    }
}

/// Camera block for device upload (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: [f32; 3],
    pub fov: f32,
    pub right: [f32; 3],
    pub focal_dist: f32,
    pub up: [f32; 3],
    pub aperture: f32,
    pub forward: [f32; 3],
    _pad: f32,
}

impl CameraUniform {
    /// See [`Camera::ray_direction`].
    pub fn ray_direction(&self, ndc_x: f32, ndc_y: f32, aspect: f32) -> Vec3 {
        let scale = (self.fov * 0.5).tan();
        let (f, r, u) = (Vec3::from(self.forward), Vec3::from(self.right), Vec3::from(self.up));
        (f + r * (ndc_x * scale * aspect) + u * (ndc_y * scale)).normalize()
    }
}
