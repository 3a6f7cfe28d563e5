//! Follow camera with physically-derived depth-of-field parameters.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// A look-at camera. The game points `target` at the player; the
/// depth-of-field pass focuses on whatever the camera is looking at, with
/// focal length, aperture, and focal plane derived each frame from the
/// f-number / field of view / sensor width like a physical lens.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,

    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,

    /// Lens f-number (lower = shallower depth of field).
    pub fnumber: f32,
    /// Sensor width in millimetres.
    pub sensor_size: f32,

    // Derived by `update` each frame.
    focal_length: f32,
    aperture: f32,
    focal_plane: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(100.0, 50.0, 150.0),
            target: Vec3::new(100.0, 0.0, 100.0),
            up: Vec3::Y,
            fov: 30f32.to_radians(),
            near: 1.0,
            far: 500.0,
            aspect: 16.0 / 9.0,
            fnumber: 1.4,
            sensor_size: 36.0,
            focal_length: 50.0,
            aperture: 20.0,
            focal_plane: 10000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update aspect ratio (call on window resize).
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    /// Recompute the lens parameters from the current pose. Call once per
    /// frame after moving the camera:
    /// - focal plane: distance to the look-at target, in millimetres;
    /// - focal length: from the field of view and sensor width;
    /// - aperture: focal length over f-number.
    pub fn update(&mut self) {
        self.focal_plane = (self.target - self.position).length() * 1000.0;
        self.focal_length = (self.sensor_size * 0.5) / (self.fov * 0.5).tan();
        self.aperture = self.focal_length / self.fnumber;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Distance to the plane in perfect focus, millimetres.
    pub fn focal_plane(&self) -> f32 {
        self.focal_plane
    }

    /// Lens focal length, millimetres.
    pub fn focal_length(&self) -> f32 {
        self.focal_length
    }

    /// Aperture diameter, millimetres.
    pub fn aperture(&self) -> f32 {
        self.aperture
    }
}

/// Camera uniform data for GPU. `position.w` carries the global time in
/// seconds for shaders that animate (water scroll).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            view: Mat4::IDENTITY.to_cols_array_2d(),
            proj: Mat4::IDENTITY.to_cols_array_2d(),
            position: [0.0; 4],
        }
    }

    pub fn update(&mut self, camera: &Camera, time: f32) {
        self.view = camera.view_matrix().to_cols_array_2d();
        self.proj = camera.projection_matrix().to_cols_array_2d();
        self.view_proj = camera.view_projection_matrix().to_cols_array_2d();
        let pos = camera.position;
        self.position = [pos.x, pos.y, pos.z, time];
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focal_plane_tracks_target_distance() {
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 0.0, 10.0);
        camera.target = Vec3::ZERO;
        camera.update();
        assert!((camera.focal_plane() - 10_000.0).abs() < 1e-2);
    }

    #[test]
    fn aperture_follows_f_number() {
        let mut camera = Camera::new();
        camera.fnumber = 2.0;
        camera.update();
        let expected = camera.focal_length() / 2.0;
        assert!((camera.aperture() - expected).abs() < 1e-4);

        // Derived focal length matches the lens equation.
        let f = (camera.sensor_size * 0.5) / (camera.fov * 0.5).tan();
        assert!((camera.focal_length() - f).abs() < 1e-4);
    }
}
