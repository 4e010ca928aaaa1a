//! Perspective camera.
//!
//! The projection is built for Vulkan clip space: depth in 0..1 and Y
//! pointing down, so the Y axis of the projection is flipped relative to
//! the usual right-handed convention.

use glam::{Mat4, Vec3};

/// A look-at camera with a perspective projection.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height of the render target
    aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            fov_y: 70.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    /// Create a new camera with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    /// Current aspect ratio.
    #[inline]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    /// Matches the aspect ratio to a render target of `width` x `height` pixels.
    ///
    /// A zero-sized target (a minimized window) leaves the aspect unchanged.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.aspect = width as f32 / height as f32;
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    /// Get the projection matrix (with Vulkan Y-flip).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get the forward direction vector.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_viewport_size_sets_aspect() {
        let mut camera = Camera::new();
        camera.set_viewport_size(1024, 768);
        assert!((camera.aspect() - 1024.0 / 768.0).abs() < EPSILON);
    }

    #[test]
    fn test_zero_viewport_keeps_aspect() {
        let mut camera = Camera::new();
        camera.set_viewport_size(800, 600);
        camera.set_viewport_size(0, 600);
        assert!((camera.aspect() - 800.0 / 600.0).abs() < EPSILON);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::new();
        let proj = camera.projection_matrix();
        let unflipped = Mat4::perspective_rh(camera.fov_y, camera.aspect(), camera.near, camera.far);
        assert!((proj.y_axis.y + unflipped.y_axis.y).abs() < EPSILON);
        assert!(proj.y_axis.y < 0.0);
    }

    #[test]
    fn test_target_lands_in_center_of_clip_space() {
        let camera = Camera::new()
            .with_position(Vec3::new(0.0, 2.0, 5.0))
            .with_target(Vec3::new(0.0, 1.0, 0.0));

        let clip = camera.view_projection_matrix() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPSILON);
        assert!(ndc.y.abs() < EPSILON);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn test_point_above_target_maps_to_upper_half() {
        let camera = Camera::new();
        let clip = camera.view_projection_matrix() * Vec3::new(0.0, 0.5, 0.0).extend(1.0);
        // Vulkan NDC has Y pointing down
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_forward_points_at_target() {
        let camera = Camera::new()
            .with_position(Vec3::new(0.0, 0.0, 4.0))
            .with_target(Vec3::ZERO);
        assert!((camera.forward() - Vec3::NEG_Z).length() < EPSILON);
    }
}
