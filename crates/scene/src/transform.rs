//! Object placement in world space.
//!
//! A [`Transform`] is position, rotation and scale composed as
//! `translation * rotation * scale`. Render objects carry the resulting
//! model matrix.
//!
//! # Example
//!
//! ```
//! use vkframe_scene::Transform;
//! use glam::{Quat, Vec3};
//!
//! let transform = Transform::new()
//!     .with_position(Vec3::new(2.0, 0.0, 0.0))
//!     .with_rotation(Quat::from_rotation_y(0.5));
//!
//! let origin = transform.model_matrix().transform_point3(Vec3::ZERO);
//! assert!((origin - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale of one object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Identity transform at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Rotates around the world Y axis by `radians`, on top of the current rotation.
    pub fn rotate_y(&mut self, radians: f32) {
        self.rotation = (Quat::from_rotation_y(radians) * self.rotation).normalize();
    }

    /// Object-to-world matrix.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
