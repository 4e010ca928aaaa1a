//! Scene math for vkframe.
//!
//! - [`Transform`] places render objects in the world
//! - [`Camera`] supplies the view and projection for the frame

pub mod camera;
pub mod transform;

pub use camera::Camera;
pub use transform::Transform;
