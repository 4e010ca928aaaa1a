//! Window and surface glue between winit and the vkframe device layer.
//!
//! - [`Window`] wraps a winit window and reports its framebuffer size
//! - [`Surface`] owns the Vulkan surface created for it

mod surface;
mod window;

pub use surface::{Surface, required_extensions};
pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
