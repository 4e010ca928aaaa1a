//! Vulkan device layer (Render Hardware Interface) for vkframe.
//!
//! This crate wraps `ash` behind the [`DeviceContext`](context::DeviceContext)
//! trait and provides the pieces the frame scheduler is assembled from:
//! - Instance, physical device selection and the logical device
//! - The presentation surface (swapchain) and its recreation
//! - The frames-in-flight synchronization ring
//! - Command buffer recording
//! - Shader modules, graphics pipelines and the vertex format

mod error;

pub mod buffer;
pub mod command;
pub mod context;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use context::DeviceContext;
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
