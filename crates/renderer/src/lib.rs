//! Frame scheduling and swapchain-dependent resources.
//!
//! This crate assembles the device layer into a rendering loop:
//! - [`RenderTargetSet`]: depth buffer, render pass and framebuffers
//! - [`PipelineSet`]: graphics pipelines bound to that render pass
//! - [`FrameScheduler`]: acquire, record, submit, present and recreation
//!
//! Shader bytecode comes from a [`ShaderSource`]; meshes are plain
//! [`MeshData`] uploaded at initialization.

mod error;

pub mod config;
pub mod mesh;
pub mod pipeline_set;
pub mod push_constants;
pub mod render_object;
pub mod render_targets;
pub mod scheduler;
pub mod shaders;

pub use config::SchedulerConfig;
pub use error::{RenderError, RenderResult};
pub use mesh::{MeshData, MeshHandle};
pub use pipeline_set::{MaterialHandle, PipelineDesc, PipelineSet};
pub use push_constants::{MeshPushConstants, PushConstantLayout};
pub use render_object::RenderObject;
pub use render_targets::RenderTargetSet;
pub use scheduler::{FrameOutcome, FrameScheduler, FrameStats, SchedulerState};
pub use shaders::{InMemoryShaders, ShaderSource, SpirvDirectory};
