//! Core utilities shared by every vkframe crate.
//!
//! This crate provides the foundations the other layers build on:
//! - Error types and result aliases
//! - Logging initialization
//! - Engine configuration loaded from TOML
//! - [`DeletionQueue`], the deferred teardown list used by GPU components

mod config;
mod deletion_queue;
mod error;
mod logging;

pub use config::{
    CullFace, EngineConfig, FrameConfig, PipelineConfig, RenderConfig, SurfaceConfig,
    WindowConfig,
};
pub use deletion_queue::DeletionQueue;
pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_with};
