//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every section is optional and falls
//! back to defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [frames]
//! in_flight = 2
//! fence_timeout_ms = 1000
//!
//! [[pipelines]]
//! name = "mesh"
//! vertex_shader = "mesh.vert.spv"
//! fragment_shader = "mesh.frag.spv"
//! cull = "back"
//! push_constants = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Largest accepted number of frames in flight.
const MAX_FRAMES_IN_FLIGHT: u32 = 4;

/// Top-level engine configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub frames: FrameConfig,
    pub surface: SurfaceConfig,
    pub render: RenderConfig,
    /// Graphics pipelines built at initialize time, in material-handle order.
    pub pipelines: Vec<PipelineConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            frames: FrameConfig::default(),
            surface: SurfaceConfig::default(),
            render: RenderConfig::default(),
            pipelines: vec![PipelineConfig::mesh()],
        }
    }
}

/// Initial window settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "vkframe".to_string(),
        }
    }
}

/// Frame pacing and synchronization settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    /// Maximum number of frames queued to the GPU at once.
    pub in_flight: u32,
    /// How long to wait for a frame slot's fence before treating the GPU as hung.
    pub fence_timeout_ms: u64,
    /// Timeout handed to the presentation engine when acquiring an image.
    pub acquire_timeout_ms: u64,
    /// Poll interval while the window reports a zero-sized framebuffer.
    pub minimized_poll_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            in_flight: 2,
            fence_timeout_ms: 1000,
            acquire_timeout_ms: 1000,
            minimized_poll_ms: 16,
        }
    }
}

/// Presentation settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfig {
    /// Prefer a low-latency present mode (mailbox) over plain vsync when available.
    pub prefer_low_latency: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            prefer_low_latency: true,
        }
    }
}

/// Rendering settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Directory compiled shaders are read from.
    pub shader_dir: PathBuf,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.1, 1.0],
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spirv"),
            log_filter: "info,vkframe=debug".to_string(),
        }
    }
}

/// Face culling choice for a pipeline.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CullFace {
    #[default]
    Back,
    None,
}

/// One graphics pipeline to build.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    /// Logical shader names handed to the shader source.
    pub vertex_shader: String,
    pub fragment_shader: String,
    #[serde(default)]
    pub cull: CullFace,
    /// Whether the pipeline layout carries the per-object push constant range.
    #[serde(default = "default_true")]
    pub push_constants: bool,
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// The stock mesh pipeline: back-face culling with per-object push constants.
    pub fn mesh() -> Self {
        Self {
            name: "mesh".to_string(),
            vertex_shader: "mesh.vert.spv".to_string(),
            fragment_shader: "mesh.frag.spv".to_string(),
            cull: CullFace::Back,
            push_constants: true,
        }
    }
}

impl EngineConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it does not parse or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;

        info!(
            "Configuration loaded from {:?} ({} pipeline(s), {} frame(s) in flight)",
            path,
            config.pipelines.len(),
            config.frames.in_flight
        );
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// A document without `[[pipelines]]` gets the stock mesh pipeline.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges the renderer relies on.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be nonzero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if self.frames.in_flight == 0 || self.frames.in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(Error::Config(format!(
                "frames.in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames.in_flight
            )));
        }

        if self.frames.fence_timeout_ms == 0 || self.frames.acquire_timeout_ms == 0 {
            return Err(Error::Config(
                "frame timeouts must be greater than zero".to_string(),
            ));
        }

        if self.pipelines.is_empty() {
            return Err(Error::Config(
                "at least one pipeline must be configured".to_string(),
            ));
        }

        for (i, pipeline) in self.pipelines.iter().enumerate() {
            if pipeline.name.is_empty() {
                return Err(Error::Config(format!("pipeline #{} has no name", i)));
            }
            if self.pipelines[..i].iter().any(|p| p.name == pipeline.name) {
                return Err(Error::Config(format!(
                    "duplicate pipeline name '{}'",
                    pipeline.name
                )));
            }
        }

        if self
            .render
            .clear_color
            .iter()
            .any(|c| !(0.0..=1.0).contains(c))
        {
            return Err(Error::Config(format!(
                "clear_color components must be within 0..=1, got {:?}",
                self.render.clear_color
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.window, WindowConfig::default());
        assert_eq!(config.frames.in_flight, 2);
        assert_eq!(config.frames.fence_timeout_ms, 1000);
        assert!(config.surface.prefer_low_latency);
        assert_eq!(config.pipelines, vec![PipelineConfig::mesh()]);
    }

    #[test]
    fn test_parses_pipeline_variants() {
        let text = r#"
            [frames]
            in_flight = 3

            [[pipelines]]
            name = "lit"
            vertex_shader = "lit.vert.spv"
            fragment_shader = "lit.frag.spv"

            [[pipelines]]
            name = "flat"
            vertex_shader = "flat.vert.spv"
            fragment_shader = "flat.frag.spv"
            cull = "none"
            push_constants = false
        "#;

        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.frames.in_flight, 3);
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipelines[0].cull, CullFace::Back);
        assert!(config.pipelines[0].push_constants);
        assert_eq!(config.pipelines[1].cull, CullFace::None);
        assert!(!config.pipelines[1].push_constants);
    }

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_explicit_empty_pipeline_list_is_rejected() {
        let err = EngineConfig::from_toml_str("pipelines = []").unwrap_err();
        assert!(err.to_string().contains("pipeline"));
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let err = EngineConfig::from_toml_str("[frames]\nin_flight = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let err = EngineConfig::from_toml_str("[frames]\nin_flight = 9").unwrap_err();
        assert!(err.to_string().contains("in_flight"));
    }

    #[test]
    fn test_rejects_zero_window() {
        let err = EngineConfig::from_toml_str("[window]\nwidth = 0").unwrap_err();
        assert!(err.to_string().contains("window size"));
    }

    #[test]
    fn test_rejects_duplicate_pipeline_names() {
        let text = r#"
            [[pipelines]]
            name = "a"
            vertex_shader = "v"
            fragment_shader = "f"

            [[pipelines]]
            name = "a"
            vertex_shader = "v"
            fragment_shader = "f"
        "#;
        let err = EngineConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_out_of_range_clear_color() {
        let err =
            EngineConfig::from_toml_str("[render]\nclear_color = [0.0, 2.0, 0.0, 1.0]").unwrap_err();
        assert!(err.to_string().contains("clear_color"));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("[frames]\nin_fligth = 2").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = EngineConfig::load("/definitely/not/here/vkframe.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_sample_config_parses() {
        let config =
            EngineConfig::from_toml_str(include_str!("../../../config/vkframe.toml")).unwrap();
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipelines[1].cull, CullFace::None);
        assert_eq!(config.window.title, "vkframe");
    }
}
