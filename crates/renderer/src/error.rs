//! Renderer error types.

use thiserror::Error;
use vkframe_rhi::RhiError;

use crate::mesh::MeshHandle;
use crate::pipeline_set::MaterialHandle;
use crate::scheduler::SchedulerState;

/// Errors from the frame scheduler and the objects it owns.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A device, presentation or synchronization call failed
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// An operation was called in a state that does not allow it
    #[error("{operation} is not allowed while the scheduler is {state}")]
    InvalidState {
        operation: &'static str,
        state: SchedulerState,
    },

    /// Shader bytecode could not be obtained
    #[error("Shader source error: {0}")]
    ShaderSource(String),

    /// A render object refers to a mesh that was never uploaded
    #[error("Unknown mesh {0:?}")]
    UnknownMesh(MeshHandle),

    /// A render object refers to a material with no pipeline
    #[error("Unknown material {0:?}")]
    UnknownMaterial(MaterialHandle),

    /// A mesh without vertices was handed to the scheduler
    #[error("Mesh '{0}' has no vertices")]
    EmptyMesh(String),
}

impl RenderError {
    /// Whether the error leaves the scheduler unusable.
    ///
    /// Input validation errors are reported before any GPU work for the
    /// frame starts, so they are not fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RenderError::InvalidState { .. }
                | RenderError::UnknownMesh(_)
                | RenderError::UnknownMaterial(_)
        )
    }
}

/// Result type for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::vk;

    #[test]
    fn test_invalid_state_message() {
        let err = RenderError::InvalidState {
            operation: "render_frame",
            state: SchedulerState::Uninitialized,
        };
        assert_eq!(
            err.to_string(),
            "render_frame is not allowed while the scheduler is uninitialized"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rhi_errors_are_fatal() {
        let err: RenderError = RhiError::Timeout("frame slot 0".to_string()).into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("frame slot 0"));

        let err: RenderError = RhiError::from(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(err.is_fatal());
    }
}
