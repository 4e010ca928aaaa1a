//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader bytecode rejected or module creation failed
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// The presentable image chain could not be created
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Image acquisition failed for a reason other than staleness
    #[error("Failed to acquire swapchain image: {0}")]
    AcquireFailed(vk::Result),

    /// Presentation failed for a reason other than staleness
    #[error("Failed to present swapchain image: {0}")]
    PresentFailed(vk::Result),

    /// A fence or acquire deadline passed; the GPU is presumed hung or lost
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Depth buffer, render pass or framebuffer creation failed
    #[error("Render target error: {0}")]
    RenderTargetError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Returns `true` for errors that mean the device can no longer be trusted.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RhiError::Timeout(_) | RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
