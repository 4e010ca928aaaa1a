//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a resettable `VkCommandPool` for the context's queue family
//! - [`CommandBuffer`] wraps a `VkCommandBuffer` with methods for recording
//!   the commands a forward pass needs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::context::DeviceContext;
//! use vkframe_rhi::command::CommandPool;
//!
//! # fn example(device: Arc<dyn DeviceContext>) -> vkframe_rhi::RhiResult<()> {
//! let pool = CommandPool::new(device)?;
//! let buffers = pool.allocate_command_buffers(2)?;
//!
//! let cmd = &buffers[0];
//! cmd.reset()?;
//! cmd.begin()?;
//! // ... record rendering commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::info;

use crate::context::{DeviceContext, RenderPassBegin};
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Created with `RESET_COMMAND_BUFFER` so each frame's buffer can be reset on
/// its own. Destroying the pool frees every buffer allocated from it.
///
/// # Thread Safety
///
/// Command pools are not thread-safe. Record from the thread that owns the pool.
pub struct CommandPool {
    device: Arc<dyn DeviceContext>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a command pool for the context's queue family.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new(device: Arc<dyn DeviceContext>) -> RhiResult<Self> {
        let pool = device.create_command_pool()?;

        info!(
            "Command pool created for queue family {}",
            device.queue_family_index()
        );

        Ok(Self { device, pool })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    ///
    /// The buffers stay valid until this pool is dropped.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let handles = self.device.allocate_command_buffers(self.pool, count)?;
        Ok(handles
            .into_iter()
            .map(|buffer| CommandBuffer::from_handle(Arc::clone(&self.device), buffer))
            .collect())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
        info!("Command pool destroyed");
    }
}

/// Vulkan command buffer wrapper.
///
/// Commands are recorded between [`begin`](Self::begin) and [`end`](Self::end).
///
/// # Note
///
/// The command buffer does NOT own the underlying `VkCommandBuffer` handle.
/// The handle is freed when the owning [`CommandPool`] is destroyed.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<dyn DeviceContext>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<dyn DeviceContext>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if beginning fails (e.g., if already recording).
    pub fn begin(&self) -> RhiResult<()> {
        self.device.begin_command_buffer(self.buffer)
    }

    /// Ends recording.
    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Resets the buffer to the initial state. The buffer must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    /// Begins a render pass instance that clears color and depth.
    pub fn begin_render_pass(&self, begin: &RenderPassBegin) {
        self.device.cmd_begin_render_pass(self.buffer, begin);
    }

    pub fn end_render_pass(&self) {
        self.device.cmd_end_render_pass(self.buffer);
    }

    // =========================================================================
    // State and Draws
    // =========================================================================

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, pipeline);
    }

    /// Sets viewport and scissor to cover `extent` fully.
    ///
    /// Pipelines declare both as dynamic state, so this must be recorded
    /// after binding a pipeline and before drawing.
    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        self.device.cmd_set_viewport(self.buffer, full_viewport(extent));
        self.device.cmd_set_scissor(self.buffer, full_scissor(extent));
    }

    /// Pushes a constant block at offset 0.
    pub fn push_constants<T: Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        constants: &T,
    ) {
        self.device
            .cmd_push_constants(self.buffer, layout, stages, 0, bytemuck::bytes_of(constants));
    }

    /// Binds a vertex buffer at binding 0.
    pub fn bind_vertex_buffer(&self, buffer: vk::Buffer) {
        self.device.cmd_bind_vertex_buffer(self.buffer, buffer);
    }

    /// Draws `vertex_count` vertices, one instance.
    pub fn draw(&self, vertex_count: u32) {
        self.device.cmd_draw(self.buffer, vertex_count, 1, 0, 0);
    }
}

/// A viewport covering `extent` with the standard 0..1 depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// A scissor rectangle covering `extent`.
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDevice, MockEvent, ResourceKind, extent};

    #[test]
    fn test_full_viewport_and_scissor() {
        let viewport = full_viewport(extent(1024, 768));
        assert_eq!(viewport.width, 1024.0);
        assert_eq!(viewport.height, 768.0);
        assert_eq!(viewport.max_depth, 1.0);

        let scissor = full_scissor(extent(1024, 768));
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.extent, extent(1024, 768));
    }

    #[test]
    fn test_pool_drop_releases_pool() {
        let mock = Arc::new(MockDevice::new());
        {
            let pool = CommandPool::new(mock.clone()).unwrap();
            let buffers = pool.allocate_command_buffers(2).unwrap();
            assert_eq!(buffers.len(), 2);
            assert_eq!(mock.live(ResourceKind::CommandPool), 1);
        }
        mock.assert_no_leaks();
        mock.assert_no_violations();
    }

    #[test]
    fn test_recording_helpers_forward_to_device() {
        let mock = Arc::new(MockDevice::new());
        let pool = CommandPool::new(mock.clone()).unwrap();
        let cmd = pool.allocate_command_buffers(1).unwrap().remove(0);

        cmd.reset().unwrap();
        cmd.begin().unwrap();
        cmd.set_viewport_and_scissor(extent(800, 600));
        cmd.end().unwrap();

        let events = mock.events();
        assert!(events.iter().any(|e| matches!(
            e,
            MockEvent::SetViewport(v) if v.width == 800.0 && v.height == 600.0
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            MockEvent::SetScissor(r) if r.extent == extent(800, 600)
        )));
        mock.assert_no_violations();
    }

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }
}
