//! The device context seam.
//!
//! Everything above this crate talks to the GPU through [`DeviceContext`]. The
//! production implementation is [`Device`](crate::device::Device), which wraps
//! an `ash` logical device, one graphics/present queue and a `gpu-allocator`
//! allocator. Tests substitute a recording double (see the `testing` module,
//! behind the `test-utils` feature).
//!
//! Handles crossing this boundary are plain `ash::vk` handles. Objects are
//! created and destroyed through explicit calls; ownership lives in the
//! components that hold the handles, not in the context.

use ash::vk;

use crate::buffer::BufferUsage;
use crate::error::RhiResult;
use crate::swapchain::SwapchainSupportDetails;

/// Parameters for creating a presentable image chain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// A single-sample 2D image backed by device-local memory.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Begin parameters for a render pass instance with one color and one depth attachment.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

/// One command buffer submission to the context's queue.
#[derive(Clone, Copy, Debug)]
pub struct SubmitDesc {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Device, queue and allocator operations the frame core depends on.
///
/// Destroy calls take the handle by value and cannot fail. Passing a handle
/// that was already destroyed is a caller bug.
pub trait DeviceContext: Send + Sync {
    /// Queue family of the single graphics and present queue.
    fn queue_family_index(&self) -> u32;

    /// Blocks until all submitted work has finished.
    fn wait_idle(&self) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Presentation
    // ---------------------------------------------------------------------

    /// Queries capabilities, formats and present modes of a window surface.
    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<vk::SwapchainKHR>;

    /// Images owned by the swapchain, in presentation-engine index order.
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Raw acquire. `Ok((index, suboptimal))`; out-of-date and timeouts come back as `Err`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        signal_semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Raw present on the context's queue. `Ok(true)` means suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    // ---------------------------------------------------------------------
    // Images and buffers
    // ---------------------------------------------------------------------

    /// Creates an image and binds freshly allocated device-local memory to it.
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;

    /// Destroys an image created by [`create_image`](Self::create_image) and frees its memory.
    fn destroy_image(&self, image: vk::Image);

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView>;

    fn destroy_image_view(&self, view: vk::ImageView);

    /// Creates a host-visible buffer holding a copy of `data`.
    fn create_buffer(&self, usage: BufferUsage, data: &[u8]) -> RhiResult<vk::Buffer>;

    /// Destroys a buffer created by [`create_buffer`](Self::create_buffer) and frees its memory.
    fn destroy_buffer(&self, buffer: vk::Buffer);

    // ---------------------------------------------------------------------
    // Render passes and framebuffers
    // ---------------------------------------------------------------------

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass>;

    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ---------------------------------------------------------------------
    // Shaders and pipelines
    // ---------------------------------------------------------------------

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;

    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_pipeline_layout(
        &self,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ---------------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------------

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    fn destroy_fence(&self, fence: vk::Fence);

    /// Waits for all `fences`. An expired deadline is reported as [`RhiError::Timeout`](crate::RhiError::Timeout).
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()>;

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Command recording and submission
    // ---------------------------------------------------------------------

    /// Creates a resettable command pool for the context's queue family.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;

    /// Destroys the pool and frees every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Begins one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    /// Binds `buffer` at vertex binding 0, offset 0.
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn queue_submit(&self, submit: &SubmitDesc) -> RhiResult<()>;
}
