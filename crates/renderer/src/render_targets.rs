//! Depth buffer, render pass and framebuffers for the presentable images.
//!
//! A [`RenderTargetSet`] is everything the forward pass renders into. It is
//! derived from the presentation surface's format, extent and image views,
//! so it is rebuilt every time the surface is.
//!
//! # Resource Destruction
//!
//! Resources are destroyed dependents first:
//! 1. Framebuffers
//! 2. Render pass
//! 3. Depth image view
//! 4. Depth image and its memory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::context::DeviceContext;
//! use vkframe_rhi::swapchain::PresentationSurface;
//! use vkframe_renderer::render_targets::RenderTargetSet;
//!
//! # fn example(device: Arc<dyn DeviceContext>, surface: &PresentationSurface) -> vkframe_rhi::RhiResult<()> {
//! let targets = RenderTargetSet::create(
//!     device,
//!     surface.format(),
//!     surface.extent(),
//!     surface.image_views(),
//! )?;
//! assert_eq!(targets.framebuffer_count(), surface.image_views().len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use vkframe_core::DeletionQueue;
use vkframe_rhi::context::{DeviceContext, ImageDesc};
use vkframe_rhi::{RhiError, RhiResult};

/// Depth attachment format (32-bit floating point).
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// The attachments one frame renders into.
pub struct RenderTargetSet {
    color_format: vk::Format,
    extent: vk::Extent2D,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    render_pass: vk::RenderPass,
    /// One per presentable image, in image-index order.
    framebuffers: Vec<vk::Framebuffer>,
    teardown: DeletionQueue,
}

impl RenderTargetSet {
    /// Builds the depth buffer, the render pass and one framebuffer per color view.
    ///
    /// The render pass clears and stores both attachments; the color
    /// attachment ends in `PRESENT_SRC_KHR`. Every framebuffer pairs its color
    /// view with the single shared depth view.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::RenderTargetError`] if `image_views` is empty, the
    /// extent is zero-sized, or any creation fails. Whatever was created
    /// before the failure is destroyed again.
    pub fn create(
        device: Arc<dyn DeviceContext>,
        color_format: vk::Format,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> RhiResult<Self> {
        if image_views.is_empty() {
            return Err(RhiError::RenderTargetError(
                "No color image views to build framebuffers for".to_string(),
            ));
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::RenderTargetError(format!(
                "Render target extent must be nonzero, got {}x{}",
                extent.width, extent.height
            )));
        }

        // Becomes the teardown queue on success, rolls back on early return.
        let mut teardown = DeletionQueue::new("render targets");

        let depth_image = device
            .create_image(&ImageDesc {
                extent,
                format: DEPTH_FORMAT,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            })
            .map_err(|e| target_error("depth image", e))?;
        let d = Arc::clone(&device);
        teardown.push_action(move || d.destroy_image(depth_image));

        let depth_view = device
            .create_image_view(depth_image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)
            .map_err(|e| target_error("depth image view", e))?;
        let d = Arc::clone(&device);
        teardown.push_action(move || d.destroy_image_view(depth_view));

        let render_pass = create_forward_render_pass(device.as_ref(), color_format)
            .map_err(|e| target_error("render pass", e))?;
        let d = Arc::clone(&device);
        teardown.push_action(move || d.destroy_render_pass(render_pass));

        let mut framebuffers = Vec::with_capacity(image_views.len());
        for (i, &color_view) in image_views.iter().enumerate() {
            let framebuffer = device
                .create_framebuffer(render_pass, &[color_view, depth_view], extent)
                .map_err(|e| target_error(&format!("framebuffer {}", i), e))?;
            let d = Arc::clone(&device);
            teardown.push_action(move || d.destroy_framebuffer(framebuffer));
            framebuffers.push(framebuffer);
        }

        info!(
            "Render targets created: {}x{}, color {:?}, depth {:?}, {} framebuffers",
            extent.width,
            extent.height,
            color_format,
            DEPTH_FORMAT,
            framebuffers.len()
        );

        Ok(Self {
            color_format,
            extent,
            depth_image,
            depth_view,
            render_pass,
            framebuffers,
            teardown,
        })
    }

    /// Render pass shared by every framebuffer and every pipeline built for this set.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffer for presentable image `image_index`.
    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    #[inline]
    pub fn depth_image(&self) -> vk::Image {
        self.depth_image
    }

    #[inline]
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth_view
    }

    /// Whether the set still owns its objects.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.render_pass != vk::RenderPass::null()
    }

    /// Destroys framebuffers, render pass, depth view and depth image.
    ///
    /// The caller must make sure the GPU no longer uses them. Calling it
    /// again is a no-op.
    pub fn destroy(&mut self) {
        if !self.is_valid() {
            return;
        }
        self.teardown.flush();
        self.framebuffers.clear();
        self.render_pass = vk::RenderPass::null();
        self.depth_view = vk::ImageView::null();
        self.depth_image = vk::Image::null();
        debug!(
            "Render targets destroyed (was {}x{})",
            self.extent.width, self.extent.height
        );
    }
}

impl Drop for RenderTargetSet {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RenderTargetSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTargetSet")
            .field("extent", &self.extent)
            .field("color_format", &self.color_format)
            .field("framebuffers", &self.framebuffers.len())
            .finish_non_exhaustive()
    }
}

fn target_error(what: &str, err: RhiError) -> RhiError {
    RhiError::RenderTargetError(format!("Failed to create {}: {}", what, err))
}

/// One subpass writing a presentable color attachment and a depth attachment.
fn create_forward_render_pass(
    device: &dyn DeviceContext,
    color_format: vk::Format,
) -> RhiResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)];

    // The color write waits for the acquire semaphore (color output stage),
    // the depth clear for the previous frame's depth writes.
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .dst_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    device.create_render_pass(&info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use vkframe_rhi::testing::{MockDevice, MockEvent, ResourceKind, extent};

    fn color_views(mock: &Arc<MockDevice>, count: usize) -> Vec<vk::ImageView> {
        (0..count)
            .map(|_| {
                mock.create_image_view(
                    vk::Image::null(),
                    vk::Format::B8G8R8A8_SRGB,
                    vk::ImageAspectFlags::COLOR,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_one_framebuffer_per_view() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 3);

        let targets = RenderTargetSet::create(
            mock.clone(),
            vk::Format::B8G8R8A8_SRGB,
            extent(800, 600),
            &views,
        )
        .unwrap();

        assert_eq!(targets.framebuffer_count(), 3);
        assert!(targets.framebuffer(2).is_some());
        assert!(targets.framebuffer(3).is_none());
        assert_eq!(targets.extent(), extent(800, 600));
        assert_eq!(mock.live(ResourceKind::Framebuffer), 3);
        assert_eq!(mock.live(ResourceKind::RenderPass), 1);
        assert_eq!(mock.live(ResourceKind::Image), 1);
        mock.assert_no_violations();
    }

    #[test]
    fn test_destroy_order_is_dependents_first() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 2);
        let mut targets =
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(64, 64), &views)
                .unwrap();
        mock.clear_events();

        targets.destroy();

        let kinds: Vec<ResourceKind> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Framebuffer,
                ResourceKind::Framebuffer,
                ResourceKind::RenderPass,
                ResourceKind::ImageView,
                ResourceKind::Image,
            ]
        );
        assert!(!targets.is_valid());

        // Second call does nothing
        targets.destroy();
        mock.assert_no_violations();
    }

    #[test]
    fn test_framebuffer_failure_rolls_back() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 3);
        mock.fail_create(
            ResourceKind::Framebuffer,
            1,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        );

        let result =
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(64, 64), &views);

        assert!(matches!(result, Err(RhiError::RenderTargetError(msg)) if msg.contains("framebuffer 1")));
        assert_eq!(mock.live(ResourceKind::Framebuffer), 0);
        assert_eq!(mock.live(ResourceKind::RenderPass), 0);
        assert_eq!(mock.live(ResourceKind::Image), 0);
        // Only the caller's color views remain
        assert_eq!(mock.live(ResourceKind::ImageView), 3);
        mock.assert_no_violations();
    }

    #[test]
    fn test_depth_image_failure() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 2);
        mock.fail_create(ResourceKind::Image, 0, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let result =
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(64, 64), &views);

        assert!(matches!(result, Err(RhiError::RenderTargetError(msg)) if msg.contains("depth image")));
        assert_eq!(mock.created(ResourceKind::RenderPass), 0);
    }

    #[test]
    fn test_rejects_empty_views_and_zero_extent() {
        let mock = Arc::new(MockDevice::new());
        assert!(matches!(
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(64, 64), &[]),
            Err(RhiError::RenderTargetError(_))
        ));

        let views = color_views(&mock, 1);
        assert!(matches!(
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(0, 64), &views),
            Err(RhiError::RenderTargetError(_))
        ));
        assert_eq!(mock.created(ResourceKind::Image), 0);
    }

    #[test]
    fn test_framebuffers_share_depth_view() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 2);
        let targets =
            RenderTargetSet::create(mock.clone(), vk::Format::B8G8R8A8_SRGB, extent(64, 64), &views)
                .unwrap();

        assert!(mock.is_live(targets.depth_view().as_raw()));
        assert_ne!(targets.framebuffer(0), targets.framebuffer(1));
    }

    #[test]
    fn test_destroyed_set_releases_the_device() {
        let mock = Arc::new(MockDevice::new());
        let views = color_views(&mock, 2);
        let mut targets = RenderTargetSet::create(
            mock.clone(),
            vk::Format::B8G8R8A8_SRGB,
            extent(640, 480),
            &views,
        )
        .unwrap();
        assert!(Arc::strong_count(&mock) > 1);

        targets.destroy();

        // Only the teardown actions held the device
        assert_eq!(Arc::strong_count(&mock), 1);
        assert!(!targets.is_valid());
    }
}
