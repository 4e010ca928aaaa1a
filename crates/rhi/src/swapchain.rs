//! Presentation surface management.
//!
//! [`PresentationSurface`] owns the swapchain for one window surface: the
//! presentable images, one color view per image, and the chosen format,
//! extent and present mode. It is rebuilt in place by
//! [`recreate`](PresentationSurface::recreate) whenever presentation reports
//! the chain as stale or the window changes size.
//!
//! The window surface handle itself is owned by the caller and outlives every
//! chain built on it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vkframe_rhi::context::DeviceContext;
//! use vkframe_rhi::swapchain::{AcquireOutcome, PresentationSurface};
//!
//! # fn example(device: Arc<dyn DeviceContext>, surface: vk::SurfaceKHR, semaphore: vk::Semaphore)
//! #     -> vkframe_rhi::RhiResult<()> {
//! let hint = vk::Extent2D { width: 1280, height: 720 };
//! let chain = PresentationSurface::create(device, surface, hint, true)?;
//!
//! match chain.acquire_next(1_000_000_000, semaphore)? {
//!     AcquireOutcome::Image { index, .. } => println!("render into image {}", index),
//!     AcquireOutcome::Stale => println!("rebuild before rendering"),
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};
use vkframe_core::DeletionQueue;

use crate::context::{DeviceContext, SwapchainDesc};
use crate::error::{RhiError, RhiResult};

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Source of the window's current framebuffer size.
///
/// Recreation asks it for the size to build at, and waits on it while the
/// window is minimized.
pub trait ExtentSource {
    /// Current framebuffer size in pixels. Zero in either dimension while minimized.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Blocks until window state may have changed.
    fn wait_events(&self) {
        std::thread::sleep(Duration::from_millis(16));
    }
}

/// Result of asking for the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready for rendering. A suboptimal image can still be
    /// rendered and presented, but the chain should be rebuilt afterwards.
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; skip the frame and rebuild.
    Stale,
}

/// Result of handing an image back to the presentation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, but the chain no longer matches the surface exactly.
    Suboptimal,
    /// Not presented because the chain is out of date.
    Stale,
}

impl PresentOutcome {
    /// Whether the chain should be rebuilt after this present.
    #[inline]
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// The presentable image chain of one window surface.
pub struct PresentationSurface {
    device: Arc<dyn DeviceContext>,
    surface: vk::SurfaceKHR,
    prefer_low_latency: bool,
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Destroys the views, then the swapchain.
    teardown: DeletionQueue,
}

impl PresentationSurface {
    /// Builds a swapchain on `surface`.
    ///
    /// Prefers `B8G8R8A8_SRGB`, then `B8G8R8A8_UNORM`, then the first
    /// reported format. Uses MAILBOX when `prefer_low_latency` is set and the
    /// surface offers it, FIFO otherwise. The extent hint is clamped to the
    /// surface limits unless the surface dictates its own extent. Requests
    /// one image more than the minimum, capped by the maximum when there is one.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] if the surface cannot be queried,
    /// supports nothing usable, or reports a zero extent, and the creation
    /// error of the swapchain or a view otherwise. Nothing is leaked on error.
    /// Use [`create_for_window`](Self::create_for_window) to wait out a
    /// minimized window instead.
    pub fn create(
        device: Arc<dyn DeviceContext>,
        surface: vk::SurfaceKHR,
        extent_hint: vk::Extent2D,
        prefer_low_latency: bool,
    ) -> RhiResult<Self> {
        let mut chain = Self::unbuilt(device, surface, prefer_low_latency);
        match chain.build(extent_hint)? {
            Build::Created => Ok(chain),
            Build::ZeroExtent(extent) => Err(RhiError::SurfaceError(format!(
                "Surface reports a zero extent ({}x{})",
                extent.width, extent.height
            ))),
        }
    }

    /// Like [`create`](Self::create), sized from `extent_source`.
    ///
    /// A zero size from either the window or the surface counts as a
    /// minimized window: this waits on `extent_source` and tries again
    /// until both report a usable size.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), except that a zero extent is never an error.
    pub fn create_for_window(
        device: Arc<dyn DeviceContext>,
        surface: vk::SurfaceKHR,
        extent_source: &dyn ExtentSource,
        prefer_low_latency: bool,
    ) -> RhiResult<Self> {
        let mut chain = Self::unbuilt(device, surface, prefer_low_latency);
        chain.build_when_visible(extent_source.framebuffer_extent(), extent_source)?;
        Ok(chain)
    }

    fn unbuilt(
        device: Arc<dyn DeviceContext>,
        surface: vk::SurfaceKHR,
        prefer_low_latency: bool,
    ) -> Self {
        Self {
            device,
            surface,
            prefer_low_latency,
            swapchain: vk::SwapchainKHR::null(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            teardown: DeletionQueue::new("presentation surface"),
        }
    }

    /// Builds once both the window and the surface report a nonzero size.
    fn build_when_visible(
        &mut self,
        extent_hint: vk::Extent2D,
        extent_source: &dyn ExtentSource,
    ) -> RhiResult<()> {
        let mut hint = extent_hint;
        loop {
            let extent = wait_for_nonzero_extent(hint, extent_source);
            match self.build(extent)? {
                Build::Created => return Ok(()),
                Build::ZeroExtent(reported) => {
                    debug!(
                        "Surface reports {}x{}, waiting for the window to be restored",
                        reported.width, reported.height
                    );
                    extent_source.wait_events();
                    hint = extent_source.framebuffer_extent();
                }
            }
        }
    }

    /// Creates nothing when the chosen extent has a zero dimension.
    fn build(&mut self, extent_hint: vk::Extent2D) -> RhiResult<Build> {
        let support = self
            .device
            .surface_support(self.surface)
            .map_err(|e| RhiError::SurfaceError(format!("Failed to query surface: {}", e)))?;

        if !support.is_adequate() {
            return Err(RhiError::SurfaceError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, self.prefer_low_latency);
        let extent = choose_extent(&support.capabilities, extent_hint);
        let image_count = determine_image_count(&support.capabilities);

        if extent.width == 0 || extent.height == 0 {
            return Ok(Build::ZeroExtent(extent));
        }

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        // Rolls back everything built so far if a later step fails.
        let mut guard = DeletionQueue::new("presentation surface build");

        let swapchain = self.device.create_swapchain(&SwapchainDesc {
            surface: self.surface,
            min_image_count: image_count,
            surface_format,
            extent,
            present_mode,
            pre_transform: support.capabilities.current_transform,
        })?;
        let device = Arc::clone(&self.device);
        guard.push_action(move || device.destroy_swapchain(swapchain));

        let images = self.device.swapchain_images(swapchain)?;
        let mut image_views = Vec::with_capacity(images.len());
        for (i, &image) in images.iter().enumerate() {
            let view = self
                .device
                .create_image_view(image, surface_format.format, vk::ImageAspectFlags::COLOR)
                .map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {}: {}", i, e))
                })?;
            let device = Arc::clone(&self.device);
            guard.push_action(move || device.destroy_image_view(view));
            image_views.push(view);
        }

        info!("Swapchain created with {} images", image_views.len());

        self.teardown = guard;
        self.swapchain = swapchain;
        self.image_views = image_views;
        self.format = surface_format;
        self.extent = extent;
        self.present_mode = present_mode;
        Ok(Build::Created)
    }

    /// Requests the next image, signaling `signal_semaphore` when it is ready.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] when no image became available in time,
    /// [`RhiError::AcquireFailed`] for any other failure, and
    /// [`RhiError::InvalidHandle`] when the chain has been destroyed.
    pub fn acquire_next(
        &self,
        timeout_ns: u64,
        signal_semaphore: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome> {
        self.ensure_valid("acquire")?;
        classify_acquire(
            self.device
                .acquire_next_image(self.swapchain, timeout_ns, signal_semaphore),
            timeout_ns,
        )
    }

    /// Queues image `image_index` for display once `wait_semaphore` signals.
    ///
    /// # Errors
    ///
    /// [`RhiError::PresentFailed`] for any failure other than staleness, and
    /// [`RhiError::InvalidHandle`] for a destroyed chain or an index out of range.
    pub fn present(
        &self,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> RhiResult<PresentOutcome> {
        self.ensure_valid("present")?;
        if image_index as usize >= self.image_views.len() {
            return Err(RhiError::InvalidHandle(format!(
                "Image index {} out of range for {} images",
                image_index,
                self.image_views.len()
            )));
        }
        classify_present(
            self.device
                .queue_present(self.swapchain, image_index, wait_semaphore),
        )
    }

    /// Releases the image views and the swapchain. The window surface stays.
    ///
    /// Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if !self.is_valid() {
            return;
        }
        self.teardown.flush();
        self.swapchain = vk::SwapchainKHR::null();
        self.image_views.clear();
        info!(
            "Swapchain destroyed (was {}x{})",
            self.extent.width, self.extent.height
        );
    }

    /// Destroys the chain and builds a new one on the same surface.
    ///
    /// While the requested extent or the one the surface reports has a zero
    /// dimension (a minimized window) this waits on `extent_source` and polls
    /// it until both are nonzero. The image count may differ from the
    /// previous chain.
    ///
    /// The caller must make sure no submitted work still uses the old images.
    pub fn recreate(
        &mut self,
        extent_hint: vk::Extent2D,
        extent_source: &dyn ExtentSource,
    ) -> RhiResult<()> {
        let previous = self.extent;

        self.destroy();
        self.build_when_visible(extent_hint, extent_source)?;

        info!(
            "Swapchain recreated: {}x{} -> {}x{}",
            previous.width, previous.height, self.extent.width, self.extent.height
        );
        Ok(())
    }

    fn ensure_valid(&self, operation: &str) -> RhiResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(RhiError::InvalidHandle(format!(
                "Cannot {} on a destroyed swapchain",
                operation
            )))
        }
    }

    /// Whether a swapchain currently exists.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Color views, one per presentable image, in image-index order.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.image_views.len() as u32
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.destroy();
    }
}

enum Build {
    Created,
    /// The surface or the window has no area; nothing was created.
    ZeroExtent(vk::Extent2D),
}

/// Polls `source` until it reports a usable size, starting from `hint`.
pub fn wait_for_nonzero_extent(hint: vk::Extent2D, source: &dyn ExtentSource) -> vk::Extent2D {
    let mut extent = hint;
    if extent.width == 0 || extent.height == 0 {
        debug!("Framebuffer is zero-sized, waiting for the window to be restored");
    }
    while extent.width == 0 || extent.height == 0 {
        source.wait_events();
        extent = source.framebuffer_extent();
    }
    extent
}

fn classify_acquire(
    result: Result<(u32, bool), vk::Result>,
    timeout_ns: u64,
) -> RhiResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(RhiError::Timeout(format!(
            "No swapchain image available within {} ns",
            timeout_ns
        ))),
        Err(e) => Err(RhiError::AcquireFailed(e)),
    }
}

fn classify_present(result: Result<bool, vk::Result>) -> RhiResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(RhiError::PresentFailed(e)),
    }
}

/// Chooses the best surface format from the available formats.
///
/// Prefers B8G8R8A8_SRGB with SRGB_NONLINEAR color space.
/// Falls back to the first available format if the preferred format is not available.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected preferred surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return format;
    }

    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = alternative {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    // Callers check is_adequate() first, so the list is non-empty here.
    let first = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// Chooses MAILBOX (low latency, no tearing) when preferred and offered,
/// otherwise FIFO, which every surface supports.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_low_latency: bool,
) -> vk::PresentModeKHR {
    if prefer_low_latency && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode (low latency)");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode (vsync)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, hint: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: hint.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: hint.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        hint.width,
        hint.height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// One more than the minimum, capped by the maximum when the surface has one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDevice, MockEvent, ResourceKind, ScriptedExtent, extent};

    fn surface() -> vk::SurfaceKHR {
        use ash::vk::Handle;
        vk::SurfaceKHR::from_raw(0xABCD)
    }

    fn create_chain(mock: &Arc<MockDevice>, hint: vk::Extent2D) -> PresentationSurface {
        PresentationSurface::create(mock.clone(), surface(), hint, true).unwrap()
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);

        let vsync_only = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&vsync_only, true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };

        assert_eq!(
            choose_extent(&capabilities, extent(800, 600)),
            extent(1920, 1080)
        );
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        };

        assert_eq!(
            choose_extent(&capabilities, extent(3000, 3000)),
            extent(2000, 2000)
        );
        assert_eq!(
            choose_extent(&capabilities, extent(50, 50)),
            extent(100, 100)
        );
        assert_eq!(
            choose_extent(&capabilities, extent(800, 600)),
            extent(800, 600)
        );
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 3);

        let tight = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&tight), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate.clone()
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((1, false)), 10).unwrap(),
            AcquireOutcome::Image {
                index: 1,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), 10).unwrap(),
            AcquireOutcome::Stale
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::TIMEOUT), 10),
            Err(RhiError::Timeout(_))
        ));
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST), 10),
            Err(RhiError::AcquireFailed(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(RhiError::PresentFailed(_))
        ));
        assert!(PresentOutcome::Stale.needs_rebuild());
        assert!(!PresentOutcome::Presented.needs_rebuild());
    }

    #[test]
    fn test_create_builds_one_view_per_image() {
        let mock = Arc::new(MockDevice::new());
        mock.set_image_count_range(2, 0);

        let chain = create_chain(&mock, extent(800, 600));
        assert_eq!(chain.image_count(), 3);
        assert_eq!(chain.image_views().len(), 3);
        assert_eq!(chain.extent(), extent(800, 600));
        assert_eq!(chain.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(mock.live(ResourceKind::ImageView), 3);
    }

    #[test]
    fn test_destroy_releases_views_then_swapchain() {
        let mock = Arc::new(MockDevice::new());
        let mut chain = create_chain(&mock, extent(800, 600));
        mock.clear_events();

        chain.destroy();
        chain.destroy();

        let destroyed: Vec<ResourceKind> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            destroyed,
            vec![
                ResourceKind::ImageView,
                ResourceKind::ImageView,
                ResourceKind::Swapchain
            ]
        );
        assert!(!chain.is_valid());
        mock.assert_no_leaks();
        mock.assert_no_violations();
    }

    #[test]
    fn test_failed_view_creation_rolls_back() {
        let mock = Arc::new(MockDevice::new());
        mock.fail_create(
            ResourceKind::ImageView,
            1,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        );

        let result = PresentationSurface::create(mock.clone(), surface(), extent(640, 480), true);
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
        assert_eq!(mock.live_total(), 0);
        mock.assert_no_violations();
    }

    #[test]
    fn test_recreate_waits_for_nonzero_extent() {
        let mock = Arc::new(MockDevice::new());
        let mut chain = create_chain(&mock, extent(800, 600));

        let window = ScriptedExtent::new(extent(800, 600));
        window.push(0, 0);
        window.push(0, 0);

        chain.recreate(extent(0, 0), &window).unwrap();

        assert_eq!(chain.extent(), extent(800, 600));
        assert_eq!(window.polls(), 3);
        assert_eq!(window.waits(), 3);
        mock.assert_no_violations();
    }

    #[test]
    fn test_recreate_uses_new_extent_and_releases_old_chain() {
        let mock = Arc::new(MockDevice::new());
        let mut chain = create_chain(&mock, extent(800, 600));
        let window = ScriptedExtent::new(extent(1024, 768));

        chain.recreate(extent(1024, 768), &window).unwrap();

        assert_eq!(chain.extent(), extent(1024, 768));
        assert_eq!(window.polls(), 0);
        assert_eq!(mock.live(ResourceKind::Swapchain), 1);
        assert_eq!(mock.created(ResourceKind::Swapchain), 2);
        mock.assert_no_violations();
    }

    #[test]
    fn test_create_rejects_zero_surface_extent() {
        let mock = Arc::new(MockDevice::new());
        mock.set_current_extent(extent(0, 0));

        let result = PresentationSurface::create(mock.clone(), surface(), extent(800, 600), true);
        assert!(matches!(result, Err(RhiError::SurfaceError(_))));
        assert_eq!(mock.live_total(), 0);
    }

    #[test]
    fn test_create_for_window_waits_out_zero_surface_extent() {
        let mock = Arc::new(MockDevice::new());
        mock.push_current_extent(extent(0, 0));
        mock.push_current_extent(extent(0, 0));
        let window = ScriptedExtent::new(extent(800, 600));

        let chain =
            PresentationSurface::create_for_window(mock.clone(), surface(), &window, true).unwrap();

        assert_eq!(chain.extent(), extent(800, 600));
        assert_eq!(window.waits(), 2);
        assert_eq!(window.polls(), 3);
        assert_eq!(mock.created(ResourceKind::Swapchain), 1);
        mock.assert_no_violations();
    }

    #[test]
    fn test_recreate_retries_while_surface_is_zero_sized() {
        let mock = Arc::new(MockDevice::new());
        let mut chain = create_chain(&mock, extent(800, 600));
        let window = ScriptedExtent::new(extent(1024, 768));

        // The surface goes to zero first, then the window.
        mock.push_current_extent(extent(0, 0));
        window.push(0, 0);

        chain.recreate(extent(1024, 768), &window).unwrap();

        assert_eq!(chain.extent(), extent(1024, 768));
        assert_eq!(window.waits(), 2);
        assert_eq!(mock.live(ResourceKind::Swapchain), 1);
        mock.assert_no_violations();
    }

    #[test]
    fn test_surface_extent_overrides_hint() {
        let mock = Arc::new(MockDevice::new());
        mock.set_current_extent(extent(1280, 720));

        let chain = create_chain(&mock, extent(800, 600));

        assert_eq!(chain.extent(), extent(1280, 720));
        assert_eq!(
            mock.count_events(|e| matches!(
                e,
                MockEvent::CreateSwapchain { extent: created, .. } if *created == extent(1280, 720)
            )),
            1
        );
    }

    #[test]
    fn test_format_falls_back_when_srgb_is_missing() {
        let mock = Arc::new(MockDevice::new());
        mock.set_surface_formats(vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ]);
        let unorm = create_chain(&mock, extent(800, 600));
        assert_eq!(unorm.format(), vk::Format::B8G8R8A8_UNORM);
        drop(unorm);

        mock.set_surface_formats(vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }]);
        let first = create_chain(&mock, extent(800, 600));
        assert_eq!(first.format(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(
            mock.count_events(|e| matches!(
                e,
                MockEvent::CreateSwapchain { format: vk::Format::R8G8B8A8_UNORM, .. }
            )),
            1
        );
    }

    #[test]
    fn test_no_formats_is_a_surface_error() {
        let mock = Arc::new(MockDevice::new());
        mock.set_surface_formats(Vec::new());

        let result = PresentationSurface::create(mock.clone(), surface(), extent(800, 600), true);
        assert!(matches!(result, Err(RhiError::SurfaceError(_))));
        assert_eq!(mock.live_total(), 0);
    }

    #[test]
    fn test_low_latency_falls_back_to_fifo() {
        let mock = Arc::new(MockDevice::new());
        mock.set_present_modes(vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
        ]);

        let chain = create_chain(&mock, extent(800, 600));

        assert_eq!(chain.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(
            mock.count_events(|e| matches!(
                e,
                MockEvent::CreateSwapchain { present_mode: vk::PresentModeKHR::FIFO, .. }
            )),
            1
        );
    }

    #[test]
    fn test_acquire_and_present_report_staleness() {
        let mock = Arc::new(MockDevice::new());
        let chain = create_chain(&mock, extent(800, 600));
        let semaphore = mock.create_semaphore().unwrap();

        mock.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            chain.acquire_next(1_000, semaphore).unwrap(),
            AcquireOutcome::Stale
        );

        let AcquireOutcome::Image { index, suboptimal } =
            chain.acquire_next(1_000, semaphore).unwrap()
        else {
            panic!("expected an image");
        };
        assert!(!suboptimal);

        mock.push_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            chain.present(semaphore, index).unwrap(),
            PresentOutcome::Stale
        );
        assert!(matches!(
            chain.present(semaphore, 99),
            Err(RhiError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_operations_on_destroyed_chain_fail() {
        let mock = Arc::new(MockDevice::new());
        let mut chain = create_chain(&mock, extent(800, 600));
        chain.destroy();

        assert!(matches!(
            chain.acquire_next(1_000, vk::Semaphore::null()),
            Err(RhiError::InvalidHandle(_))
        ));
    }
}
