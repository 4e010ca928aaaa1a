//! winit window that reports its framebuffer size to the presentation layer.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use ash::vk;
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vkframe_core::{Error, Result, WindowConfig};
use vkframe_rhi::instance::Instance;
use vkframe_rhi::swapchain::ExtentSource;

use crate::surface::Surface;

/// A resizable window.
///
/// Implements [`ExtentSource`] from the size last reported through
/// [`resized`](Window::resized), so a minimized wait wakes as soon as the
/// event loop sees the window come back.
pub struct Window {
    window: Arc<WinitWindow>,
    size: SizeTracker,
    minimized_poll: Duration,
}

impl Window {
    /// Opens a window as described by `config`.
    ///
    /// `minimized_poll` bounds each [`ExtentSource::wait_events`] wait while
    /// the framebuffer is zero-sized.
    pub fn new(
        event_loop: &ActiveEventLoop,
        config: &WindowConfig,
        minimized_poll: Duration,
    ) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(
            "Window '{}' created: {}x{}",
            config.title,
            config.width,
            config.height
        );

        let size = SizeTracker::new(window.inner_size());
        Ok(Self {
            window: Arc::new(window),
            size,
            minimized_poll,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Records a size from `WindowEvent::Resized` and wakes any thread
    /// waiting in [`ExtentSource::wait_events`].
    pub fn resized(&self, size: PhysicalSize<u32>) {
        if self.size.record(size) {
            tracing::debug!("Framebuffer is now {}x{}", size.width, size.height);
        }
    }

    /// True while either framebuffer dimension is zero.
    pub fn is_minimized(&self) -> bool {
        let extent = self.framebuffer_extent();
        extent.width == 0 || extent.height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates the Vulkan surface this window presents to.
    ///
    /// `instance` must outlive the returned [`Surface`].
    pub fn create_surface(&self, instance: &Instance) -> Result<Surface> {
        Surface::create(instance, self)
    }
}

impl ExtentSource for Window {
    fn framebuffer_extent(&self) -> vk::Extent2D {
        to_extent(self.size.current())
    }

    /// Waits for the next recorded resize. When none arrives within the poll
    /// interval (the waiter is the event loop thread itself) the size is
    /// refreshed from the window directly.
    fn wait_events(&self) {
        let seen = self.size.generation();
        if !self.size.wait_for_change(seen, self.minimized_poll) {
            self.size.record(self.window.inner_size());
        }
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.window.id())
            .field("extent", &self.framebuffer_extent())
            .finish()
    }
}

/// Latest framebuffer size plus a wakeup for threads waiting on it.
struct SizeTracker {
    state: Mutex<TrackedSize>,
    changed: Condvar,
}

#[derive(Clone, Copy)]
struct TrackedSize {
    size: PhysicalSize<u32>,
    generation: u64,
}

impl SizeTracker {
    fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            state: Mutex::new(TrackedSize {
                size,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn current(&self) -> PhysicalSize<u32> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).size
    }

    /// Returns whether the size differs from the previous one.
    fn record(&self, size: PhysicalSize<u32>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.size == size {
            return false;
        }
        state.size = size;
        state.generation += 1;
        self.changed.notify_all();
        true
    }

    /// Counts recorded changes.
    fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Blocks until a size newer than `seen` is recorded or `timeout` passes.
    fn wait_for_change(&self, seen: u64, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (_state, result) = self
            .changed
            .wait_timeout_while(state, timeout, |state| state.generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

fn to_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
