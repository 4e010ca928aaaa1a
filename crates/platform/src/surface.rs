//! Vulkan surface for a winit window.

use std::ffi::{CStr, c_char};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, info};
use vkframe_core::{Error, Result};
use vkframe_rhi::instance::Instance;

/// Owns a `vk::SurfaceKHR` and destroys it on drop.
///
/// The instance the surface was created from must outlive it, and every
/// swapchain built on it must be gone before it drops.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for anything exposing raw window and display handles.
    ///
    /// # Errors
    ///
    /// [`Error::Window`] when the handles are unavailable and
    /// [`Error::Vulkan`] when the surface cannot be created.
    pub fn create<W>(instance: &Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| Error::Window(format!("No display handle: {}", e)))?;
        let target = window
            .window_handle()
            .map_err(|e| Error::Window(format!("No window handle: {}", e)))?;

        // SAFETY: both handles come from a live window, and the surface is
        // destroyed in Drop with a loader built from the same instance.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display.as_raw(),
                target.as_raw(),
                None,
            )
        }
        .map_err(|e| Error::Vulkan(format!("Failed to create window surface: {}", e)))?;

        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        info!("Window surface created");

        Ok(Self { handle, loader })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle is live and owned exclusively by this wrapper.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Window surface destroyed");
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("handle", &self.handle).finish()
    }
}

/// Instance extensions needed to present to windows of `display`.
///
/// The returned pointers reference static strings owned by `ash-window`.
///
/// # Errors
///
/// [`Error::Vulkan`] when the platform is not supported.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Vulkan(format!("Unsupported windowing platform: {}", e)))?;

    for &name in extensions {
        // SAFETY: ash-window hands out NUL-terminated static strings.
        debug!("Surface extension: {:?}", unsafe { CStr::from_ptr(name) });
    }

    Ok(extensions.to_vec())
}
