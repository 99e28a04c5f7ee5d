// Surface - the connection between a native window and Vulkan
//
// Turns raw-window-handle 0.6 handles into a VkSurfaceKHR for
// Win32, Xlib, Xcb and Wayland. Window creation itself stays outside.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, c_void};
use std::sync::Arc;

use super::VulkanDevice;

/// Instance extensions needed to create a surface on this display.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };

    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Create a platform surface from raw handles.
///
/// # Safety
/// The handles must refer to a live window/display that outlives the surface.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
            let hwnd = handle.hwnd.get() as *const c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib display handle carries no display pointer")?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr() as *mut _)
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .context("Xcb display handle carries no connection")?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr() as *mut _)
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut _)
                .surface(handle.surface.as_ptr() as *mut _);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)?
        }
        (display, window) => {
            anyhow::bail!("Unsupported window/display pair: {:?} / {:?}", window, display)
        }
    };

    Ok(surface)
}

/// Owned surface; destroyed before the device (and its instance) goes away.
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
    device: Arc<VulkanDevice>,
}

impl Surface {
    pub fn new(
        device: Arc<VulkanDevice>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let loader = khr::Surface::new(&device.entry, &device.instance);
        let handle = unsafe { create_surface(&device.entry, &device.instance, display, window) }
            .context("Failed to create window surface")?;

        Ok(Self { handle, loader, device })
    }

    /// Whether `queue_family` on the selected GPU can present to this surface
    pub fn supports_present(&self, queue_family: u32) -> Result<bool> {
        let supported = unsafe {
            self.loader.get_physical_device_surface_support(
                self.device.physical_device,
                queue_family,
                self.handle,
            )
        }?;
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WebDisplayHandle, XlibDisplayHandle};
    use std::ffi::CStr;
    use std::ptr::NonNull;

    fn names(extensions: &[*const c_char]) -> Vec<String> {
        extensions
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn xlib_needs_surface_and_xlib_surface() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let extensions = names(&required_extensions(display).unwrap());
        assert_eq!(extensions, ["VK_KHR_surface", "VK_KHR_xlib_surface"]);
    }

    #[test]
    fn wayland_needs_wayland_surface() {
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(NonNull::dangling()));
        let extensions = names(&required_extensions(display).unwrap());
        assert_eq!(extensions[1], "VK_KHR_wayland_surface");
    }

    #[test]
    fn web_display_is_rejected() {
        let display = RawDisplayHandle::Web(WebDisplayHandle::new());
        assert!(required_extensions(display).is_err());
    }
}
