//! Presentation surfaces.
//!
//! The renderer never owns a window. A [`SurfaceProvider`] hands it a native
//! surface and reports the size the swap chain should start at.

use std::ffi::{c_char, c_void};

use ash::{khr, vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::{RendererError, Result};

pub trait SurfaceProvider {
    /// # Safety
    /// `entry` and `instance` must be live, and `instance` must have been
    /// created with [`SurfaceProvider::required_extensions`] enabled.
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR>;

    fn extent(&self) -> vk::Extent2D;

    fn required_extensions(&self) -> Vec<*const c_char> {
        platform_surface_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect()
    }
}

/// Instance extensions needed to create a surface on this platform.
pub fn platform_surface_extensions() -> Vec<&'static std::ffi::CStr> {
    let mut names = vec![khr::surface::NAME];
    if cfg!(target_os = "windows") {
        names.push(khr::win32_surface::NAME);
    }
    if cfg!(target_os = "linux") {
        names.push(khr::xlib_surface::NAME);
        names.push(khr::wayland_surface::NAME);
    }
    names
}

/// Surface provider for anything exposing raw window and display handles,
/// usually a `winit::window::Window` or an `Arc` of one.
pub struct WindowSurfaceProvider<W> {
    window: W,
    extent: vk::Extent2D,
}

impl<W> WindowSurfaceProvider<W> {
    pub fn new(window: W, width: u32, height: u32) -> Self {
        Self {
            window,
            extent: vk::Extent2D { width, height },
        }
    }

    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
    }

    pub fn window(&self) -> &W {
        &self.window
    }
}

impl<W: HasWindowHandle + HasDisplayHandle> SurfaceProvider for WindowSurfaceProvider<W> {
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR> {
        NativeWindow::resolve(&self.window)?.create_surface(entry, instance)
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// The handle pair a platform surface is created from.
#[derive(Debug)]
enum NativeWindow {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    Win32 { hwnd: isize, hinstance: isize },
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Wayland {
        display: *mut c_void,
        surface: *mut c_void,
    },
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    Xlib {
        display: *mut c_void,
        window: std::ffi::c_ulong,
    },
}

impl NativeWindow {
    fn resolve<W: HasWindowHandle + HasDisplayHandle>(window: &W) -> Result<Self> {
        let window_handle = window
            .window_handle()
            .map_err(|e| unsupported(format!("window handle unavailable: {e}")))?
            .as_raw();
        let display_handle = window
            .display_handle()
            .map_err(|e| unsupported(format!("display handle unavailable: {e}")))?
            .as_raw();

        match (window_handle, display_handle) {
            (RawWindowHandle::Win32(handle), _) => Ok(Self::Win32 {
                hwnd: handle.hwnd.get(),
                hinstance: handle.hinstance.map_or(0, |h| h.get()),
            }),
            (RawWindowHandle::Wayland(handle), RawDisplayHandle::Wayland(display)) => {
                Ok(Self::Wayland {
                    display: display.display.as_ptr(),
                    surface: handle.surface.as_ptr(),
                })
            }
            (RawWindowHandle::Xlib(handle), RawDisplayHandle::Xlib(display)) => Ok(Self::Xlib {
                display: display
                    .display
                    .map_or(std::ptr::null_mut(), |d| d.as_ptr()),
                window: handle.window,
            }),
            (window, display) => Err(unsupported(format!(
                "no surface support for {window:?} on {display:?}"
            ))),
        }
    }

    #[cfg(target_os = "windows")]
    unsafe fn create_surface(self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR> {
        match self {
            Self::Win32 { hwnd, hinstance } => {
                let info = vk::Win32SurfaceCreateInfoKHR::default()
                    .hwnd(hwnd as vk::HWND)
                    .hinstance(hinstance as vk::HINSTANCE);
                khr::win32_surface::Instance::new(entry, instance)
                    .create_win32_surface(&info, None)
                    .map_err(surface_failed)
            }
            other => Err(unsupported(format!("{other:?} on Windows"))),
        }
    }

    #[cfg(target_os = "linux")]
    unsafe fn create_surface(self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR> {
        match self {
            Self::Wayland { display, surface } => {
                let info = vk::WaylandSurfaceCreateInfoKHR::default()
                    .display(display)
                    .surface(surface);
                khr::wayland_surface::Instance::new(entry, instance)
                    .create_wayland_surface(&info, None)
                    .map_err(surface_failed)
            }
            Self::Xlib { display, window } => {
                let info = vk::XlibSurfaceCreateInfoKHR::default()
                    .dpy(display.cast())
                    .window(window);
                khr::xlib_surface::Instance::new(entry, instance)
                    .create_xlib_surface(&info, None)
                    .map_err(surface_failed)
            }
            other => Err(unsupported(format!("{other:?} on Linux"))),
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    unsafe fn create_surface(
        self,
        _entry: &Entry,
        _instance: &Instance,
    ) -> Result<vk::SurfaceKHR> {
        Err(unsupported(format!("{self:?} on this platform")))
    }
}

fn unsupported(message: String) -> RendererError {
    RendererError::DeviceInitFailed(message)
}

#[cfg_attr(not(any(target_os = "windows", target_os = "linux")), allow(dead_code))]
fn surface_failed(result: vk::Result) -> RendererError {
    RendererError::DeviceInitFailed(format!("surface creation failed: {result:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_extension_is_always_required() {
        let names = platform_surface_extensions();
        assert_eq!(names[0], khr::surface::NAME);
    }

    #[test]
    fn provider_reports_latest_extent() {
        let mut provider = WindowSurfaceProvider::new((), 800, 600);
        provider.set_extent(1024, 768);
        assert_eq!(
            provider.extent,
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }
}
