//! Traits implemented by the host process for the collaborators this crate consumes
//! but does not own: the platform/windowing layer and the application's window-lifecycle
//! bookkeeping. Neither is implemented here, mirroring the way the teacher library's
//! `WindowInterface` lets any windowing crate plug in without phobos depending on one.

use std::ffi::CStr;

use ash::vk;

use crate::core::error::Error;

/// Opaque identifier for a native window, passed through from the host application.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WindowHandle(pub u64);

/// Size and identity information about a window, as queried through
/// [`ApplicationSystem::window_info`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WindowInfo {
    pub width: u32,
    pub height: u32,
    pub id: WindowHandle,
}

/// Callbacks bound to a window's lifecycle, used to (re)initialize and tear down
/// window-attached resources (surfaces, swapchains) without this crate needing to
/// know how the host schedules window close/resize events.
pub trait WindowLifecycleBinding: Send + Sync {
    fn on_init(&self, window: WindowHandle);
    fn on_shutdown(&self, window: WindowHandle);
}

/// The platform/windowing collaborator: instance-level Vulkan/loader plumbing that is
/// inherently platform-specific and therefore out of scope for this crate.
pub trait PlatformInterface {
    /// Called once before any Vulkan calls are made, to let the platform layer register
    /// its use of the Vulkan loader (e.g. reference-count a shared `libvulkan.so`).
    fn register_library_usage(&self);
    /// Mirror of [`PlatformInterface::register_library_usage`], called at teardown.
    fn unregister_library_usage(&self);
    /// Obtain `vkGetInstanceProcAddr` from the platform's loader.
    fn get_instance_proc_addr(&self) -> ash::vk::PFN_vkGetInstanceProcAddr;
    /// Instance extensions required to create a surface on this platform.
    fn required_instance_extensions(&self) -> Vec<&'static CStr>;
    /// Create a `VkSurfaceKHR` for the given window.
    fn create_surface(&self, instance: &ash::Instance, window: WindowHandle) -> Result<vk::SurfaceKHR, Error>;
    /// Destroy a previously created surface.
    fn destroy_surface(&self, instance: &ash::Instance, surface: vk::SurfaceKHR);
}

/// The application-system collaborator: window metadata and lifecycle bindings.
pub trait ApplicationSystem {
    /// Query size and identity for a window, if it still exists.
    fn window_info(&self, handle: WindowHandle) -> Option<WindowInfo>;
    /// Register a lifecycle binding for a window; `on_init`/`on_shutdown` fire when the
    /// window is (re)created or destroyed.
    fn bind_window_lifecycle(&self, handle: WindowHandle, binding: Box<dyn WindowLifecycleBinding>);
    /// Remove a previously registered lifecycle binding.
    fn unbind_window_lifecycle(&self, handle: WindowHandle);
}
