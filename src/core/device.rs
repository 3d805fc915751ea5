//! The Vulkan logical device, the main entrypoint to most of the Vulkan API.

use std::ffi::CString;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;

use crate::core::error::CriticalErrorHook;
use crate::core::instance::VkInstance;
use crate::core::physical_device::PhysicalDevice;

#[derive(Derivative)]
#[derivative(Debug)]
struct DeviceInner {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    #[derivative(Debug = "ignore")]
    swapchain_fns: khr::Swapchain,
    #[derivative(Debug = "ignore")]
    surface_fns: khr::Surface,
    queue_family: u32,
    #[derivative(Debug = "ignore")]
    queue: vk::Queue,
}

/// Wrapper around a `VkDevice`, the required `VK_KHR_swapchain` function pointer table,
/// and the single combined graphics+transfer queue this crate requires. Internal state
/// is `Arc`-wrapped so this is cheap to clone and share with every subsystem that needs
/// Vulkan calls.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl Device {
    /// Create the logical device and retrieve the combined graphics+transfer queue.
    ///
    /// Failure is a **fatal initialization error**, reported through `hook`: once a
    /// physical device has been selected, device creation failing means the driver or
    /// environment is broken in a way the caller cannot recover from.
    pub fn new(instance: &VkInstance, physical: &PhysicalDevice, hook: &dyn CriticalErrorHook) -> Arc<Self> {
        match create_device(instance, physical) {
            Ok((handle, queue_family)) => {
                let swapchain_fns = khr::Swapchain::new(instance, &handle);
                let surface_fns = khr::Surface::new(unsafe { instance.loader() }, instance);
                let queue = unsafe { handle.get_device_queue(queue_family, 0) };
                Arc::new(Device {
                    inner: Arc::new(DeviceInner {
                        handle,
                        swapchain_fns,
                        surface_fns,
                        queue_family,
                        queue,
                    }),
                })
            }
            Err(e) => hook.report(&format!("failed to create Vulkan device: {e}")),
        }
    }

    pub fn swapchain_fns(&self) -> &khr::Swapchain {
        &self.inner.swapchain_fns
    }

    pub fn surface_fns(&self) -> &khr::Surface {
        &self.inner.surface_fns
    }

    pub fn queue_family(&self) -> u32 {
        self.inner.queue_family
    }

    /// Unsafe access to the raw `VkDevice` handle, for collaborators (the allocator in
    /// particular) that need to hand it to another API directly.
    /// # Safety
    /// The caller must not destroy the device through this handle.
    pub unsafe fn handle(&self) -> vk::Device {
        self.inner.handle.handle()
    }

    /// Unsafe access to the combined graphics+transfer queue.
    /// # Safety
    /// The caller must synchronize access: Vulkan queues are not internally synchronized.
    pub unsafe fn queue(&self) -> vk::Queue {
        self.inner.queue
    }

    /// Block the caller until the device has finished all outstanding work. Used at
    /// teardown and swap-chain recreation.
    ///
    /// Failure here is a **fatal submission error**.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.inner.handle.device_wait_idle()? };
        Ok(())
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.inner.handle
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}

fn create_device(instance: &VkInstance, physical: &PhysicalDevice) -> Result<(ash::Device, u32)> {
    let family = physical.graphics_transfer_family();
    let priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::builder().queue_family_index(family).queue_priorities(&priorities).build();

    let swapchain_ext = CString::new("VK_KHR_swapchain")?;
    let extensions_raw = [swapchain_ext.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default();

    let device_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&extensions_raw)
        .enabled_features(&features)
        .build();

    let device = unsafe { instance.create_device(physical.handle(), &device_info, None)? };
    Ok((device, family))
}
