//! `VkSemaphore` wrapper for GPU-GPU synchronization.

use anyhow::Result;
use ash::vk;

use crate::core::device::Device;

/// A binary `VkSemaphore`. One pair is kept per frame-in-flight slot: image-available
/// and render-finished (§4.2 steps 6-7).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Semaphore {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Semaphore,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new(device: Device) -> Result<Self> {
        let handle = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::builder().build(), None)? };
        Ok(Self { device, handle })
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}
