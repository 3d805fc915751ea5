//! `VkFence` wrapper used for per-frame-slot CPU/GPU synchronization.

use std::time::Duration;

use anyhow::Result;
use ash::vk;

use crate::core::device::Device;

/// A `VkFence`. The frame scheduler waits on one per frame-in-flight slot before
/// reusing that slot's command pool (§4.1 step 3).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Fence {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Fence,
}

unsafe impl Send for Fence {}

impl Fence {
    pub fn new(device: Device, signaled: bool) -> Result<Self> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let handle = unsafe { device.create_fence(&vk::FenceCreateInfo::builder().flags(flags).build(), None)? };
        Ok(Self { device, handle })
    }

    /// Block until signaled or `timeout` elapses. Returns `Ok(false)` on timeout,
    /// never an error for that case — the caller decides whether a timeout is fatal.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        match unsafe { self.device.wait_for_fences(std::slice::from_ref(&self.handle), true, timeout.as_nanos() as u64) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(anyhow::Error::from(crate::core::error::Error::VkError(e))),
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(&self.handle))? };
        Ok(())
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}
