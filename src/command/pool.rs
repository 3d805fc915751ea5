//! Per-frame-slot `VkCommandPool` wrapper, owning one primary buffer and a growable
//! array of secondary buffers for pass-instance recording.

use anyhow::Result;
use ash::vk;

use crate::core::config::COMMAND_BUFFER_SHRINK_THRESHOLD_FRAMES;
use crate::core::device::Device;

/// A command pool for one frame-in-flight slot, plus the primary command buffer
/// recorded into every frame and a pool of secondary buffers handed out to pass
/// instances (§4.1 step 4, §4.2).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandPool {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::CommandPool,
    primary: vk::CommandBuffer,
    secondary: Vec<vk::CommandBuffer>,
    /// How many secondary buffers were actually used last frame; used to decide
    /// whether to shrink the backing array (§4.1 step 7).
    high_water_mark: usize,
    frames_below_threshold: u32,
    /// Count passed to the most recent [`CommandPool::secondary_buffers`] call, read
    /// back by the frame scheduler before resetting this slot so step 7 knows how many
    /// buffers the frame that's about to be submitted actually used.
    last_requested: usize,
}

impl CommandPool {
    pub fn new(device: Device, queue_family: u32) -> Result<Self> {
        let handle = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .queue_family_index(queue_family)
                    .build(),
                None,
            )?
        };
        let primary = unsafe {
            device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(handle)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?[0]
        };
        Ok(Self {
            device,
            handle,
            primary,
            secondary: Vec::new(),
            high_water_mark: 0,
            frames_below_threshold: 0,
            last_requested: 0,
        })
    }

    pub fn primary(&self) -> vk::CommandBuffer {
        self.primary
    }

    /// How many secondary buffers the most recent [`Self::secondary_buffers`] call
    /// asked for (§4.1 step 7).
    pub fn last_requested(&self) -> usize {
        self.last_requested
    }

    /// Borrow (allocating more if needed) `count` secondary command buffers for this
    /// frame's pass instances.
    pub fn secondary_buffers(&mut self, count: usize) -> Result<&[vk::CommandBuffer]> {
        if count > self.secondary.len() {
            let additional = count - self.secondary.len();
            let new_buffers = unsafe {
                self.device.allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::builder()
                        .command_pool(self.handle)
                        .level(vk::CommandBufferLevel::SECONDARY)
                        .command_buffer_count(additional as u32)
                        .build(),
                )?
            };
            self.secondary.extend(new_buffers);
        }
        self.high_water_mark = self.high_water_mark.max(count);
        self.last_requested = count;
        Ok(&self.secondary[..count])
    }

    pub fn reset(&mut self) -> Result<()> {
        unsafe { self.device.reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())? };
        Ok(())
    }

    /// Shrink the secondary-buffer array by half if usage has stayed below its
    /// high-water mark for long enough (§4.1 step 7).
    pub fn shrink_if_idle(&mut self, used_this_frame: usize) -> Result<()> {
        if used_this_frame * 2 < self.high_water_mark {
            self.frames_below_threshold += 1;
        } else {
            self.frames_below_threshold = 0;
            self.high_water_mark = used_this_frame;
        }

        if self.frames_below_threshold >= COMMAND_BUFFER_SHRINK_THRESHOLD_FRAMES && self.secondary.len() > used_this_frame.max(1) {
            let keep = (self.secondary.len() / 2).max(used_this_frame);
            let freed = self.secondary.split_off(keep);
            unsafe {
                self.device.free_command_buffers(self.handle, &freed);
            }
            self.high_water_mark = keep;
            self.frames_below_threshold = 0;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
    }
}
