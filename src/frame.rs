//! Frame-in-flight scheduling (§4.1): `next_frame` acquires this tick's swap-chain
//! images, submits the previous tick's recorded work, and rotates the per-slot
//! command pool, fence, and destruction queue into position for the caller's
//! record-time calls between now and the next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::command::pool::CommandPool;
use crate::compiler::PipelineCompilerWorker;
use crate::core::collaborators::ApplicationSystem;
use crate::core::config::{FENCE_WAIT_TIMEOUT, FRAMES_IN_FLIGHT, IMAGE_ACQUIRE_TIMEOUT};
use crate::core::device::Device;
use crate::core::error::Error;
use crate::core::instance::VkInstance;
use crate::core::physical_device::PhysicalDevice;
use crate::descriptor::pool::DescriptorSetPoolAllocator;
use crate::frame_allocator::FrameLifetimeAllocator;
use crate::resource::registry::Registry;
use crate::schedule::ScheduleState;
use crate::submission::{AcquiredSurface, SubmissionPipeline};
use crate::sync::fence::Fence;
use crate::sync::semaphore::Semaphore;
use crate::wsi::surface::Surface;
use crate::wsi::swapchain;

/// Everything owned per frame-in-flight slot: a command pool, the fence the caller
/// waits on before reusing it, the semaphore signaled when its submission finishes,
/// and the schedule that record-time calls accumulate into until this slot's turn to
/// be recorded and submitted.
struct FrameSlot {
    command_pool: Mutex<CommandPool>,
    fence: Fence,
    render_finished: Semaphore,
    schedule: ScheduleState,
}

/// A frame acquired and handed to the caller in a previous [`FrameScheduler::next_frame`]
/// call, not yet recorded and submitted. Resolved at the start of the *next* call
/// (§4.1 step 2).
struct PendingSubmission {
    slot: usize,
    acquired: Vec<AcquiredSurface>,
}

/// Drives `next_frame`, the engine's top-level per-tick operation.
pub struct FrameScheduler {
    submission: SubmissionPipeline,
    slots: Vec<FrameSlot>,
    current: Mutex<usize>,
    pending: Mutex<Option<PendingSubmission>>,
    frame_counter: AtomicU64,
    frame_started: AtomicBool,
    frame_allocators: Mutex<Vec<Arc<FrameLifetimeAllocator>>>,
}

impl FrameScheduler {
    pub fn new(device: Device) -> Result<Self> {
        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|_| {
                Ok(FrameSlot {
                    command_pool: Mutex::new(CommandPool::new(device.clone(), device.queue_family())?),
                    fence: Fence::new(device.clone(), true)?,
                    render_finished: Semaphore::new(device.clone())?,
                    schedule: ScheduleState::new(FRAMES_IN_FLIGHT as u32),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            submission: SubmissionPipeline::new(device),
            slots,
            current: Mutex::new(0),
            pending: Mutex::new(None),
            frame_counter: AtomicU64::new(0),
            frame_started: AtomicBool::new(false),
            frame_allocators: Mutex::new(Vec::new()),
        })
    }

    /// Register a frame-lifetime allocator to be retired every tick (§4.1 step 6).
    /// Creation and destruction of the allocator itself are scheduled like any other
    /// resource (§4.5); this list only drives its periodic page retirement.
    pub fn register_frame_allocator(&self, allocator: Arc<FrameLifetimeAllocator>) {
        self.frame_allocators.lock().push(allocator);
    }

    /// The schedule slot record-time calls should currently push work into: the slot
    /// that will next be recorded and submitted, one tick from now.
    pub fn current_schedule(&self) -> &ScheduleState {
        &self.slots[*self.current.lock()].schedule
    }

    pub fn current_slot_index(&self) -> usize {
        *self.current.lock()
    }

    /// Monotonic tick counter, incremented once per successful `next_frame`. Shared
    /// with any frame-lifetime allocator not registered through
    /// [`FrameScheduler::register_frame_allocator`], so its own `retire` calls age
    /// pages against the same clock as the registered ones do.
    pub fn frame_number(&self) -> u64 {
        self.frame_counter.load(Ordering::Acquire)
    }

    /// The schedule of the slot most recently acquired by `next_frame`, i.e. the one
    /// `current_schedule` pointed at during that call before `current` advanced past
    /// it. Used by the backend to pick up frame-buffer-creation requests that
    /// `acquire_images` just queued for a newly (re)created swap-chain, ahead of that
    /// slot's eventual submission (§4.2 step 3b).
    pub fn last_acquired_schedule(&self) -> &ScheduleState {
        let current = *self.current.lock();
        &self.slots[(current + self.slots.len() - 1) % self.slots.len()].schedule
    }

    /// Borrow a secondary command buffer from the current slot's pool for recording a
    /// pass instance's commands, growing the pool if necessary.
    pub fn borrow_secondary_buffers(&self, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        let slot = &self.slots[*self.current.lock()];
        Ok(slot.command_pool.lock().secondary_buffers(count)?.to_vec())
    }

    /// Run one tick of the frame scheduler (§4.1). Returns `false` when the caller
    /// must skip this frame (recoverable acquire failure or fence timeout); any other
    /// failure is fatal and surfaces as `Err`.
    #[allow(clippy::too_many_arguments)]
    pub fn next_frame(
        &self,
        instance: &VkInstance,
        physical: &PhysicalDevice,
        device: &Device,
        registry: &Registry,
        compiler: &PipelineCompilerWorker,
        descriptor_alloc: &DescriptorSetPoolAllocator,
        surfaces: &[Arc<Surface>],
        app_system: Option<&dyn ApplicationSystem>,
    ) -> Result<bool> {
        let slot_index = *self.current.lock();

        let Some(acquired) = self.acquire_images(instance, physical, device, surfaces, slot_index, app_system)? else {
            return Ok(false);
        };

        if self.frame_started.load(Ordering::Acquire) {
            if let Some(pending) = self.pending.lock().take() {
                let prev_slot = &self.slots[pending.slot];
                let commands = prev_slot.command_pool.lock().primary();
                self.submission.record_and_submit(
                    commands,
                    registry,
                    &prev_slot.schedule,
                    &pending.acquired,
                    &prev_slot.render_finished,
                    unsafe { prev_slot.fence.handle() },
                )?;
            }
        }

        let slot = &self.slots[slot_index];
        if !slot.fence.wait(FENCE_WAIT_TIMEOUT)? {
            error!("timed out waiting for frame slot {slot_index}'s in-flight fence");
            return Ok(false);
        }
        slot.fence.reset()?;

        let last_requested = slot.command_pool.lock().last_requested();
        slot.command_pool.lock().reset()?;

        slot.schedule.destruction().drain(descriptor_alloc, compiler)?;

        let frame_number = self.frame_counter.load(Ordering::Acquire);
        for allocator in self.frame_allocators.lock().iter() {
            allocator.retire(frame_number);
        }

        slot.command_pool.lock().shrink_if_idle(last_requested)?;

        *self.pending.lock() = Some(PendingSubmission { slot: slot_index, acquired });
        self.frame_started.store(true, Ordering::Release);
        self.frame_counter.fetch_add(1, Ordering::AcqRel);
        *self.current.lock() = (slot_index + 1) % self.slots.len();

        Ok(true)
    }

    /// §4.1 step 1: recreate any outdated swap-chains, then acquire this tick's image
    /// from every surface. Returns `None` if any image could not be obtained.
    fn acquire_images(&self, instance: &VkInstance, physical: &PhysicalDevice, device: &Device, surfaces: &[Arc<Surface>], slot_index: usize, app_system: Option<&dyn ApplicationSystem>) -> Result<Option<Vec<AcquiredSurface>>> {
        let mut any_outdated = false;
        for surface in surfaces {
            if !surface.has_swapchain() || surface.needs_recreation() {
                any_outdated = true;
                continue;
            }
            if let Some(app_system) = app_system {
                if let Some(info) = app_system.window_info(surface.window()) {
                    let current_extent = surface.with_swapchain(|s| s.extent).unwrap_or_default();
                    if info.width != current_extent.width || info.height != current_extent.height {
                        surface.mark_needs_recreation();
                        any_outdated = true;
                    }
                }
            }
        }

        if any_outdated {
            device.wait_idle()?;
            for surface in surfaces {
                if !surface.has_swapchain() || surface.needs_recreation() {
                    let requests = swapchain::create_swap_chain(instance, physical, device, surface)?;
                    for request in requests {
                        self.slots[slot_index].schedule.push_frame_buffer_request(request);
                    }
                }
            }
        }

        let mut acquired = Vec::with_capacity(surfaces.len());
        for surface in surfaces {
            let Some((handle, image_available)) = surface.with_swapchain(|s| (s.handle, unsafe { s.image_available[slot_index].handle() })) else {
                return Ok(None);
            };

            let result = unsafe { device.swapchain_fns().acquire_next_image(handle, IMAGE_ACQUIRE_TIMEOUT.as_nanos() as u64, image_available, vk::Fence::null()) };
            match result {
                Ok((image_index, suboptimal)) => {
                    if suboptimal {
                        surface.mark_needs_recreation();
                    }
                    surface.set_current_image_index(Some(image_index));
                    acquired.push(AcquiredSurface { surface: surface.clone(), image_index, image_available });
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    surface.mark_needs_recreation();
                    return Ok(None);
                }
                Err(e) => return Err(Error::VkError(e).into()),
            }
        }

        Ok(Some(acquired))
    }

    /// Unconditionally drop every resource queued in every slot's destruction list,
    /// regardless of ttl. Only safe once the device is idle; used at backend teardown
    /// (§4.4).
    pub fn drain_all_destruction(&self, descriptor_alloc: &DescriptorSetPoolAllocator, compiler: &PipelineCompilerWorker) {
        for slot in &self.slots {
            slot.schedule.destruction().drain_all(descriptor_alloc, compiler);
        }
    }
}
