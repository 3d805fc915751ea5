//! Per-frame-slot schedule state (§3): everything record-time calls queue up for the
//! submission pipeline to consume on the next `next_frame`.

use ash::vk;
use parking_lot::Mutex;

use crate::deferred_destroy::DestructionLists;
use crate::read_back::{ReadBackList, ReadBackRequest};
use crate::resource::buffer::BufferView;
use crate::resource::frame_buffer::FrameBufferRequest;
use crate::resource::{BufferId, ImageId};

/// Staging-buffer-to-device-buffer upload: unmap + flush the staging range, copy, then
/// barrier into the target buffer kind's read stage (§4.2 step 2).
pub struct BufferUpload {
    pub staging: BufferView,
    pub target: BufferId,
    pub target_offset: vk::DeviceSize,
}

/// An in-place mapped write that only needs unmap + flush, no copy.
pub struct BufferFlush {
    pub target: BufferId,
}

/// Staging-buffer-to-device-image upload of a single mip level.
pub struct ImageUpload {
    pub staging: BufferView,
    pub target: ImageId,
    pub mip: u32,
}

/// Device-to-device image copy.
pub struct ImageCopy {
    pub source: ImageId,
    pub target: ImageId,
}

/// Generate mips `first+1..=last` of `image` from mip `first` by successive blits
/// (§4.2 step 3a).
pub struct MipGeneration {
    pub image: ImageId,
    pub first: u32,
    pub last: u32,
}

/// All the scheduled work for one frame-in-flight slot. Lists here stand in for the
/// original design's singly-linked lists (§9 allows either representation); they are
/// drained in full by the submission pipeline each time this slot comes due.
#[derive(Default)]
pub struct ScheduleState {
    uploads: Mutex<Vec<BufferUpload>>,
    flushes: Mutex<Vec<BufferFlush>>,
    image_uploads: Mutex<Vec<ImageUpload>>,
    image_copies: Mutex<Vec<ImageCopy>>,
    mip_generations: Mutex<Vec<MipGeneration>>,
    frame_buffer_requests: Mutex<Vec<FrameBufferRequest>>,
    read_back_requests: Mutex<Vec<ReadBackRequest>>,
    active_read_backs: Mutex<ReadBackList>,
    destruction: Mutex<DestructionLists>,
}

impl ScheduleState {
    pub fn new(max_ttl: u32) -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            flushes: Mutex::new(Vec::new()),
            image_uploads: Mutex::new(Vec::new()),
            image_copies: Mutex::new(Vec::new()),
            mip_generations: Mutex::new(Vec::new()),
            frame_buffer_requests: Mutex::new(Vec::new()),
            read_back_requests: Mutex::new(Vec::new()),
            active_read_backs: Mutex::new(ReadBackList::new()),
            destruction: Mutex::new(DestructionLists::new(max_ttl)),
        }
    }

    pub fn push_upload(&self, upload: BufferUpload) {
        self.uploads.lock().push(upload);
    }

    pub fn push_flush(&self, flush: BufferFlush) {
        self.flushes.lock().push(flush);
    }

    pub fn push_image_upload(&self, upload: ImageUpload) {
        self.image_uploads.lock().push(upload);
    }

    pub fn push_image_copy(&self, copy: ImageCopy) {
        self.image_copies.lock().push(copy);
    }

    pub fn push_mip_generation(&self, mip_gen: MipGeneration) {
        self.mip_generations.lock().push(mip_gen);
    }

    pub fn push_frame_buffer_request(&self, request: FrameBufferRequest) {
        self.frame_buffer_requests.lock().push(request);
    }

    /// Drain only the frame-buffer-creation queue, leaving every other work list
    /// untouched. Used by the backend to build whatever it can immediately after
    /// `next_frame` rotates a swap-chain-triggered request onto the current slot,
    /// ahead of the submission pipeline's own (no-op) pass over this list (§4.2 step 3b).
    pub fn take_frame_buffer_requests(&self) -> Vec<FrameBufferRequest> {
        std::mem::take(&mut *self.frame_buffer_requests.lock())
    }

    pub fn schedule_read_back(&self, target: crate::read_back::ReadBackTarget) -> crate::read_back::ReadBackStatus {
        let status = self.active_read_backs.lock().schedule();
        self.read_back_requests.lock().push(ReadBackRequest { target, status: status.clone() });
        status
    }

    pub fn destruction(&self) -> parking_lot::MutexGuard<'_, DestructionLists> {
        self.destruction.lock()
    }

    /// Drain every work list for the submission pipeline to consume. Does not touch
    /// the destruction queue or the active read-back list, which are handled
    /// separately (§4.1 steps 5 and §4.2 step 4).
    pub fn take_work(&self) -> ScheduledWork {
        ScheduledWork {
            uploads: std::mem::take(&mut *self.uploads.lock()),
            flushes: std::mem::take(&mut *self.flushes.lock()),
            image_uploads: std::mem::take(&mut *self.image_uploads.lock()),
            image_copies: std::mem::take(&mut *self.image_copies.lock()),
            mip_generations: std::mem::take(&mut *self.mip_generations.lock()),
            frame_buffer_requests: std::mem::take(&mut *self.frame_buffer_requests.lock()),
            read_back_requests: std::mem::take(&mut *self.read_back_requests.lock()),
        }
    }

    pub fn cleanup_read_backs(&self) {
        self.active_read_backs.lock().cleanup();
    }

    /// Whether every sub-list (including the destruction queue) is empty. The
    /// stack-group allocator backing this schedule may only be reset when this holds.
    pub fn is_fully_drained(&self) -> bool {
        self.uploads.lock().is_empty()
            && self.flushes.lock().is_empty()
            && self.image_uploads.lock().is_empty()
            && self.image_copies.lock().is_empty()
            && self.mip_generations.lock().is_empty()
            && self.frame_buffer_requests.lock().is_empty()
            && self.read_back_requests.lock().is_empty()
            && self.destruction.lock().is_fully_drained()
    }
}

/// One frame's worth of work, taken out of the schedule for the submission pipeline
/// to record.
pub struct ScheduledWork {
    pub uploads: Vec<BufferUpload>,
    pub flushes: Vec<BufferFlush>,
    pub image_uploads: Vec<ImageUpload>,
    pub image_copies: Vec<ImageCopy>,
    pub mip_generations: Vec<MipGeneration>,
    pub frame_buffer_requests: Vec<FrameBufferRequest>,
    pub read_back_requests: Vec<ReadBackRequest>,
}
