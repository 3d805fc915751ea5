//! Global per-kind resource lists.
//!
//! A resource is either *live* (present in its kind's map) or *scheduled for
//! destruction* (still present, with a matching entry in some frame's destruction
//! list); it is never both absent. Removal from the map happens only when the
//! destruction queue actually drains the entry (§4.4 of the design notes).

use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::allocator::default_allocator::DefaultAllocator;
use crate::resource::buffer::Buffer;
use crate::resource::frame_buffer::FrameBuffer;
use crate::resource::image::Image;
use crate::resource::parameter_set::ParameterSet;
use crate::resource::pass::Pass;
use crate::resource::pass_instance::PassInstance;
use crate::resource::pipeline::{PipelineParameterSetLayout, PipelineSlot};
use crate::resource::{BufferId, FrameBufferId, ImageId, ParameterSetId, ParameterSetLayoutId, PassId, PassInstanceId, PipelineId};

/// The crate-global resource registry. One instance lives inside the top-level backend
/// system; every record-time mutation goes through [`Registry::lock`], which corresponds
/// to the design's `resource_registration_lock`.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryTables>,
}

#[derive(Default)]
pub struct RegistryTables {
    pub buffers: SlotMap<BufferId, Buffer<DefaultAllocator>>,
    pub images: SlotMap<ImageId, Image<DefaultAllocator>>,
    pub passes: SlotMap<PassId, Pass>,
    pub pass_instances: SlotMap<PassInstanceId, PassInstance>,
    pub frame_buffers: SlotMap<FrameBufferId, FrameBuffer>,
    pub pipelines: SlotMap<PipelineId, PipelineSlot>,
    pub parameter_set_layouts: SlotMap<ParameterSetLayoutId, PipelineParameterSetLayout>,
    pub parameter_sets: SlotMap<ParameterSetId, ParameterSet>,
}

impl Registry {
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, RegistryTables> {
        self.inner.lock()
    }
}
