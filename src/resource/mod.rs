//! GPU resource wrappers and the generational ids used to reference them.
//!
//! Every resource kind (buffer, image, pass, pass instance, pipeline, parameter-set
//! layout, frame-buffer) is stored in a global per-kind [`slotmap::SlotMap`] guarded by
//! [`crate::resource::registry::resource_registration_lock`]. Callers never see raw
//! pointers or indices into these maps directly; they hold a generational key, so a
//! stale key referencing a destroyed-and-recycled slot is detected rather than silently
//! aliasing a new resource.

pub mod buffer;
pub mod code_module;
pub mod frame_buffer;
pub mod image;
pub mod parameter_set;
pub mod pass;
pub mod pass_instance;
pub mod pipeline;
pub mod pool_ttl;
pub mod registry;
pub mod sampler;

slotmap::new_key_type! {
    /// Key identifying a live or scheduled-for-destruction [`buffer::Buffer`].
    pub struct BufferId;
    /// Key identifying a live or scheduled-for-destruction [`image::Image`].
    pub struct ImageId;
    /// Key identifying a registered [`pass::Pass`].
    pub struct PassId;
    /// Key identifying a per-frame [`pass_instance::PassInstance`].
    pub struct PassInstanceId;
    /// Key identifying a [`frame_buffer::FrameBuffer`].
    pub struct FrameBufferId;
    /// Key identifying a [`pipeline::GraphicsPipeline`].
    pub struct PipelineId;
    /// Key identifying a [`pipeline::PipelineParameterSetLayout`].
    pub struct ParameterSetLayoutId;
    /// Key identifying a [`parameter_set::ParameterSet`].
    pub struct ParameterSetId;
}
