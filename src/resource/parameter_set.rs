//! A bound descriptor set ("parameter set"), allocated from a
//! [`DescriptorSetPoolAllocator`](crate::descriptor::pool::DescriptorSetPoolAllocator).

use ash::vk;

/// A descriptor set allocated from a pool, along with enough information for the
/// allocator to free it back into that pool's free list.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSet {
    handle: vk::DescriptorSet,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
}

impl ParameterSet {
    pub fn new(handle: vk::DescriptorSet, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> Self {
        Self { handle, pool, layout }
    }

    /// # Safety
    /// The caller must not free this handle directly; return it through the owning
    /// [`DescriptorSetPoolAllocator`](crate::descriptor::pool::DescriptorSetPoolAllocator) instead.
    pub unsafe fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

/// A parameter set whose descriptor set has been freed back to its pool but whose
/// wrapper survives the current frame's destruction-queue processing (the "detached"
/// state for descriptor sets named in §3).
#[derive(Debug, Clone, Copy)]
pub struct DetachedParameterSet {
    pub pool: vk::DescriptorPool,
    pub handle: vk::DescriptorSet,
}
