//! Allocator traits to implement for using a custom GPU memory allocator.

use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::allocator::memory_type::MemoryType;

/// Implement this to supply a custom allocator. All allocators must be `Clone`, `Send`
/// and `Sync`; wrap internal state in `Arc<Mutex<T>>` or similar where needed.
pub trait Allocator: Clone + Send + Sync {
    /// Allocation type for this allocator.
    type Allocation: Allocation;

    /// Allocate raw memory of a specific memory type. `name` is used for allocator-side
    /// debug tracking only.
    fn allocate(&mut self, name: &str, requirements: &vk::MemoryRequirements, ty: MemoryType) -> Result<Self::Allocation>;

    /// Explicitly free an allocation. Implementations may instead rely entirely on
    /// `Drop`; either way the allocation is consumed here.
    fn free(&mut self, allocation: Self::Allocation) -> Result<()>;
}

/// An allocation handed out by an [`Allocator`]: raw device memory plus an offset.
pub trait Allocation: Default {
    /// # Safety
    /// The caller must not free this memory or access a range outside
    /// `[offset(), offset() + size())`.
    unsafe fn memory(&self) -> vk::DeviceMemory;

    fn offset(&self) -> vk::DeviceSize;

    /// A mapped pointer into this allocation, or `None` if the backing heap is not
    /// host-visible.
    fn mapped_ptr(&self) -> Option<NonNull<c_void>>;
}
