//! Requested memory type for an allocation, independent of the allocator backend.

use gpu_allocator::MemoryLocation;

/// The kind of memory an allocation should come from. This is a request, not a
/// guarantee: on a [`crate::allocator::heap_kind::HeapKind::UnifiedCoherent`] device
/// `GpuOnly` and `CpuToGpu` may resolve to the same physical heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryType {
    /// Fastest to access from the GPU, not directly writable from the CPU.
    GpuOnly,
    /// Host-visible memory intended for the CPU to write and the GPU to read, such as
    /// staging buffers and per-frame uniform buffers.
    CpuToGpu,
    /// Host-visible memory intended for the GPU to write and the CPU to read, used for
    /// read-back destinations.
    GpuToCpu,
}

impl From<MemoryType> for MemoryLocation {
    fn from(ty: MemoryType) -> Self {
        match ty {
            MemoryType::GpuOnly => MemoryLocation::GpuOnly,
            MemoryType::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryType::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }
}
