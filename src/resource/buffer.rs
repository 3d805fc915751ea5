//! Wrapper around `VkBuffer` objects.

use std::ffi::c_void;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::{Allocation, Allocator};
use crate::core::device::Device;
use crate::core::error::Error;

/// What a buffer is used for. Determines which stage/access mask a transfer-phase
/// barrier targets after an upload completes (§4.2 step 2).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferKind {
    Attribute,
    Index,
    Uniform,
    Storage,
    /// Destination of a read-back copy. Never a legal upload target.
    ReadbackStorage,
}

impl BufferKind {
    /// The barrier this buffer's kind requires after an upload lands, or an error if
    /// this kind cannot legally be an upload target.
    pub fn upload_dst_barrier(self) -> Result<(vk::PipelineStageFlags, vk::AccessFlags)> {
        match self {
            BufferKind::Attribute => Ok((vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::VERTEX_ATTRIBUTE_READ)),
            BufferKind::Index => Ok((vk::PipelineStageFlags::VERTEX_INPUT, vk::AccessFlags::INDEX_READ)),
            BufferKind::Uniform => Ok((
                vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::UNIFORM_READ,
            )),
            BufferKind::Storage => Ok((
                vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            )),
            BufferKind::ReadbackStorage => Err(anyhow::Error::from(Error::IllegalUploadTarget(self))),
        }
    }
}

/// Wrapper around a [`VkBuffer`](vk::Buffer) and its backing allocation.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Buffer<A: Allocator> {
    #[derivative(Debug = "ignore")]
    device: Device,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
    pointer: Option<NonNull<c_void>>,
    handle: vk::Buffer,
    size: vk::DeviceSize,
    kind: BufferKind,
    name: String,
}

unsafe impl<A: Allocator> Send for Buffer<A> {}
unsafe impl<A: Allocator> Sync for Buffer<A> {}

/// A view into an offset and range of a [`Buffer`]. Cheap to copy; valid only as long as
/// the owning buffer is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferView {
    handle: vk::Buffer,
    pointer: Option<NonNull<c_void>>,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

unsafe impl Send for BufferView {}

impl<A: Allocator> Buffer<A> {
    pub fn new(
        device: Device,
        allocator: &mut A,
        name: impl Into<String>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryType,
        kind: BufferKind,
    ) -> Result<Self> {
        let name = name.into();
        let handle = unsafe {
            device.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                None,
            )?
        };
        #[cfg(feature = "log-objects")]
        trace!("created buffer '{name}' ({size} bytes, {kind:?})");

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let memory = allocator.allocate(&name, &requirements, location)?;
        unsafe { device.bind_buffer_memory(handle, memory.memory(), memory.offset())? };

        Ok(Self {
            device,
            pointer: memory.mapped_ptr(),
            memory,
            handle,
            size,
            kind,
            name,
        })
    }

    /// View into an offset and range of the buffer. Fails if the range is out of bounds.
    pub fn view(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<BufferView> {
        if offset + size > self.size {
            return Err(anyhow::Error::from(Error::Uncategorized("buffer view out of range")));
        }
        Ok(BufferView {
            handle: self.handle,
            pointer: unsafe { self.pointer.map(|p| NonNull::new_unchecked(p.as_ptr().add(offset as usize))) },
            offset,
            size,
        })
    }

    pub fn view_full(&self) -> BufferView {
        BufferView {
            handle: self.handle,
            pointer: self.pointer,
            offset: 0,
            size: self.size,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.pointer.is_some()
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Unmap (no-op for persistently-mapped `gpu-allocator` allocations) and flush the
    /// full mapped range, if mapped.
    pub fn flush(&self) -> Result<()> {
        if self.pointer.is_none() {
            return Ok(());
        }
        unsafe {
            self.device.flush_mapped_memory_ranges(&[vk::MappedMemoryRange::builder()
                .memory(self.memory.memory())
                .offset(self.memory.offset())
                .size(self.size)
                .build()])?;
        }
        Ok(())
    }
}

impl<A: Allocator> Drop for Buffer<A> {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("destroying buffer '{}'", self.name);
        unsafe {
            self.device.destroy_buffer(self.handle, None);
        }
    }
}

impl BufferView {
    pub fn mapped_slice<T>(&mut self) -> Result<&mut [T]> {
        match self.pointer {
            Some(pointer) => Ok(unsafe { std::slice::from_raw_parts_mut(pointer.cast::<T>().as_ptr(), self.size as usize / std::mem::size_of::<T>()) }),
            None => Err(anyhow::Error::from(Error::Uncategorized("buffer view is not mapped"))),
        }
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after the owning
    /// buffer drops.
    pub unsafe fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}
