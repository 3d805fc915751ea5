//! The default GPU memory allocator, backed by `gpu-allocator`.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::{Allocation as RawAllocation, AllocationCreateDesc, Allocator as RawAllocator, AllocatorCreateDesc};

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits;
use crate::core::device::Device;
use crate::core::instance::VkInstance;
use crate::core::physical_device::PhysicalDevice;

/// An allocation handed out by [`DefaultAllocator`].
#[derive(Debug, Default)]
pub struct Allocation {
    inner: Option<RawAllocation>,
}

impl traits::Allocation for Allocation {
    unsafe fn memory(&self) -> vk::DeviceMemory {
        self.inner.as_ref().expect("allocation already freed").memory()
    }

    fn offset(&self) -> vk::DeviceSize {
        self.inner.as_ref().expect("allocation already freed").offset()
    }

    fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.inner.as_ref().and_then(|a| a.mapped_ptr())
    }
}

/// The allocator used unless a caller supplies their own. Thin wrapper around
/// `gpu_allocator::vulkan::Allocator`, shared behind a mutex since the backend may be
/// driven from more than one thread (the pipeline compiler worker in particular).
#[derive(Clone)]
pub struct DefaultAllocator {
    inner: Arc<Mutex<RawAllocator>>,
}

impl DefaultAllocator {
    pub fn new(instance: &VkInstance, device: &Device, physical: &PhysicalDevice) -> Result<Self> {
        let allocator = RawAllocator::new(&AllocatorCreateDesc {
            instance: (*instance).clone(),
            device: (*device).clone(),
            physical_device: unsafe { physical.handle() },
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(DefaultAllocator {
            inner: Arc::new(Mutex::new(allocator)),
        })
    }
}

impl traits::Allocator for DefaultAllocator {
    type Allocation = Allocation;

    fn allocate(&mut self, name: &str, requirements: &vk::MemoryRequirements, ty: MemoryType) -> Result<Self::Allocation> {
        let mut guard = self.inner.lock().map_err(|_| crate::core::error::Error::PoisonError)?;
        let allocation = guard.allocate(&AllocationCreateDesc {
            name,
            requirements: *requirements,
            location: ty.into(),
            linear: true,
            allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
        })?;
        Ok(Allocation { inner: Some(allocation) })
    }

    fn free(&mut self, mut allocation: Self::Allocation) -> Result<()> {
        let mut guard = self.inner.lock().map_err(|_| crate::core::error::Error::PoisonError)?;
        if let Some(raw) = allocation.inner.take() {
            guard.free(raw)?;
        }
        Ok(())
    }
}
