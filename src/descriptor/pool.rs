//! Descriptor pools are created on demand and grown transparently: a caller never sees
//! pool boundaries, only parameter sets (§4.6).

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::core::device::Device;
use crate::resource::parameter_set::ParameterSet;

/// Fixed descriptor-type ratios every pool is sized with.
#[derive(Debug, Clone)]
struct DescriptorPoolSize(HashMap<vk::DescriptorType, u32>);

impl DescriptorPoolSize {
    fn new(min_capacity: u32) -> Self {
        let mut sizes = HashMap::new();
        for ty in [
            vk::DescriptorType::SAMPLER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::INPUT_ATTACHMENT,
        ] {
            sizes.insert(ty, min_capacity);
        }
        Self(sizes)
    }

    fn max_sets(&self) -> u32 {
        self.0.values().sum()
    }

    fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.0.iter().map(|(&ty, &descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count }).collect()
    }
}

struct Pool {
    handle: vk::DescriptorPool,
    /// Sets handed out and not yet returned. When this reaches zero the pool may be
    /// destroyed.
    outstanding: u32,
}

/// Grows descriptor pools on demand, sized by fixed descriptor-type ratios, and keeps
/// a free list of sets per pool so returned sets can be reused without a fresh
/// allocation.
pub struct DescriptorSetPoolAllocator {
    device: Device,
    min_capacity: u32,
    pools: Mutex<Vec<Pool>>,
    free_sets: Mutex<HashMap<vk::DescriptorSetLayout, Vec<ParameterSet>>>,
}

impl DescriptorSetPoolAllocator {
    pub fn new(device: Device, min_capacity: u32) -> Self {
        Self {
            device,
            min_capacity,
            pools: Mutex::new(Vec::new()),
            free_sets: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a parameter set for `layout`, reusing a freed one if available,
    /// otherwise allocating from an existing pool, growing a new pool on failure.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> Result<ParameterSet> {
        if let Some(set) = self.free_sets.lock().get_mut(&layout).and_then(Vec::pop) {
            return Ok(set);
        }

        let mut pools = self.pools.lock();
        if let Some(index) = self.try_allocate_from_existing(&mut pools, layout)? {
            return Ok(index);
        }

        let size = DescriptorPoolSize::new(self.min_capacity);
        let handle = unsafe {
            self.device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(size.max_sets())
                    .pool_sizes(&size.pool_sizes())
                    .build(),
                None,
            )?
        };
        pools.push(Pool { handle, outstanding: 0 });
        let new_pool = pools.last_mut().expect("just pushed");
        let set = allocate_from(&self.device, new_pool.handle, layout)?;
        new_pool.outstanding += 1;
        Ok(ParameterSet::new(set, new_pool.handle, layout))
    }

    fn try_allocate_from_existing(&self, pools: &mut [Pool], layout: vk::DescriptorSetLayout) -> Result<Option<ParameterSet>> {
        for pool in pools.iter_mut() {
            match allocate_from(&self.device, pool.handle, layout) {
                Ok(set) => {
                    pool.outstanding += 1;
                    return Ok(Some(ParameterSet::new(set, pool.handle, layout)));
                }
                Err(e) => {
                    if is_pool_exhausted(&e) {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Return a parameter set to its pool's free list, or free the descriptor set
    /// outright and destroy the pool if it becomes fully unused.
    pub fn free(&self, set: ParameterSet) -> Result<()> {
        let mut free_sets = self.free_sets.lock();
        free_sets.entry(set.layout()).or_default().push(set);
        Ok(())
    }

    /// Actually release a descriptor set's GPU handle back to its pool. Called by the
    /// destruction queue when a detached parameter set is drained (§4.4).
    pub fn release(&self, pool: vk::DescriptorPool, handle: vk::DescriptorSet) -> Result<()> {
        unsafe {
            self.device.free_descriptor_sets(pool, &[handle])?;
        }
        let mut pools = self.pools.lock();
        if let Some(p) = pools.iter_mut().find(|p| p.handle == pool) {
            p.outstanding = p.outstanding.saturating_sub(1);
            if p.outstanding == 0 {
                unsafe {
                    self.device.destroy_descriptor_pool(pool, None);
                }
                pools.retain(|p| p.handle != pool);
            }
        }
        Ok(())
    }
}

fn allocate_from(device: &Device, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let sets = unsafe { device.allocate_descriptor_sets(&vk::DescriptorSetAllocateInfo::builder().descriptor_pool(pool).set_layouts(&layouts).build())? };
    Ok(sets[0])
}

fn is_pool_exhausted(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<crate::core::error::Error>(),
        Some(crate::core::error::Error::VkError(vk::Result::ERROR_OUT_OF_POOL_MEMORY)) | Some(crate::core::error::Error::VkError(vk::Result::ERROR_FRAGMENTED_POOL))
    )
}

impl Drop for DescriptorSetPoolAllocator {
    fn drop(&mut self) {
        for pool in self.pools.lock().drain(..) {
            unsafe {
                self.device.destroy_descriptor_pool(pool.handle, None);
            }
        }
    }
}
