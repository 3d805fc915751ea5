//! `VkSampler` objects and the content-addressed cache that deduplicates them.

use std::collections::HashMap;

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::core::device::Device;

/// A `VkSampler` object.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Sampler {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Sampler,
}

impl Sampler {
    pub fn new(device: Device, info: vk::SamplerCreateInfo) -> Result<Self> {
        Ok(Self {
            handle: unsafe { device.create_sampler(&info, None)? },
            device,
        })
    }

    pub fn default(device: Device) -> Result<Self> {
        Self::new(
            device,
            vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .min_lod(0.0)
                .max_lod(vk::LOD_CLAMP_NONE)
                .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                .build(),
        )
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.handle, None);
        }
    }
}

/// A hashable stand-in for `VkSamplerCreateInfo`, used as the sampler cache's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SamplerKey {
    mag_filter: i32,
    min_filter: i32,
    mipmap_mode: i32,
    address_u: i32,
    address_v: i32,
    address_w: i32,
    min_lod_bits: u32,
    max_lod_bits: u32,
    anisotropy_enable: bool,
}

impl From<&vk::SamplerCreateInfo> for SamplerKey {
    fn from(info: &vk::SamplerCreateInfo) -> Self {
        SamplerKey {
            mag_filter: info.mag_filter.as_raw(),
            min_filter: info.min_filter.as_raw(),
            mipmap_mode: info.mipmap_mode.as_raw(),
            address_u: info.address_mode_u.as_raw(),
            address_v: info.address_mode_v.as_raw(),
            address_w: info.address_mode_w.as_raw(),
            min_lod_bits: info.min_lod.to_bits(),
            max_lod_bits: info.max_lod.to_bits(),
            anisotropy_enable: info.anisotropy_enable == vk::TRUE,
        }
    }
}

/// Deduplicates samplers by their creation parameters. Guards its table behind a single
/// lock (`sampler_cache_lock` in the concurrency design).
#[derive(Default)]
pub struct SamplerCache {
    device: Option<Device>,
    entries: Mutex<HashMap<SamplerKey, std::sync::Arc<Sampler>>>,
}

impl SamplerCache {
    pub fn new(device: Device) -> Self {
        Self {
            device: Some(device),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached sampler for `info`, creating and inserting one if this is the
    /// first request for these parameters.
    pub fn get_or_create(&self, info: vk::SamplerCreateInfo) -> Result<std::sync::Arc<Sampler>> {
        let key = SamplerKey::from(&info);
        let mut entries = self.entries.lock();
        if let Some(sampler) = entries.get(&key) {
            return Ok(sampler.clone());
        }
        let device = self.device.clone().expect("sampler cache used before initialization");
        let sampler = std::sync::Arc::new(Sampler::new(device, info)?);
        entries.insert(key, sampler.clone());
        Ok(sampler)
    }
}
