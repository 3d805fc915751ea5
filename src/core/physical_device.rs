//! Physical device enumeration and selection.

use std::ffi::CStr;

use anyhow::Result;
use ash::vk;

use crate::allocator::heap_kind::HeapKind;
use crate::core::error::Error;
use crate::core::instance::VkInstance;
use crate::wsi::surface::Surface;

/// The image format required to be renderable, sampleable and a transfer target on the
/// selected device; used for every surface and for any color render target that also
/// needs to be sampled later in the frame.
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
pub const SURFACE_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

#[derive(Debug, Default)]
pub struct ExtensionProperties {
    pub name: String,
    pub spec_version: u32,
}

/// A selected physical device (GPU), along with the single queue family this crate
/// requires: one family supporting both graphics and transfer, per the external
/// interfaces section. Multi-queue scheduling is an explicit non-goal.
#[derive(Debug)]
pub struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    extension_properties: Vec<ExtensionProperties>,
    queue_families: Vec<vk::QueueFamilyProperties>,
    graphics_transfer_family: u32,
    heap_kind: HeapKind,
}

impl PhysicalDevice {
    /// Select the first physical device that has a graphics+transfer queue family, the
    /// swapchain extension, and (if a surface is given) a queue able to present to it.
    ///
    /// This is a **user-input error**, not a fatal one, if it fails with no devices
    /// matching: the caller can retry with different requirements or report to the user.
    pub fn select(instance: &VkInstance, surface: Option<&Surface>) -> Result<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(anyhow::Error::from(Error::NoGPU));
        }

        devices
            .iter()
            .find_map(|&handle| -> Option<PhysicalDevice> {
                let properties = unsafe { instance.get_physical_device_properties(handle) };
                let memory_properties = unsafe { instance.get_physical_device_memory_properties(handle) };
                let queue_families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
                let extension_properties = unsafe {
                    instance
                        .enumerate_device_extension_properties(handle)
                        .ok()?
                        .iter()
                        .map(|ext| ExtensionProperties {
                            name: unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned(),
                            spec_version: ext.spec_version,
                        })
                        .collect::<Vec<_>>()
                };

                if !extension_properties.iter().any(|ext| ext.name == "VK_KHR_swapchain") {
                    return None;
                }

                let graphics_transfer_family = find_graphics_transfer_family(&queue_families)?;

                if let Some(surface) = surface {
                    let can_present = unsafe {
                        surface
                            .get_physical_device_surface_support(handle, graphics_transfer_family, surface.handle())
                            .ok()?
                    };
                    if !can_present {
                        return None;
                    }
                }

                let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
                info!("considering physical device {:?}", name);

                Some(PhysicalDevice {
                    handle,
                    properties,
                    memory_properties,
                    extension_properties,
                    queue_families,
                    graphics_transfer_family,
                    heap_kind: HeapKind::classify(&memory_properties),
                })
            })
            .ok_or_else(|| anyhow::Error::from(Error::NoGPU))
    }

    /// Verify the designated surface format supports `TRANSFER | SAMPLED | RENDER` usage
    /// on this device. Per the error handling design, an unsupported surface format is
    /// reported as a device-unsupported error rather than asserted away.
    pub fn verify_surface_format_support(&self, instance: &VkInstance, format: vk::Format) -> Result<()> {
        let props = unsafe { instance.get_physical_device_format_properties(self.handle, format) };
        let required = vk::FormatFeatureFlags::TRANSFER_SRC
            | vk::FormatFeatureFlags::TRANSFER_DST
            | vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::COLOR_ATTACHMENT;
        if !props.optimal_tiling_features.contains(required) {
            return Err(anyhow::Error::from(Error::DeviceUnsupported));
        }
        Ok(())
    }

    pub fn queue_families(&self) -> &[vk::QueueFamilyProperties] {
        &self.queue_families
    }

    pub fn graphics_transfer_family(&self) -> u32 {
        self.graphics_transfer_family
    }

    pub fn heap_kind(&self) -> HeapKind {
        self.heap_kind
    }

    pub unsafe fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
}

fn find_graphics_transfer_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
    families
        .iter()
        .enumerate()
        .find(|(_, family)| family.queue_flags.contains(required))
        .map(|(index, _)| index as u32)
}
