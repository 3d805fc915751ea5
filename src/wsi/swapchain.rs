//! Swap-chain (re)creation and teardown (§4.8).

use anyhow::Result;
use ash::vk;

use crate::core::config::FRAMES_IN_FLIGHT;
use crate::core::device::Device;
use crate::core::error::Error;
use crate::core::instance::VkInstance;
use crate::core::physical_device::{PhysicalDevice, SURFACE_COLOR_SPACE, SURFACE_FORMAT};
use crate::resource::frame_buffer::FrameBufferRequest;
use crate::sync::semaphore::Semaphore;
use crate::wsi::surface::{Surface, SwapchainData};

/// Create (or recreate) `surface`'s swap-chain. Queries capabilities fresh each time,
/// since this also runs on resize. Returns frame-buffer-creation requests for every
/// frame-buffer already attached to this surface, so the caller can enqueue them on
/// the current schedule.
pub fn create_swap_chain(instance: &VkInstance, physical: &PhysicalDevice, device: &Device, surface: &Surface) -> Result<Vec<FrameBufferRequest>> {
    let capabilities = unsafe { surface.get_physical_device_surface_capabilities(physical.handle(), surface.handle())? };
    let formats = unsafe { surface.get_physical_device_surface_formats(physical.handle(), surface.handle())? };
    let present_modes = unsafe { surface.get_physical_device_surface_present_modes(physical.handle(), surface.handle())? };

    if formats.is_empty() {
        return Err(anyhow::Error::from(Error::NoSurfaceFormat));
    }
    let format = formats
        .iter()
        .find(|f| f.format == SURFACE_FORMAT && f.color_space == SURFACE_COLOR_SPACE)
        .copied()
        .unwrap_or(formats[0]);

    let present_mode = surface
        .present_mode_preferences()
        .iter()
        .find(|pref| present_modes.contains(pref))
        .copied()
        .ok_or_else(|| anyhow::Error::from(Error::NoPresentMode))?;

    let extent = clamp_extent(capabilities.current_extent, capabilities.min_image_extent, capabilities.max_image_extent);

    let min_image_count = (FRAMES_IN_FLIGHT as u32).max(capabilities.min_image_count) + 1;
    let min_image_count = if capabilities.max_image_count > 0 {
        min_image_count.min(capabilities.max_image_count)
    } else {
        min_image_count
    };

    let old_swapchain = surface.with_swapchain(|s| s.handle).unwrap_or(vk::SwapchainKHR::null());

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface.handle())
        .min_image_count(min_image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain)
        .build();

    let handle = unsafe { device.swapchain_fns().create_swapchain(&create_info, None)? };
    let images = unsafe { device.swapchain_fns().get_swapchain_images(handle)? };

    let views = images
        .iter()
        .map(|&image| unsafe {
            device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .build(),
                None,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let image_available = (0..FRAMES_IN_FLIGHT).map(|_| Semaphore::new(device.clone())).collect::<Result<Vec<_>>>()?;

    if old_swapchain != vk::SwapchainKHR::null() {
        if let Some(old) = surface.replace_swapchain(None) {
            destroy_swapchain_resources(device, old);
        }
    }

    surface.replace_swapchain(Some(SwapchainData {
        handle,
        images,
        views,
        image_available,
        format: format.format,
        extent,
        present_mode,
        current_image_index: None,
    }));
    surface.clear_needs_recreation();

    let requests = surface
        .attachment_requests()
        .into_iter()
        .map(|request| FrameBufferRequest {
            width: extent.width,
            height: extent.height,
            ..request
        })
        .collect();

    Ok(requests)
}

/// Only safe to call at device-idle (§4.8): destroys attached frame-buffers
/// synchronously first, then semaphores, views, and the swap-chain itself.
pub fn destroy_swap_chain(device: &Device, surface: &Surface) {
    if let Some(data) = surface.replace_swapchain(None) {
        destroy_swapchain_resources(device, data);
    }
}

fn destroy_swapchain_resources(device: &Device, data: SwapchainData) {
    drop(data.image_available);
    for view in data.views {
        unsafe {
            device.destroy_image_view(view, None);
        }
    }
    unsafe {
        device.swapchain_fns().destroy_swapchain(data.handle, None);
    }
}

fn clamp_extent(current: vk::Extent2D, min: vk::Extent2D, max: vk::Extent2D) -> vk::Extent2D {
    if current.width != u32::MAX {
        return current;
    }
    vk::Extent2D {
        width: current.width.clamp(min.width, max.width.max(min.width)),
        height: current.height.clamp(min.height, max.height.max(min.height)),
    }
}
