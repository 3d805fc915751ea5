//! Barrier-recording helpers shared by the submission pipeline's transfer, graphics
//! and read-back phases.

use ash::vk;

/// Record a single image memory barrier transitioning `image` from `old` to `new`.
#[allow(clippy::too_many_arguments)]
pub fn image_barrier(
    device: &crate::core::device::Device,
    commands: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(commands, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], &[barrier]);
    }
}

/// Record a single image memory barrier limited to one mip level, used by mip
/// generation (§4.2 step 3a).
#[allow(clippy::too_many_arguments)]
pub fn image_barrier_mip(
    device: &crate::core::device::Device,
    commands: vk::CommandBuffer,
    image: vk::Image,
    mip: u32,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: mip,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(commands, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], &[barrier]);
    }
}

/// Record a single buffer memory barrier, used after transfer-phase uploads (§4.2 step 2).
pub fn buffer_barrier(device: &crate::core::device::Device, commands: vk::CommandBuffer, buffer: vk::Buffer, dst_stage: vk::PipelineStageFlags, dst_access: vk::AccessFlags) {
    let barrier = vk::BufferMemoryBarrier::builder()
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(dst_access)
        .build();
    unsafe {
        device.cmd_pipeline_barrier(commands, vk::PipelineStageFlags::TRANSFER, dst_stage, vk::DependencyFlags::empty(), &[], &[barrier], &[]);
    }
}
