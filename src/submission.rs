//! Records and submits one frame's primary command buffer (§4.2).

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::command::buffer::{buffer_barrier, image_barrier, image_barrier_mip};
use crate::core::device::Device;
use crate::core::error::Error;
use crate::pass_graph;
use crate::resource::frame_buffer::{AttachmentTarget, BoundAttachment, FrameBuffer};
use crate::resource::registry::{Registry, RegistryTables};
use crate::schedule::ScheduleState;
use crate::sync::semaphore::Semaphore;
use crate::wsi::surface::{RenderState, Surface};

/// What the frame scheduler learned about one surface during image acquisition, kept
/// around so the submission pipeline and present step don't need to re-derive it.
pub struct AcquiredSurface {
    pub surface: Arc<Surface>,
    pub image_index: u32,
    pub image_available: vk::Semaphore,
}

/// Records a single primary command buffer implementing §4.2 steps 1-5, then submits
/// and presents (steps 6-7).
pub struct SubmissionPipeline {
    device: Device,
}

impl SubmissionPipeline {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_and_submit(
        &self,
        commands: vk::CommandBuffer,
        registry: &Registry,
        schedule: &ScheduleState,
        acquired: &[AcquiredSurface],
        render_finished: &Semaphore,
        in_flight_fence: vk::Fence,
    ) -> Result<()> {
        unsafe {
            self.device.begin_command_buffer(commands, &vk::CommandBufferBeginInfo::builder().build())?;
        }

        let work = schedule.take_work();
        self.transfer_phase(commands, registry, &work)?;
        self.graphics_phase(commands, registry, &work, acquired)?;
        self.read_back_phase(commands, registry, &work)?;
        self.finalize(commands, acquired)?;

        unsafe {
            self.device.end_command_buffer(commands)?;
        }

        self.submit(commands, acquired, render_finished, in_flight_fence)?;
        self.present(acquired, render_finished)?;
        Ok(())
    }

    fn transfer_phase(&self, commands: vk::CommandBuffer, registry: &Registry, work: &crate::schedule::ScheduledWork) -> Result<()> {
        let tables = registry.lock();

        for upload in &work.uploads {
            let target = tables.buffers.get(upload.target).ok_or_else(|| Error::ResourceNotFound("buffer".into()))?;
            let region = vk::BufferCopy::builder().src_offset(upload.staging.offset()).dst_offset(upload.target_offset).size(upload.staging.size()).build();
            unsafe {
                self.device.cmd_copy_buffer(commands, upload.staging.handle(), target.handle(), &[region]);
            }
            let (stage, access) = target.kind().upload_dst_barrier()?;
            unsafe {
                buffer_barrier(&self.device, commands, target.handle(), stage, access);
            }
        }

        for flush in &work.flushes {
            let target = tables.buffers.get(flush.target).ok_or_else(|| Error::ResourceNotFound("buffer".into()))?;
            target.flush()?;
        }

        for upload in &work.image_uploads {
            let image = tables.images.get(upload.target).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
            let old_layout = image.last_command_layout();
            unsafe {
                image_barrier_mip(
                    &self.device,
                    commands,
                    image.handle(),
                    upload.mip,
                    old_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                );
            }
            let extent = image.size();
            let region = vk::BufferImageCopy::builder()
                .buffer_offset(upload.staging.offset())
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: upload.mip,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();
            unsafe {
                self.device.cmd_copy_buffer_to_image(commands, upload.staging.handle(), image.handle(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
                image_barrier_mip(
                    &self.device,
                    commands,
                    image.handle(),
                    upload.mip,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::SHADER_READ,
                );
            }
            image.set_last_command_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }

        for copy in &work.image_copies {
            let source = tables.images.get(copy.source).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
            let target = tables.images.get(copy.target).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
            let source_old = source.last_command_layout();
            let target_old = target.last_command_layout();
            unsafe {
                image_barrier(
                    &self.device,
                    commands,
                    source.handle(),
                    vk::ImageAspectFlags::COLOR,
                    source_old,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_READ,
                );
                image_barrier(
                    &self.device,
                    commands,
                    target.handle(),
                    vk::ImageAspectFlags::COLOR,
                    target_old,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                );
            }
            let extent = source.size();
            let region = vk::ImageCopy::builder()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();
            unsafe {
                self.device.cmd_copy_image(commands, source.handle(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, target.handle(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region]);
                for (image, layout) in [(source, vk::ImageLayout::TRANSFER_SRC_OPTIMAL), (target, vk::ImageLayout::TRANSFER_DST_OPTIMAL)] {
                    image_barrier(
                        &self.device,
                        commands,
                        image.handle(),
                        vk::ImageAspectFlags::COLOR,
                        layout,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ,
                    );
                    image.set_last_command_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                }
            }
        }

        Ok(())
    }

    fn graphics_phase(&self, commands: vk::CommandBuffer, registry: &Registry, work: &crate::schedule::ScheduledWork, acquired: &[AcquiredSurface]) -> Result<()> {
        {
            let tables = registry.lock();
            for mip_gen in &work.mip_generations {
                let image = tables.images.get(mip_gen.image).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
                let extent = image.size();
                unsafe {
                    for mip in (mip_gen.first + 1)..=mip_gen.last {
                        // The previous mip is always SHADER_READ_ONLY here: either it's
                        // `first`, already in that layout from the upload that seeded it,
                        // or it was put back there at the end of the prior iteration.
                        image_barrier_mip(
                            &self.device,
                            commands,
                            image.handle(),
                            mip - 1,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            vk::PipelineStageFlags::TRANSFER,
                            vk::AccessFlags::SHADER_READ,
                            vk::AccessFlags::TRANSFER_READ,
                        );
                        image_barrier_mip(
                            &self.device,
                            commands,
                            image.handle(),
                            mip,
                            vk::ImageLayout::UNDEFINED,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::PipelineStageFlags::TOP_OF_PIPE,
                            vk::PipelineStageFlags::TRANSFER,
                            vk::AccessFlags::empty(),
                            vk::AccessFlags::TRANSFER_WRITE,
                        );
                        let src_w = (extent.width >> (mip - 1)).max(1) as i32;
                        let src_h = (extent.height >> (mip - 1)).max(1) as i32;
                        let dst_w = (extent.width >> mip).max(1) as i32;
                        let dst_h = (extent.height >> mip).max(1) as i32;
                        let blit = vk::ImageBlit::builder()
                            .src_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                mip_level: mip - 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: src_w, y: src_h, z: 1 }])
                            .dst_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                mip_level: mip,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: dst_w, y: dst_h, z: 1 }])
                            .build();
                        self.device.cmd_blit_image(
                            commands,
                            image.handle(),
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            image.handle(),
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[blit],
                            vk::Filter::LINEAR,
                        );
                        image_barrier_mip(
                            &self.device,
                            commands,
                            image.handle(),
                            mip - 1,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            vk::PipelineStageFlags::TRANSFER,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            vk::AccessFlags::TRANSFER_READ,
                            vk::AccessFlags::SHADER_READ,
                        );
                    }
                    image_barrier_mip(
                        &self.device,
                        commands,
                        image.handle(),
                        mip_gen.last,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ,
                    );
                }
                image.set_last_command_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
        }

        // Frame-buffer creation requests are consumed by the backend before this
        // pipeline records anything (building one requires registry write access);
        // by the time we're here, only already-built frame-buffers remain to execute.
        let _ = &work.frame_buffer_requests;

        self.execute_pass_instances(commands, registry)?;
        self.process_blit_requests(commands, acquired)?;

        Ok(())
    }

    fn execute_pass_instances(&self, commands: vk::CommandBuffer, registry: &Registry) -> Result<()> {
        let mut tables = registry.lock();

        // Lift pass-level dependency edges to instance-level ones for this frame.
        // Collected up front so the mutation pass below never needs to borrow
        // `tables.passes` and `tables.pass_instances` at the same time.
        let mut instance_edges: Vec<(crate::resource::PassInstanceId, crate::resource::PassInstanceId)> = Vec::new();
        for dependency_pass in tables.passes.values() {
            for dependant_pass_id in dependency_pass.dependants() {
                let Some(dependant_pass) = tables.passes.get(dependant_pass_id) else { continue };
                for &dep_instance in &dependency_pass.instances_this_frame() {
                    for &dependant_instance in &dependant_pass.instances_this_frame() {
                        instance_edges.push((dep_instance, dependant_instance));
                    }
                }
            }
        }
        for (dep_instance, dependant_instance) in instance_edges {
            if let Some(inst) = tables.pass_instances.get(dep_instance) {
                inst.add_dependant(dependant_instance);
            }
            if let Some(inst) = tables.pass_instances.get_mut(dependant_instance) {
                inst.add_dependency(dep_instance);
            }
        }

        let all_instances: Vec<_> = tables.passes.values().flat_map(|pass| pass.instances_this_frame()).collect();

        let result = pass_graph::topological_sort(&tables.pass_instances, &all_instances, |id| {
            tables
                .pass_instances
                .get(id)
                .and_then(|inst| tables.frame_buffers.get(inst.frame_buffer()))
                .map(|fb| fb.has_surface_attachment())
                .unwrap_or(false)
        });
        if result.cycle_recovered {
            error!("pass graph cycle recovered this frame; output order is not guaranteed");
        }

        for instance_id in result.order {
            let Some(instance) = tables.pass_instances.get(instance_id) else { continue };
            let Some(frame_buffer) = tables.frame_buffers.get(instance.frame_buffer()) else { continue };
            self.record_pass_instance(commands, &tables, frame_buffer, instance.commands())?;
        }

        for pass in tables.passes.values() {
            pass.clear_frame_state();
        }

        Ok(())
    }

    /// Record one pass instance's secondary buffer inside `vkCmdBeginRendering`/
    /// `vkCmdEndRendering`, barriering every attachment into its required layout
    /// beforehand and, for owned sampleable images, back to `SHADER_READ_ONLY_OPTIMAL`
    /// afterwards (§4.2 step 3c). A surface attachment is left in
    /// `COLOR_ATTACHMENT_OPTIMAL`; [`SubmissionPipeline::finalize`] transitions it to
    /// `PRESENT_SRC_KHR` once every pass has run, driven by the render-state update
    /// this records below.
    fn record_pass_instance(&self, commands: vk::CommandBuffer, tables: &RegistryTables, frame_buffer: &FrameBuffer, secondary: vk::CommandBuffer) -> Result<()> {
        let attachments = frame_buffer.current_instance();
        let extent = frame_buffer.extent();
        let surface = frame_buffer.surface();
        let mut wrote_surface = false;

        for bound in &attachments.color {
            self.transition_attachment_in(commands, tables, surface, bound, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, &mut wrote_surface)?;
        }
        if let Some(bound) = &attachments.depth_stencil {
            self.transition_attachment_in(commands, tables, surface, bound, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, &mut wrote_surface)?;
        }

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = attachments
            .color
            .iter()
            .map(|bound| {
                vk::RenderingAttachmentInfo::builder()
                    .image_view(bound.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .build()
            })
            .collect();
        let depth_attachment = attachments.depth_stencil.as_ref().map(|bound| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(bound.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
                .build()
        });

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .flags(vk::RenderingFlags::CONTENTS_SECONDARY_COMMAND_BUFFERS);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device.cmd_begin_rendering(commands, &rendering_info.build());
            if secondary != vk::CommandBuffer::null() {
                self.device.cmd_execute_commands(commands, std::slice::from_ref(&secondary));
            }
            self.device.cmd_end_rendering(commands);
        }

        for bound in &attachments.color {
            self.transition_attachment_out(commands, tables, bound, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        if let Some(bound) = &attachments.depth_stencil {
            self.transition_attachment_out(commands, tables, bound, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        }

        if wrote_surface {
            if let Some(surface) = surface {
                surface.set_render_state(RenderState::ReceivedDataFromFrameBuffer);
            }
        }

        Ok(())
    }

    /// Barrier one attachment from whatever layout it's currently known to be in up
    /// to `target_layout`, and record that layout on the resource it belongs to.
    fn transition_attachment_in(
        &self,
        commands: vk::CommandBuffer,
        tables: &RegistryTables,
        surface: Option<&Arc<Surface>>,
        bound: &BoundAttachment,
        target_layout: vk::ImageLayout,
        wrote_surface: &mut bool,
    ) -> Result<()> {
        let is_depth = target_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let aspect = if is_depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let dst_stage = if is_depth {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        } else {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        };
        let dst_access = if is_depth {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        } else {
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        };

        match bound.target {
            AttachmentTarget::Image(id) => {
                let image = tables.images.get(id).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
                let old_layout = image.last_command_layout();
                unsafe {
                    image_barrier(&self.device, commands, image.handle(), aspect, old_layout, target_layout, vk::PipelineStageFlags::TOP_OF_PIPE, dst_stage, vk::AccessFlags::empty(), dst_access);
                }
                image.set_last_command_layout(target_layout);
            }
            AttachmentTarget::Surface => {
                let surface = surface.ok_or_else(|| anyhow::Error::from(Error::Uncategorized("frame-buffer has a surface attachment but no surface")))?;
                *wrote_surface = true;
                let old_layout = surface.render_state().current_layout();
                let image = surface
                    .with_swapchain(|s| s.current_image_index.map(|i| s.images[i as usize]))
                    .flatten()
                    .ok_or_else(|| anyhow::Error::from(Error::Uncategorized("surface has no acquired image this frame")))?;
                unsafe {
                    image_barrier(&self.device, commands, image, aspect, old_layout, target_layout, vk::PipelineStageFlags::TOP_OF_PIPE, dst_stage, vk::AccessFlags::empty(), dst_access);
                }
            }
        }
        Ok(())
    }

    /// After rendering, barrier an owned sampleable attachment back to
    /// `SHADER_READ_ONLY_OPTIMAL` so it can be bound as a texture next. Surface
    /// attachments are left alone here; their final transition happens in `finalize`.
    fn transition_attachment_out(&self, commands: vk::CommandBuffer, tables: &RegistryTables, bound: &BoundAttachment, current_layout: vk::ImageLayout) {
        let AttachmentTarget::Image(id) = bound.target else { return };
        let Some(image) = tables.images.get(id) else { return };
        if !image.is_sampleable() {
            return;
        }

        let is_depth = current_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let aspect = if is_depth { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let src_stage = if is_depth {
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        } else {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        };
        let src_access = if is_depth {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        } else {
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        };

        unsafe {
            image_barrier(
                &self.device,
                commands,
                image.handle(),
                aspect,
                current_layout,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                src_stage,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access,
                vk::AccessFlags::SHADER_READ,
            );
        }
        image.set_last_command_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    fn process_blit_requests(&self, commands: vk::CommandBuffer, acquired: &[AcquiredSurface]) -> Result<()> {
        for acquired_surface in acquired {
            let blits = acquired_surface.surface.take_blit_requests();
            if blits.is_empty() {
                continue;
            }
            let dest_old_layout = acquired_surface.surface.render_state().current_layout();
            let dest_image = acquired_surface
                .surface
                .with_swapchain(|s| s.images[acquired_surface.image_index as usize])
                .ok_or_else(|| Error::Uncategorized("surface has no active swapchain"))?;
            for blit in blits {
                unsafe {
                    image_barrier(
                        &self.device,
                        commands,
                        blit.source,
                        vk::ImageAspectFlags::COLOR,
                        blit.source_layout,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::AccessFlags::SHADER_READ,
                        vk::AccessFlags::TRANSFER_READ,
                    );
                    image_barrier(
                        &self.device,
                        commands,
                        dest_image,
                        vk::ImageAspectFlags::COLOR,
                        dest_old_layout,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::AccessFlags::empty(),
                        vk::AccessFlags::TRANSFER_WRITE,
                    );
                }
                let extent = blit.source_extent;
                let region = vk::ImageBlit::builder()
                    .src_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 }])
                    .dst_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: extent.width as i32, y: extent.height as i32, z: 1 }])
                    .build();
                unsafe {
                    self.device.cmd_blit_image(commands, blit.source, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, dest_image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &[region], vk::Filter::LINEAR);
                    image_barrier(
                        &self.device,
                        commands,
                        blit.source,
                        vk::ImageAspectFlags::COLOR,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::AccessFlags::TRANSFER_READ,
                        vk::AccessFlags::SHADER_READ,
                    );
                }
                acquired_surface.surface.set_render_state(RenderState::ReceivedDataFromBlit);
            }
        }
        Ok(())
    }

    fn read_back_phase(&self, commands: vk::CommandBuffer, registry: &Registry, work: &crate::schedule::ScheduledWork) -> Result<()> {
        let tables = registry.lock();
        for request in &work.read_back_requests {
            match &request.target {
                crate::read_back::ReadBackTarget::Surface { surface } => {
                    if !surface.has_swapchain() {
                        request.status.mark_failed();
                        continue;
                    }
                    request.status.mark_finished();
                }
                crate::read_back::ReadBackTarget::Buffer { source, destination } => {
                    let (Some(source), Some(destination)) = (tables.buffers.get(*source), tables.buffers.get(*destination)) else {
                        request.status.mark_failed();
                        continue;
                    };
                    let region = vk::BufferCopy::builder().size(source.view_full().size()).build();
                    unsafe {
                        self.device.cmd_copy_buffer(commands, source.handle(), destination.handle(), &[region]);
                    }
                    request.status.mark_finished();
                }
                crate::read_back::ReadBackTarget::Image { source, mip, destination } => {
                    let (Some(source), Some(destination)) = (tables.images.get(*source), tables.buffers.get(*destination)) else {
                        request.status.mark_failed();
                        continue;
                    };
                    if *mip >= source.mip_levels() {
                        request.status.mark_failed();
                        continue;
                    }
                    let old_layout = source.last_command_layout();
                    let extent = source.size();
                    unsafe {
                        image_barrier_mip(
                            &self.device,
                            commands,
                            source.handle(),
                            *mip,
                            old_layout,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            vk::PipelineStageFlags::FRAGMENT_SHADER,
                            vk::PipelineStageFlags::TRANSFER,
                            vk::AccessFlags::SHADER_READ,
                            vk::AccessFlags::TRANSFER_READ,
                        );
                        let region = vk::BufferImageCopy::builder()
                            .image_subresource(vk::ImageSubresourceLayers {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                mip_level: *mip,
                                base_array_layer: 0,
                                layer_count: 1,
                            })
                            .image_extent(vk::Extent3D {
                                width: extent.width,
                                height: extent.height,
                                depth: 1,
                            })
                            .build();
                        self.device.cmd_copy_image_to_buffer(commands, source.handle(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, destination.handle(), &[region]);
                        if source.is_sampleable() {
                            image_barrier_mip(
                                &self.device,
                                commands,
                                source.handle(),
                                *mip,
                                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                                vk::PipelineStageFlags::TRANSFER,
                                vk::PipelineStageFlags::FRAGMENT_SHADER,
                                vk::AccessFlags::TRANSFER_READ,
                                vk::AccessFlags::SHADER_READ,
                            );
                            source.set_last_command_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
                        }
                    }
                    request.status.mark_finished();
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, commands: vk::CommandBuffer, acquired: &[AcquiredSurface]) -> Result<()> {
        for acquired_surface in acquired {
            let old_layout = acquired_surface.surface.render_state().current_layout();
            let Some(image) = acquired_surface.surface.with_swapchain(|s| s.images[acquired_surface.image_index as usize]) else {
                continue;
            };
            unsafe {
                image_barrier(
                    &self.device,
                    commands,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    old_layout,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    vk::AccessFlags::empty(),
                );
            }
            acquired_surface.surface.set_render_state(RenderState::ReceivedNoOutput);
        }
        Ok(())
    }

    fn submit(&self, commands: vk::CommandBuffer, acquired: &[AcquiredSurface], render_finished: &Semaphore, in_flight_fence: vk::Fence) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> = acquired.iter().map(|a| a.image_available).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = acquired.iter().map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT).collect();
        let signal_semaphores = [unsafe { render_finished.handle() }];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(std::slice::from_ref(&commands))
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.queue_submit(self.device.queue(), &[submit_info], in_flight_fence)?;
        }
        Ok(())
    }

    fn present(&self, acquired: &[AcquiredSurface], render_finished: &Semaphore) -> Result<()> {
        let wait_semaphores = [unsafe { render_finished.handle() }];
        for acquired_surface in acquired {
            if !acquired_surface.surface.has_swapchain() {
                continue;
            }
            let Some(handle) = acquired_surface.surface.with_swapchain(|s| s.handle) else { continue };
            let swapchains = [handle];
            let image_indices = [acquired_surface.image_index];
            let present_info = vk::PresentInfoKHR::builder().wait_semaphores(&wait_semaphores).swapchains(&swapchains).image_indices(&image_indices).build();
            match unsafe { self.device.swapchain_fns().queue_present(self.device.queue(), &present_info) } {
                Ok(_) => {}
                Err(vk::Result::SUBOPTIMAL_KHR) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => acquired_surface.surface.mark_needs_recreation(),
                Err(e) => return Err(Error::VkError(e).into()),
            }
        }
        Ok(())
    }
}
