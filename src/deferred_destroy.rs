//! Per-frame-slot destruction queue. Every schedule state (§3) owns one
//! [`DestructionLists`]; [`DestructionLists::drain`] implements the exact ordering
//! required by §4.1 step 5.

use anyhow::Result;

use crate::allocator::default_allocator::DefaultAllocator;
use crate::compiler::{CancelOutcome, CompilationRequest, PipelineCompilerWorker};
use crate::descriptor::pool::DescriptorSetPoolAllocator;
use crate::resource::buffer::Buffer;
use crate::resource::frame_buffer::{DetachedFrameBuffer, FrameBuffer};
use crate::resource::image::{DetachedImage, Image, ImageView};
use crate::resource::parameter_set::{DetachedParameterSet, ParameterSet};
use crate::resource::pass::Pass;
use crate::resource::pipeline::{GraphicsPipeline, PipelineParameterSetLayout};
use crate::resource::pool_ttl::DeletionQueue;
use crate::frame_allocator::FrameLifetimeAllocator;

/// A graphics pipeline queued for destruction: either already built, or still being
/// compiled in the background, in which case destruction must first resolve the
/// outstanding compilation request (§4.7's cancellation semantics).
enum PendingPipelineDestruction {
    Ready(GraphicsPipeline),
    Compiling(CompilationRequest),
}

/// Queue of graphics pipelines awaiting destruction. Kept separate from
/// [`DeletionQueue`] because each item may need to negotiate with the background
/// compiler before it can actually be dropped, which plain ttl-based retain can't
/// express.
#[derive(Default)]
struct PipelineDestructionQueue {
    items: Vec<PendingPipelineDestruction>,
}

impl PipelineDestructionQueue {
    fn push_ready(&mut self, pipeline: GraphicsPipeline) {
        self.items.push(PendingPipelineDestruction::Ready(pipeline));
    }

    fn push_compiling(&mut self, request: CompilationRequest) {
        self.items.push(PendingPipelineDestruction::Compiling(request));
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Resolve every still-compiling item against the compiler, then drop every
    /// ready item, destroying its pipeline. PENDING requests are cancelled outright;
    /// EXECUTION requests are waited out with a bounded retry sleep, since
    /// compilation is itself bounded (§4.7).
    fn drain(&mut self, compiler: &PipelineCompilerWorker) {
        let items = std::mem::take(&mut self.items);
        for item in items {
            match item {
                PendingPipelineDestruction::Ready(pipeline) => drop(pipeline),
                PendingPipelineDestruction::Compiling(request) => loop {
                    match compiler.cancel(&request) {
                        CancelOutcome::Cancelled => break,
                        CancelOutcome::AlreadyResolved => {
                            // The request finished naturally; consume its result (a
                            // successfully compiled pipeline still needs destroying).
                            if let Ok(pipeline) = request.wait() {
                                drop(pipeline);
                            }
                            break;
                        }
                        CancelOutcome::WaitAndRetry => {
                            std::thread::sleep(crate::compiler::CANCEL_RETRY_SLEEP);
                        }
                    }
                },
            }
        }
    }
}

/// Every destruction list a single frame-in-flight schedule slot owns, drained in the
/// fixed order §4.1 step 5 requires.
pub struct DestructionLists {
    parameter_sets: DeletionQueue<ParameterSet>,
    detached_parameter_sets: DeletionQueue<DetachedParameterSet>,
    pipelines: PipelineDestructionQueue,
    parameter_set_layouts: DeletionQueue<PipelineParameterSetLayout>,
    frame_buffers: DeletionQueue<FrameBuffer>,
    detached_frame_buffers: DeletionQueue<DetachedFrameBuffer>,
    passes: DeletionQueue<Pass>,
    buffers: DeletionQueue<Buffer<DefaultAllocator>>,
    frame_lifetime_allocators: DeletionQueue<FrameLifetimeAllocator>,
    detached_image_views: DeletionQueue<ImageView>,
    images: DeletionQueue<Image<DefaultAllocator>>,
    detached_images: DeletionQueue<DetachedImage<DefaultAllocator>>,
}

impl DestructionLists {
    /// `max_ttl` is `F`, the frame-in-flight count: a resource scheduled for
    /// destruction this frame is actually destroyed after `F` further `next_frame`
    /// calls, by which point the in-flight fence guarantees the GPU is done with it.
    pub fn new(max_ttl: u32) -> Self {
        Self {
            parameter_sets: DeletionQueue::new(max_ttl),
            detached_parameter_sets: DeletionQueue::new(max_ttl),
            pipelines: PipelineDestructionQueue::default(),
            parameter_set_layouts: DeletionQueue::new(max_ttl),
            frame_buffers: DeletionQueue::new(max_ttl),
            detached_frame_buffers: DeletionQueue::new(max_ttl),
            passes: DeletionQueue::new(max_ttl),
            buffers: DeletionQueue::new(max_ttl),
            frame_lifetime_allocators: DeletionQueue::new(max_ttl),
            detached_image_views: DeletionQueue::new(max_ttl),
            images: DeletionQueue::new(max_ttl),
            detached_images: DeletionQueue::new(max_ttl),
        }
    }

    pub fn schedule_parameter_set(&mut self, set: ParameterSet) {
        self.parameter_sets.push(set);
    }

    pub fn schedule_detached_parameter_set(&mut self, set: DetachedParameterSet) {
        self.detached_parameter_sets.push(set);
    }

    pub fn schedule_pipeline(&mut self, pipeline: GraphicsPipeline) {
        self.pipelines.push_ready(pipeline);
    }

    pub fn schedule_compiling_pipeline(&mut self, request: CompilationRequest) {
        self.pipelines.push_compiling(request);
    }

    pub fn schedule_parameter_set_layout(&mut self, layout: PipelineParameterSetLayout) {
        self.parameter_set_layouts.push(layout);
    }

    pub fn schedule_frame_buffer(&mut self, frame_buffer: FrameBuffer) {
        self.frame_buffers.push(frame_buffer);
    }

    pub fn schedule_detached_frame_buffer(&mut self, frame_buffer: DetachedFrameBuffer) {
        self.detached_frame_buffers.push(frame_buffer);
    }

    pub fn schedule_pass(&mut self, pass: Pass) {
        self.passes.push(pass);
    }

    pub fn schedule_buffer(&mut self, buffer: Buffer<DefaultAllocator>) {
        self.buffers.push(buffer);
    }

    pub fn schedule_frame_lifetime_allocator(&mut self, allocator: FrameLifetimeAllocator) {
        self.frame_lifetime_allocators.push(allocator);
    }

    pub fn schedule_detached_image_view(&mut self, view: ImageView) {
        self.detached_image_views.push(view);
    }

    pub fn schedule_image(&mut self, image: Image<DefaultAllocator>) {
        self.images.push(image);
    }

    pub fn schedule_detached_image(&mut self, image: DetachedImage<DefaultAllocator>) {
        self.detached_images.push(image);
    }

    /// Whether every sub-list is empty. The schedule's stack-group allocator may only
    /// be reset when this holds (§3).
    pub fn is_fully_drained(&self) -> bool {
        self.parameter_sets.is_empty()
            && self.detached_parameter_sets.is_empty()
            && self.pipelines.is_empty()
            && self.parameter_set_layouts.is_empty()
            && self.frame_buffers.is_empty()
            && self.detached_frame_buffers.is_empty()
            && self.passes.is_empty()
            && self.buffers.is_empty()
            && self.frame_lifetime_allocators.is_empty()
            && self.detached_image_views.is_empty()
            && self.images.is_empty()
            && self.detached_images.is_empty()
    }

    /// Age every list by one frame and destroy whatever has reached the end of its
    /// ttl, in the order §4.1 step 5 requires.
    pub fn drain(&mut self, descriptor_alloc: &DescriptorSetPoolAllocator, compiler: &PipelineCompilerWorker) -> Result<()> {
        let mut first_err = None;
        self.parameter_sets.drain_ready(|set| {
            if let Err(e) = descriptor_alloc.free(set) {
                first_err.get_or_insert(e);
            }
        });
        self.detached_parameter_sets.drain_ready(|set| {
            if let Err(e) = descriptor_alloc.release(set.pool, set.handle) {
                first_err.get_or_insert(e);
            }
        });
        self.pipelines.drain(compiler);
        self.parameter_set_layouts.next_frame();
        self.frame_buffers.next_frame();
        self.detached_frame_buffers.next_frame();
        self.passes.next_frame();
        self.buffers.next_frame();
        self.frame_lifetime_allocators.next_frame();
        self.detached_image_views.next_frame();
        self.images.next_frame();
        self.detached_images.next_frame();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every item regardless of ttl, used at teardown after `device_wait_idle`
    /// (§4.4). Pipelines still compiling are cancelled first so the worker thread is
    /// never left referencing a destroyed device.
    pub fn drain_all(&mut self, descriptor_alloc: &DescriptorSetPoolAllocator, compiler: &PipelineCompilerWorker) {
        self.parameter_sets.drain_ready(|set| {
            let _ = descriptor_alloc.free(set);
        });
        self.detached_parameter_sets.drain_ready(|set| {
            let _ = descriptor_alloc.release(set.pool, set.handle);
        });
        self.pipelines.drain(compiler);
        self.parameter_set_layouts.drain_all();
        self.frame_buffers.drain_all();
        self.detached_frame_buffers.drain_all();
        self.passes.drain_all();
        self.buffers.drain_all();
        self.frame_lifetime_allocators.drain_all();
        self.detached_image_views.drain_all();
        self.images.drain_all();
        self.detached_images.drain_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_report_fully_drained() {
        let lists = DestructionLists::new(2);
        assert!(lists.is_fully_drained());
    }

    #[test]
    fn ttl_counts_down_to_exact_frame_count() {
        let mut queue: DeletionQueue<u32> = DeletionQueue::new(2);
        queue.push(7);
        assert_eq!(queue.len(), 1);
        queue.next_frame();
        assert_eq!(queue.len(), 1, "one frame elapsed, ttl started at 2");
        queue.next_frame();
        assert_eq!(queue.len(), 0, "second frame elapsed, item should be destroyed");
    }
}
