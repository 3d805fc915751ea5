//! Frame-buffer wrappers, including the multi-instance case required when a
//! surface attachment is present (one attachment-view bundle per swap-chain image).
//!
//! Pipelines in this crate are compiled against `VK_KHR_dynamic_rendering`
//! (`resource::pipeline::GraphicsPipeline::compile`), so a "frame-buffer" here is a
//! named bundle of attachment image views fed to `vkCmdBeginRendering`, not a
//! `VkRenderPass`-bound `VkFramebuffer` object. Nothing Vulkan-owned lives in this
//! wrapper: the views themselves belong to the attachments' `Image`/swap-chain
//! registrations and are freed through those lifetimes.

use std::sync::Arc;

use ash::vk;

use crate::core::device::Device;
use crate::resource::{FrameBufferId, ImageId, PassId};
use crate::wsi::surface::Surface;

/// What a bound attachment view is backed by, so the submission pipeline knows where
/// to read the current layout from and how to barrier it before and after rendering.
#[derive(Debug, Clone, Copy)]
pub enum AttachmentTarget {
    Image(ImageId),
    Surface,
}

/// One attachment view plus enough information to barrier the image it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct BoundAttachment {
    pub view: vk::ImageView,
    pub target: AttachmentTarget,
}

/// One instance's worth of attachment views, ready for `vk::RenderingInfo`.
#[derive(Debug, Clone, Default)]
pub struct AttachmentViews {
    pub color: Vec<BoundAttachment>,
    pub depth_stencil: Option<BoundAttachment>,
}

/// One attachment of a frame-buffer-creation request: either an owned image or the
/// designated surface slot, by index into the request's attachment list.
#[derive(Debug, Clone)]
pub enum AttachmentRef {
    Image(ImageId),
    Surface,
}

/// A request to build a frame-buffer, queued until every attachment it names is ready
/// (§4.2 step 3b).
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct FrameBufferRequest {
    pub pass: PassId,
    pub attachments: Vec<AttachmentRef>,
    pub width: u32,
    pub height: u32,
    /// The surface an `AttachmentRef::Surface` attachment binds to, if any. Carried on
    /// the request itself rather than looked up again, since a request may outlive the
    /// loop that discovered it (re-queued across ticks while a swap-chain is still
    /// being (re)created).
    #[derivative(Debug = "ignore")]
    pub surface: Option<Arc<Surface>>,
    /// Set when this request is a swap-chain-recreation rebuild of a frame-buffer that
    /// already has an id; the backend replaces that entry in place instead of minting
    /// a new one. `None` for a first-time build, which is always resolved synchronously
    /// against an already-live swap-chain and so never needs to round-trip the queue.
    pub existing: Option<FrameBufferId>,
}

/// A built frame-buffer: either a single attachment-view bundle, or one per
/// swap-chain image when a surface attachment is present; [`FrameBuffer::instance`]
/// selects which to bind at record time.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FrameBuffer {
    #[derivative(Debug = "ignore")]
    device: Device,
    pass: PassId,
    instances: Vec<AttachmentViews>,
    width: u32,
    height: u32,
    has_surface_attachment: bool,
    /// The surface a swap-chain-backed frame-buffer's instances are indexed by. `None`
    /// for an owned-image-only frame-buffer, which always has exactly one instance.
    surface: Option<Arc<Surface>>,
}

impl FrameBuffer {
    pub fn new_single(device: Device, pass: PassId, views: AttachmentViews, width: u32, height: u32) -> Self {
        Self {
            device,
            pass,
            instances: vec![views],
            width,
            height,
            has_surface_attachment: false,
            surface: None,
        }
    }

    pub fn new_per_swapchain_image(device: Device, pass: PassId, instances: Vec<AttachmentViews>, width: u32, height: u32, surface: Arc<Surface>) -> Self {
        Self {
            device,
            pass,
            instances,
            width,
            height,
            has_surface_attachment: true,
            surface: Some(surface),
        }
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn has_surface_attachment(&self) -> bool {
        self.has_surface_attachment
    }

    pub fn surface(&self) -> Option<&Arc<Surface>> {
        self.surface.as_ref()
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// The swap-chain image index acquired this tick for this frame-buffer's surface
    /// (§4.1 step 1), or `None` for a frame-buffer with no surface attachment.
    pub fn current_swapchain_image_index(&self) -> Option<u32> {
        self.surface.as_ref().and_then(|s| s.with_swapchain(|sc| sc.current_image_index)).flatten()
    }

    /// The attachment views to bind for the given swap-chain image index.
    /// `instance_index` is ignored (always 0) for single-instance frame-buffers.
    pub fn instance(&self, instance_index: usize) -> &AttachmentViews {
        if self.has_surface_attachment {
            &self.instances[instance_index % self.instances.len()]
        } else {
            &self.instances[0]
        }
    }

    /// [`Self::instance`] selected by [`Self::current_swapchain_image_index`],
    /// defaulting to 0 when this frame-buffer has no surface attachment or no image
    /// has been acquired yet.
    pub fn current_instance(&self) -> &AttachmentViews {
        self.instance(self.current_swapchain_image_index().unwrap_or(0) as usize)
    }

    /// Detach: this wrapper owns no Vulkan handles of its own (its views belong to
    /// the attachment images), so detaching is just a representation change that lets
    /// the caller drop their reference while the attachment images remain live on
    /// whatever schedule already governs them (§3's "detached" resource state).
    pub fn into_detached(self) -> DetachedFrameBuffer {
        DetachedFrameBuffer { _private: () }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let _ = &self.device;
    }
}

/// A frame-buffer whose wrapper has been released by the caller (§3's "detached"
/// resource state). Holds nothing: a frame-buffer under dynamic rendering owns no
/// Vulkan object beyond the attachment views, which are scheduled independently.
pub struct DetachedFrameBuffer {
    _private: (),
}
