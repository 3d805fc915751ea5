//! A window-attached presentation target: `VkSurfaceKHR` plus the swap-chain bound to
//! it and everything the submission pipeline needs to track about the currently
//! acquired image (§3, §4.8).

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::core::collaborators::{PlatformInterface, WindowHandle};
use crate::core::instance::VkInstance;
use crate::resource::frame_buffer::FrameBufferRequest;
use crate::sync::semaphore::Semaphore;

/// What has been written to the currently acquired surface image this frame. Drives
/// which layout a barrier's `oldLayout` should assume (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    ReceivedNoOutput,
    ReceivedDataFromFrameBuffer,
    ReceivedDataFromBlit,
    SentDataToReadBack,
}

impl RenderState {
    /// The layout the image is currently known to be in, given how it got here this
    /// frame. `ReceivedNoOutput` means it is still in whatever layout presentation
    /// left it in last time (`UNDEFINED` on first use).
    pub fn current_layout(self) -> vk::ImageLayout {
        match self {
            RenderState::ReceivedNoOutput => vk::ImageLayout::UNDEFINED,
            RenderState::ReceivedDataFromFrameBuffer => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            RenderState::ReceivedDataFromBlit => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            RenderState::SentDataToReadBack => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }
}

/// A request to blit an owned image onto the currently acquired surface image,
/// queued until the submission pipeline's blit phase runs (§4.2 step 3d).
#[derive(Debug, Clone, Copy)]
pub struct BlitRequest {
    pub source: vk::Image,
    pub source_layout: vk::ImageLayout,
    pub source_extent: vk::Extent2D,
}

/// Swap-chain state, rebuilt whenever the surface is (re)created.
pub struct SwapchainData {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub image_available: Vec<Semaphore>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub current_image_index: Option<u32>,
}

/// A window-attached presentation surface. Dereferences to the `VK_KHR_surface`
/// function table, mirroring how [`crate::core::debug::DebugMessenger`] dereferences
/// to its own extension table.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Surface {
    #[derivative(Debug = "ignore")]
    functions: ash::extensions::khr::Surface,
    handle: vk::SurfaceKHR,
    window: WindowHandle,
    present_mode_preferences: Vec<vk::PresentModeKHR>,
    needs_recreation: AtomicBool,
    render_state: Mutex<RenderState>,
    blit_requests: Mutex<Vec<BlitRequest>>,
    /// The original construction request for every frame-buffer attached to this
    /// surface, kept so swap-chain recreation can reissue them at the new extent
    /// (§4.8) instead of needing to look the frame-buffers back up by id.
    attachment_requests: Mutex<Vec<FrameBufferRequest>>,
    swapchain: Mutex<Option<SwapchainData>>,
}

unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

impl Surface {
    pub fn new(instance: &VkInstance, platform: &dyn PlatformInterface, window: WindowHandle, present_mode_preferences: Vec<vk::PresentModeKHR>) -> Result<Self> {
        let handle = platform.create_surface(instance, window)?;
        let functions = ash::extensions::khr::Surface::new(unsafe { instance.loader() }, instance);
        Ok(Self {
            functions,
            handle,
            window,
            present_mode_preferences,
            needs_recreation: AtomicBool::new(true),
            render_state: Mutex::new(RenderState::ReceivedNoOutput),
            blit_requests: Mutex::new(Vec::new()),
            attachment_requests: Mutex::new(Vec::new()),
            swapchain: Mutex::new(None),
        })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn present_mode_preferences(&self) -> &[vk::PresentModeKHR] {
        &self.present_mode_preferences
    }

    pub fn has_swapchain(&self) -> bool {
        self.swapchain.lock().is_some()
    }

    pub fn needs_recreation(&self) -> bool {
        self.needs_recreation.load(Ordering::Acquire)
    }

    pub fn mark_needs_recreation(&self) {
        self.needs_recreation.store(true, Ordering::Release);
    }

    pub fn clear_needs_recreation(&self) {
        self.needs_recreation.store(false, Ordering::Release);
    }

    pub fn render_state(&self) -> RenderState {
        *self.render_state.lock()
    }

    pub fn set_render_state(&self, state: RenderState) {
        *self.render_state.lock() = state;
    }

    pub fn push_blit_request(&self, request: BlitRequest) {
        self.blit_requests.lock().push(request);
    }

    pub fn take_blit_requests(&self) -> Vec<BlitRequest> {
        std::mem::take(&mut *self.blit_requests.lock())
    }

    pub fn remember_attachment_request(&self, request: FrameBufferRequest) {
        self.attachment_requests.lock().push(request);
    }

    pub fn attachment_requests(&self) -> Vec<FrameBufferRequest> {
        self.attachment_requests.lock().clone()
    }

    pub fn with_swapchain<R>(&self, f: impl FnOnce(&SwapchainData) -> R) -> Option<R> {
        self.swapchain.lock().as_ref().map(f)
    }

    pub(crate) fn replace_swapchain(&self, data: Option<SwapchainData>) -> Option<SwapchainData> {
        std::mem::replace(&mut *self.swapchain.lock(), data)
    }

    /// Record which swap-chain image was acquired this frame, if any (§4.1 step 1).
    pub(crate) fn set_current_image_index(&self, index: Option<u32>) {
        if let Some(data) = self.swapchain.lock().as_mut() {
            data.current_image_index = index;
        }
    }

    pub fn image_count(&self) -> usize {
        self.with_swapchain(|s| s.images.len()).unwrap_or(0)
    }
}

impl Deref for Surface {
    type Target = ash::extensions::khr::Surface;

    fn deref(&self) -> &Self::Target {
        &self.functions
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.functions.destroy_surface(self.handle, None);
        }
    }
}
