//! Wrapper around `VkImage` and `VkImageView` objects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::allocator::memory_type::MemoryType;
use crate::allocator::traits::{Allocation, Allocator};
use crate::core::device::Device;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// Abstraction over a [`VkImage`](vk::Image), coupled with its memory allocation and the
/// layout the submission pipeline last transitioned it to. Swap-chain images are
/// represented the same way with `memory: None` since the OS owns their backing store.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Image<A: Allocator> {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Image,
    #[derivative(Debug = "ignore")]
    memory: Option<A::Allocation>,
    format: vk::Format,
    size: vk::Extent2D,
    mip_levels: u32,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    /// Layout the last recorded command left this image in; read by the submission
    /// pipeline to derive barrier `oldLayout` without re-querying Vulkan state.
    last_command_layout: Mutex<vk::ImageLayout>,
    name: String,
}

unsafe impl<A: Allocator> Send for Image<A> {}
unsafe impl<A: Allocator> Sync for Image<A> {}

/// A `VkImageView`, reference counted so it can outlive a single borrow of the owning
/// image the way [`ImageView`] does in the teacher's design.
#[derive(Derivative)]
#[derivative(Debug, Hash, PartialEq, Eq)]
pub struct ImgView {
    #[derivative(Debug = "ignore", Hash = "ignore", PartialEq = "ignore")]
    device: Device,
    handle: vk::ImageView,
    image: vk::Image,
    base_mip: u32,
    mip_count: u32,
    id: u64,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct ImageView(pub Arc<ImgView>);

unsafe impl Send for ImageView {}
unsafe impl Sync for ImageView {}

impl<A: Allocator> Image<A> {
    pub fn new(
        device: Device,
        allocator: &mut A,
        name: impl Into<String>,
        width: u32,
        height: u32,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        format: vk::Format,
    ) -> Result<Self> {
        let name = name.into();
        let handle = unsafe {
            device.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format)
                    .extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    })
                    .mip_levels(mip_levels)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .build(),
                None,
            )?
        };
        #[cfg(feature = "log-objects")]
        trace!("created image '{name}' ({width}x{height}, {mip_levels} mips)");

        let requirements = unsafe { device.get_image_memory_requirements(handle) };
        let memory = allocator.allocate(&name, &requirements, MemoryType::GpuOnly)?;
        unsafe { device.bind_image_memory(handle, memory.memory(), memory.offset())? };

        Ok(Self {
            device,
            handle,
            memory: Some(memory),
            format,
            size: vk::Extent2D { width, height },
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
            last_command_layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            name,
        })
    }

    /// Wrap a swap-chain-owned image. `memory` stays `None`; [`Drop`] will not destroy
    /// the handle.
    pub fn from_swapchain_image(device: Device, handle: vk::Image, format: vk::Format, size: vk::Extent2D, name: impl Into<String>) -> Self {
        Self {
            device,
            handle,
            memory: None,
            format,
            size,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            last_command_layout: Mutex::new(vk::ImageLayout::UNDEFINED),
            name: name.into(),
        }
    }

    pub fn view(&self, base_mip: u32, mip_count: u32, aspect: vk::ImageAspectFlags) -> Result<ImageView> {
        let handle = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(self.handle)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: base_mip,
                        level_count: mip_count,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .build(),
                None,
            )?
        };
        Ok(ImageView(Arc::new(ImgView {
            device: self.device.clone(),
            handle,
            image: self.handle,
            base_mip,
            mip_count,
            id: NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed),
        })))
    }

    pub fn view_full(&self, aspect: vk::ImageAspectFlags) -> Result<ImageView> {
        self.view(0, self.mip_levels, aspect)
    }

    pub fn last_command_layout(&self) -> vk::ImageLayout {
        *self.last_command_layout.lock()
    }

    pub fn set_last_command_layout(&self, layout: vk::ImageLayout) {
        *self.last_command_layout.lock() = layout;
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn size(&self) -> vk::Extent2D {
        self.size
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    pub fn is_sampleable(&self) -> bool {
        self.usage.contains(vk::ImageUsageFlags::SAMPLED)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Detach: keep the underlying `VkImage` and its allocation scheduled for
    /// destruction while releasing this wrapper (§3's "detached" resource state).
    /// Swap-chain-owned images (`memory: None`) cannot be detached since there is
    /// nothing for the destruction queue to free.
    pub fn into_detached(self) -> Option<DetachedImage<A>> {
        if self.memory.is_none() {
            return None;
        }
        let this = std::mem::ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each field is read out of it exactly once.
        unsafe {
            Some(DetachedImage {
                device: std::ptr::read(&this.device),
                handle: this.handle,
                memory: std::ptr::read(&this.memory).expect("checked Some above"),
            })
        }
    }
}

impl<A: Allocator> Drop for Image<A> {
    fn drop(&mut self) {
        if self.memory.is_some() {
            #[cfg(feature = "log-objects")]
            trace!("destroying image '{}'", self.name);
            unsafe {
                self.device.destroy_image(self.handle, None);
            }
        }
    }
}

/// An image whose `VkImage` handle and allocation remain scheduled for destruction
/// but whose wrapper has already been released by the caller.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DetachedImage<A: Allocator> {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Image,
    #[derivative(Debug = "ignore")]
    memory: A::Allocation,
}

unsafe impl<A: Allocator> Send for DetachedImage<A> {}

impl<A: Allocator> Drop for DetachedImage<A> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.handle, None);
        }
    }
}

impl ImgView {
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn base_mip(&self) -> u32 {
        self.base_mip
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }
}

impl Drop for ImgView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.handle, None);
        }
    }
}
