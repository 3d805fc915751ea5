//! Ring-style sub-allocator for short-lived staging memory (§4.5). One designated
//! instance backs every temporary upload; others may be created for other
//! frame-lifetime needs.

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::allocator::default_allocator::DefaultAllocator;
use crate::allocator::memory_type::MemoryType;
use crate::core::device::Device;
use crate::resource::buffer::{Buffer, BufferKind, BufferView};

/// One backing page. Allocations bump a cursor forward; a page is only reclaimed as a
/// whole once every allocation placed on it is old enough to be safely reused.
struct Page {
    buffer: Buffer<DefaultAllocator>,
    cursor: vk::DeviceSize,
    /// Frame index of the most recent allocation taken from this page.
    youngest_frame: u64,
}

impl Page {
    fn remaining(&self, page_size: vk::DeviceSize) -> vk::DeviceSize {
        page_size.saturating_sub(self.cursor)
    }
}

/// A page-based ring allocator. Allocations never move or get individually freed;
/// instead whole pages are recycled once old enough that every allocation on them is
/// guaranteed to be off the GPU's schedule.
pub struct FrameLifetimeAllocator {
    device: Device,
    name: String,
    page_size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    kind: BufferKind,
    location: MemoryType,
    /// `F`: an allocation's page is only recyclable once the allocator has advanced
    /// this many frames past the page's youngest allocation.
    max_ttl: u64,
    pages: Mutex<Vec<Page>>,
    free_pages: Mutex<Vec<Page>>,
}

impl FrameLifetimeAllocator {
    pub fn new(device: Device, name: impl Into<String>, page_size: vk::DeviceSize, usage: vk::BufferUsageFlags, kind: BufferKind, location: MemoryType, max_ttl: u64) -> Self {
        Self {
            device,
            name: name.into(),
            page_size,
            usage,
            kind,
            location,
            max_ttl,
            pages: Mutex::new(Vec::new()),
            free_pages: Mutex::new(Vec::new()),
        }
    }

    /// Sub-allocate `size` bytes tagged with `current_frame`. Grows a new page (or
    /// reuses a retired one) when the current page can't fit the request.
    pub fn allocate(&self, allocator: &mut DefaultAllocator, size: vk::DeviceSize, current_frame: u64) -> Result<BufferView> {
        assert!(size <= self.page_size, "frame-lifetime allocation exceeds page size");

        let mut pages = self.pages.lock();
        let needs_new_page = match pages.last() {
            Some(page) => page.remaining(self.page_size) < size,
            None => true,
        };

        if needs_new_page {
            let page = self.acquire_page(allocator)?;
            pages.push(page);
        }

        let page = pages.last_mut().expect("page just ensured present");
        let view = page.buffer.view(page.cursor, size)?;
        page.cursor += size;
        page.youngest_frame = current_frame;
        Ok(view)
    }

    fn acquire_page(&self, allocator: &mut DefaultAllocator) -> Result<Page> {
        if let Some(mut page) = self.free_pages.lock().pop() {
            page.cursor = 0;
            return Ok(page);
        }
        let buffer = Buffer::new(self.device.clone(), allocator, format!("{}-page", self.name), self.page_size, self.usage, self.location, self.kind)?;
        Ok(Page { buffer, cursor: 0, youngest_frame: 0 })
    }

    /// Retire pages whose youngest allocation is more than `F` frames old, returning
    /// them to the free list for reuse rather than destroying them (§4.1 step 6).
    pub fn retire(&self, current_frame: u64) {
        let mut pages = self.pages.lock();
        let mut free_pages = self.free_pages.lock();
        let mut i = 0;
        while i < pages.len() {
            if current_frame.saturating_sub(pages[i].youngest_frame) > self.max_ttl {
                free_pages.push(pages.remove(i));
            } else {
                i += 1;
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
