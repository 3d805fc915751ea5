//! The top-level entry point: owns the Vulkan instance and device, the resource
//! registry, and the frame scheduler, and exposes the operations a host application
//! calls at record time and at init/teardown.
//!
//! Field order in [`BackendSystem`] matters: Rust drops struct fields in declaration
//! order, and every resource here that destroys a Vulkan handle in its own `Drop` must
//! run before the `device`/`instance` fields that handle depends on are torn down.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use parking_lot::Mutex;

use crate::allocator::default_allocator::DefaultAllocator;
use crate::allocator::memory_type::MemoryType;
use crate::compiler::{PipelineCompilerWorker, Priority};
use crate::core::collaborators::{ApplicationSystem, PlatformInterface, WindowHandle};
use crate::core::config::{DESCRIPTOR_POOL_MIN_CAPACITY, FRAMES_IN_FLIGHT, STAGING_PAGE_SIZE};
use crate::core::config::BackendConfig;
use crate::core::debug::DebugMessenger;
use crate::core::device::Device;
use crate::core::error::{AbortOnCriticalError, CriticalErrorHook, Error};
use crate::core::instance::VkInstance;
use crate::core::physical_device::{PhysicalDevice, SURFACE_FORMAT};
use crate::descriptor::pool::DescriptorSetPoolAllocator;
use crate::frame::FrameScheduler;
use crate::frame_allocator::FrameLifetimeAllocator;
use crate::read_back::{ReadBackStatus, ReadBackTarget};
use crate::resource::buffer::{Buffer, BufferKind, BufferView};
use crate::resource::code_module::CodeModule;
use crate::resource::frame_buffer::{AttachmentRef, AttachmentTarget, AttachmentViews, BoundAttachment, FrameBuffer, FrameBufferRequest};
use crate::resource::image::{Image, ImageView};
use crate::resource::pass::{AttachmentDescription, Pass};
use crate::resource::pass_instance::PassInstance;
use crate::resource::pipeline::{GraphicsPipelineDesc, PipelineParameterSetLayout, PipelineSlot};
use crate::resource::registry::{Registry, RegistryTables};
use crate::resource::sampler::{Sampler, SamplerCache};
use crate::resource::{BufferId, FrameBufferId, ImageId, ParameterSetId, ParameterSetLayoutId, PassId, PassInstanceId, PipelineId};
use crate::schedule::{BufferFlush, BufferUpload, ImageCopy, ImageUpload, MipGeneration};
use crate::wsi::surface::{BlitRequest, Surface};
use crate::wsi::swapchain;

/// Owns every long-lived Vulkan object and drives the frame-in-flight loop. A host
/// application creates one of these at startup and calls [`BackendSystem::next_frame`]
/// once per tick.
pub struct BackendSystem {
    platform: Box<dyn PlatformInterface>,
    app_system: Option<Box<dyn ApplicationSystem>>,
    surfaces: Mutex<Vec<Arc<Surface>>>,
    image_view_cache: Mutex<HashMap<ImageId, ImageView>>,
    registry: Registry,
    sampler_cache: SamplerCache,
    descriptor_alloc: DescriptorSetPoolAllocator,
    compiler: PipelineCompilerWorker,
    frame_scheduler: FrameScheduler,
    allocator: DefaultAllocator,
    debug_messenger: Option<DebugMessenger>,
    physical: PhysicalDevice,
    device: Device,
    instance: Arc<VkInstance>,
}

impl BackendSystem {
    /// Initialize with the default critical-error policy ([`AbortOnCriticalError`]).
    pub fn new(config: BackendConfig, platform: Box<dyn PlatformInterface>, enable_validation: bool, app_system: Option<Box<dyn ApplicationSystem>>) -> Result<Self> {
        Self::with_hook(config, platform, enable_validation, app_system, &AbortOnCriticalError)
    }

    /// Initialize with a caller-supplied [`CriticalErrorHook`], for hosts that want a
    /// different fatal-error policy than aborting the process.
    pub fn with_hook(config: BackendConfig, platform: Box<dyn PlatformInterface>, enable_validation: bool, app_system: Option<Box<dyn ApplicationSystem>>, hook: &dyn CriticalErrorHook) -> Result<Self> {
        let instance = VkInstance::new(&config, platform.as_ref(), enable_validation, hook);
        let debug_messenger = if enable_validation { Some(DebugMessenger::new(unsafe { instance.loader() }, &instance)?) } else { None };

        let physical = PhysicalDevice::select(&instance, None)?;
        physical.verify_surface_format_support(&instance, SURFACE_FORMAT)?;

        let device_handle = Device::new(&instance, &physical, hook);
        let device = (*device_handle).clone();

        let allocator = DefaultAllocator::new(&instance, &device, &physical)?;
        let frame_scheduler = FrameScheduler::new(device.clone())?;

        Ok(Self {
            platform,
            app_system,
            surfaces: Mutex::new(Vec::new()),
            image_view_cache: Mutex::new(HashMap::new()),
            registry: Registry::default(),
            sampler_cache: SamplerCache::new(device.clone()),
            descriptor_alloc: DescriptorSetPoolAllocator::new(device.clone(), DESCRIPTOR_POOL_MIN_CAPACITY),
            compiler: PipelineCompilerWorker::new(),
            frame_scheduler,
            allocator,
            debug_messenger,
            physical,
            device,
            instance,
        })
    }

    // ---- surfaces -------------------------------------------------------------

    /// Create a presentation surface for `window`. The surface has no swap-chain yet;
    /// one is (re)created the first time [`BackendSystem::next_frame`] notices it is
    /// missing or outdated.
    pub fn create_surface(&self, window: WindowHandle, present_mode_preferences: Vec<vk::PresentModeKHR>) -> Result<Arc<Surface>> {
        let surface = Arc::new(Surface::new(&self.instance, self.platform.as_ref(), window, present_mode_preferences)?);
        self.surfaces.lock().push(surface.clone());
        Ok(surface)
    }

    /// Tear down a surface's swap-chain and stop tracking it. Only safe once the
    /// device is idle with respect to that surface's images (§4.8).
    pub fn destroy_surface(&self, surface: &Arc<Surface>) -> Result<()> {
        self.device.wait_idle()?;
        swapchain::destroy_swap_chain(&self.device, surface);
        self.surfaces.lock().retain(|s| !Arc::ptr_eq(s, surface));
        Ok(())
    }

    // ---- frame loop -------------------------------------------------------------

    /// Run one tick: acquire this tick's swap-chain images, submit the previous
    /// tick's recorded work, and build whatever frame-buffers just became buildable
    /// against a newly (re)created swap-chain. Returns `false` when the caller should
    /// skip recording this tick (a recoverable acquire failure).
    pub fn next_frame(&self) -> Result<bool> {
        let surfaces = self.surfaces.lock().clone();
        let progressed = self.frame_scheduler.next_frame(
            &self.instance,
            &self.physical,
            &self.device,
            &self.registry,
            &self.compiler,
            &self.descriptor_alloc,
            &surfaces,
            self.app_system.as_deref(),
        )?;

        if progressed {
            self.rebuild_pending_frame_buffers()?;
        }

        Ok(progressed)
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_scheduler.frame_number()
    }

    pub fn borrow_secondary_buffers(&self, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        self.frame_scheduler.borrow_secondary_buffers(count)
    }

    /// Rebuild every frame-buffer whose surface attachment just got a fresh
    /// swap-chain (§4.2 step 3b). First-time builds are resolved synchronously by
    /// [`BackendSystem::create_frame_buffer`] and never reach this queue; everything
    /// here carries an `existing` id to replace in place.
    fn rebuild_pending_frame_buffers(&self) -> Result<()> {
        for request in self.frame_scheduler.last_acquired_schedule().take_frame_buffer_requests() {
            let Some(id) = request.existing else {
                warn!("dropping a frame-buffer request with no target id; first-time builds go through create_frame_buffer");
                continue;
            };
            let built = self.build_frame_buffer(&request)?;
            if let Some(slot) = self.registry.lock().frame_buffers.get_mut(id) {
                *slot = built;
            }
        }
        Ok(())
    }

    // ---- frame-buffers ----------------------------------------------------------

    /// Build a frame-buffer from `pass`'s attachments now. A surface attachment
    /// requires that surface to already have a live swap-chain (true for every
    /// surface after its first successful `next_frame`); resizes are handled
    /// separately by rebuilding this same id in place.
    pub fn create_frame_buffer(&self, pass: PassId, attachments: Vec<AttachmentRef>, width: u32, height: u32, surface: Option<Arc<Surface>>) -> Result<FrameBufferId> {
        let request = FrameBufferRequest {
            pass,
            attachments,
            width,
            height,
            surface: surface.clone(),
            existing: None,
        };
        let built = self.build_frame_buffer(&request)?;
        let id = self.registry.lock().frame_buffers.insert(built);
        if let Some(surface) = surface {
            surface.remember_attachment_request(FrameBufferRequest { existing: Some(id), ..request });
        }
        Ok(id)
    }

    pub fn destroy_frame_buffer(&self, id: FrameBufferId) -> Result<()> {
        if let Some(frame_buffer) = self.registry.lock().frame_buffers.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_frame_buffer(frame_buffer);
        }
        Ok(())
    }

    fn build_frame_buffer(&self, request: &FrameBufferRequest) -> Result<FrameBuffer> {
        if request.attachments.iter().filter(|a| matches!(a, AttachmentRef::Surface)).count() > 1 {
            return Err(Error::MultipleSurfaceAttachments.into());
        }

        let tables = self.registry.lock();
        let pass_attachments = tables
            .passes
            .get(request.pass)
            .ok_or_else(|| Error::ResourceNotFound("pass".into()))?
            .attachments()
            .to_vec();

        let Some(surface) = &request.surface else {
            let mut views = AttachmentViews::default();
            for (desc, attachment) in pass_attachments.iter().zip(request.attachments.iter()) {
                if let AttachmentRef::Image(id) = attachment {
                    self.push_owned_view(&tables, *id, desc, &mut views)?;
                }
            }
            return Ok(FrameBuffer::new_single(self.device.clone(), request.pass, views, request.width, request.height));
        };

        let swapchain_views = surface
            .with_swapchain(|s| s.views.clone())
            .ok_or_else(|| anyhow::Error::from(Error::Uncategorized("surface has no swap-chain yet")))?;

        let mut instances = Vec::with_capacity(swapchain_views.len());
        for &surface_view in &swapchain_views {
            let mut views = AttachmentViews::default();
            for (desc, attachment) in pass_attachments.iter().zip(request.attachments.iter()) {
                match attachment {
                    AttachmentRef::Surface => views.color.push(BoundAttachment { view: surface_view, target: AttachmentTarget::Surface }),
                    AttachmentRef::Image(id) => self.push_owned_view(&tables, *id, desc, &mut views)?,
                }
            }
            instances.push(views);
        }
        Ok(FrameBuffer::new_per_swapchain_image(self.device.clone(), request.pass, instances, request.width, request.height, surface.clone()))
    }

    /// Fetch (creating and caching on first use) the full-mip view of an owned
    /// attachment image, appending it to `views` under the aspect its pass attachment
    /// declares. Cached per image so a frame-buffer rebuilt across ticks reuses the
    /// same `VkImageView` rather than leaking a fresh one every resize.
    fn push_owned_view(&self, tables: &RegistryTables, id: ImageId, desc: &AttachmentDescription, views: &mut AttachmentViews) -> Result<()> {
        let mut cache = self.image_view_cache.lock();
        let handle = match cache.get(&id) {
            Some(view) => view.0.handle(),
            None => {
                let image = tables.images.get(id).ok_or_else(|| Error::ResourceNotFound("image".into()))?;
                let aspect = if desc.is_depth_stencil { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
                let view = image.view_full(aspect)?;
                let handle = view.0.handle();
                cache.insert(id, view);
                handle
            }
        };
        let bound = BoundAttachment { view: handle, target: AttachmentTarget::Image(id) };
        if desc.is_depth_stencil {
            views.depth_stencil = Some(bound);
        } else {
            views.color.push(bound);
        }
        Ok(())
    }

    // ---- buffers ------------------------------------------------------------

    pub fn create_buffer(&self, name: impl Into<String>, size: vk::DeviceSize, usage: vk::BufferUsageFlags, location: MemoryType, kind: BufferKind) -> Result<BufferId> {
        let mut allocator = self.allocator.clone();
        let buffer = Buffer::new(self.device.clone(), &mut allocator, name, size, usage, location, kind)?;
        Ok(self.registry.lock().buffers.insert(buffer))
    }

    pub fn destroy_buffer(&self, id: BufferId) -> Result<()> {
        if let Some(buffer) = self.registry.lock().buffers.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_buffer(buffer);
        }
        Ok(())
    }

    pub fn push_upload(&self, upload: BufferUpload) {
        self.frame_scheduler.current_schedule().push_upload(upload);
    }

    pub fn push_flush(&self, flush: BufferFlush) {
        self.frame_scheduler.current_schedule().push_flush(flush);
    }

    // ---- images ---------------------------------------------------------------

    pub fn create_image(&self, name: impl Into<String>, width: u32, height: u32, mip_levels: u32, usage: vk::ImageUsageFlags, format: vk::Format) -> Result<ImageId> {
        let mut allocator = self.allocator.clone();
        let image = Image::new(self.device.clone(), &mut allocator, name, width, height, mip_levels, usage, format)?;
        Ok(self.registry.lock().images.insert(image))
    }

    pub fn destroy_image(&self, id: ImageId) -> Result<()> {
        if let Some(view) = self.image_view_cache.lock().remove(&id) {
            self.frame_scheduler.current_schedule().destruction().schedule_detached_image_view(view);
        }
        if let Some(image) = self.registry.lock().images.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_image(image);
        }
        Ok(())
    }

    pub fn push_image_upload(&self, upload: ImageUpload) {
        self.frame_scheduler.current_schedule().push_image_upload(upload);
    }

    pub fn push_image_copy(&self, copy: ImageCopy) {
        self.frame_scheduler.current_schedule().push_image_copy(copy);
    }

    pub fn push_mip_generation(&self, mip_gen: MipGeneration) {
        self.frame_scheduler.current_schedule().push_mip_generation(mip_gen);
    }

    pub fn schedule_read_back(&self, target: ReadBackTarget) -> ReadBackStatus {
        self.frame_scheduler.current_schedule().schedule_read_back(target)
    }

    pub fn push_blit_request(&self, surface: &Surface, request: BlitRequest) {
        surface.push_blit_request(request);
    }

    // ---- passes -----------------------------------------------------------------

    pub fn create_pass(&self, name: impl Into<String>, attachments: Vec<AttachmentDescription>) -> PassId {
        self.registry.lock().passes.insert(Pass::new(name, attachments))
    }

    pub fn destroy_pass(&self, id: PassId) -> Result<()> {
        if let Some(pass) = self.registry.lock().passes.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_pass(pass);
        }
        Ok(())
    }

    /// Declare that `pass` must run after `dependency` (§4.2 step 3c lifts this to
    /// per-instance dependencies every frame).
    pub fn add_pass_dependency(&self, pass: PassId, dependency: PassId) -> Result<()> {
        let tables = self.registry.lock();
        tables.passes.get(pass).ok_or_else(|| Error::ResourceNotFound("pass".into()))?.add_dependency(dependency);
        tables.passes.get(dependency).ok_or_else(|| Error::ResourceNotFound("pass".into()))?.add_dependant(pass);
        Ok(())
    }

    /// Register one frame's execution of `pass`, already recorded into `commands`.
    pub fn record_pass_instance(&self, pass: PassId, frame_buffer: FrameBufferId, commands: vk::CommandBuffer) -> Result<PassInstanceId> {
        let mut tables = self.registry.lock();
        tables.passes.get(pass).ok_or_else(|| Error::ResourceNotFound("pass".into()))?;
        let id = tables.pass_instances.insert(PassInstance::new(pass, frame_buffer, commands));
        tables.passes.get(pass).expect("checked above").push_instance(id);
        Ok(id)
    }

    // ---- pipelines ----------------------------------------------------------

    /// Create a pipeline slot and hand `desc` to the background compiler at the given
    /// priority. The returned id is valid immediately (§4.7); fetch its handle with
    /// [`BackendSystem::pipeline_handle`] once it's actually needed for binding.
    pub fn create_pipeline(&self, desc: GraphicsPipelineDesc, priority: Priority) -> PipelineId {
        let device = self.device.clone();
        let compiler = &self.compiler;
        self.registry.lock().pipelines.insert_with_key(move |id| {
            let request = match priority {
                Priority::Critical => compiler.submit_critical(id, device.clone(), desc),
                Priority::Active => compiler.submit_active(id, device.clone(), desc),
                Priority::Cache => compiler.submit_cache(id, device, desc),
            };
            PipelineSlot::Compiling(request)
        })
    }

    /// The pipeline and layout handles for `id`, or `None` if compilation hasn't
    /// resolved yet. Polls the slot first, absorbing a just-finished compilation.
    pub fn pipeline_handle(&self, id: PipelineId) -> Result<Option<(vk::Pipeline, vk::PipelineLayout)>> {
        let mut tables = self.registry.lock();
        let slot = tables.pipelines.get_mut(id).ok_or_else(|| Error::ResourceNotFound("pipeline".into()))?;
        slot.poll();
        if slot.compilation_failed() {
            return Err(Error::CompilationFailed(format!("{id:?}")).into());
        }
        Ok(match (unsafe { slot.handle() }, unsafe { slot.layout() }) {
            (Some(handle), Some(layout)) => Some((handle, layout)),
            _ => None,
        })
    }

    pub fn destroy_pipeline(&self, id: PipelineId) -> Result<()> {
        if let Some(slot) = self.registry.lock().pipelines.remove(id) {
            let destruction = self.frame_scheduler.current_schedule();
            match slot {
                PipelineSlot::Ready(pipeline) => destruction.destruction().schedule_pipeline(pipeline),
                PipelineSlot::Compiling(request) => destruction.destruction().schedule_compiling_pipeline(request),
            }
        }
        Ok(())
    }

    pub fn create_parameter_set_layout(&self, bindings: Vec<vk::DescriptorSetLayoutBinding>) -> Result<ParameterSetLayoutId> {
        let layout = PipelineParameterSetLayout::new(self.device.clone(), bindings)?;
        Ok(self.registry.lock().parameter_set_layouts.insert(layout))
    }

    pub fn destroy_parameter_set_layout(&self, id: ParameterSetLayoutId) -> Result<()> {
        if let Some(layout) = self.registry.lock().parameter_set_layouts.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_parameter_set_layout(layout);
        }
        Ok(())
    }

    // ---- parameter sets ---------------------------------------------------------

    pub fn create_parameter_set(&self, layout: ParameterSetLayoutId) -> Result<ParameterSetId> {
        let layout_handle = {
            let tables = self.registry.lock();
            let layout = tables.parameter_set_layouts.get(layout).ok_or_else(|| Error::ResourceNotFound("parameter set layout".into()))?;
            unsafe { layout.handle() }
        };
        let set = self.descriptor_alloc.allocate(layout_handle)?;
        Ok(self.registry.lock().parameter_sets.insert(set))
    }

    pub fn destroy_parameter_set(&self, id: ParameterSetId) -> Result<()> {
        if let Some(set) = self.registry.lock().parameter_sets.remove(id) {
            self.frame_scheduler.current_schedule().destruction().schedule_parameter_set(set);
        }
        Ok(())
    }

    // ---- code modules and samplers ------------------------------------------------

    /// Wrap a compiled shader stage. Not registry-tracked: callers typically fold
    /// these into a [`GraphicsPipelineDesc`] and drop them once the pipeline that
    /// referenced their module handles has finished compiling.
    pub fn create_code_module(&self, stage: vk::ShaderStageFlags, entry_point: impl Into<String>, code: &[u32]) -> Result<CodeModule> {
        CodeModule::new(self.device.clone(), stage, entry_point, code)
    }

    pub fn get_or_create_sampler(&self, info: vk::SamplerCreateInfo) -> Result<Arc<Sampler>> {
        self.sampler_cache.get_or_create(info)
    }

    pub fn default_sampler(&self) -> Result<Arc<Sampler>> {
        self.sampler_cache.get_or_create(
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

    // ---- frame-lifetime allocators ------------------------------------------------

    /// The single designated staging allocator backing ordinary uploads (§4.5).
    /// Registered for automatic per-tick page retirement; lives for the backend's
    /// whole lifetime rather than being explicitly destroyed.
    pub fn create_staging_allocator(&self, usage: vk::BufferUsageFlags) -> Arc<FrameLifetimeAllocator> {
        let allocator = Arc::new(FrameLifetimeAllocator::new(
            self.device.clone(),
            "staging",
            STAGING_PAGE_SIZE,
            usage,
            BufferKind::Uniform,
            MemoryType::CpuToGpu,
            FRAMES_IN_FLIGHT as u64,
        ));
        self.frame_scheduler.register_frame_allocator(allocator.clone());
        allocator
    }

    /// An allocator for some other frame-lifetime need, not auto-retired. The caller
    /// is responsible for calling `retire` itself (against [`BackendSystem::frame_number`])
    /// and eventually destroying it through [`BackendSystem::destroy_frame_lifetime_allocator`].
    pub fn create_frame_lifetime_allocator(&self, name: impl Into<String>, usage: vk::BufferUsageFlags, kind: BufferKind, location: MemoryType, max_ttl: u64) -> FrameLifetimeAllocator {
        FrameLifetimeAllocator::new(self.device.clone(), name, STAGING_PAGE_SIZE, usage, kind, location, max_ttl)
    }

    pub fn allocate_frame_lifetime(&self, allocator: &FrameLifetimeAllocator, size: vk::DeviceSize) -> Result<BufferView> {
        let mut raw_allocator = self.allocator.clone();
        allocator.allocate(&mut raw_allocator, size, self.frame_number())
    }

    pub fn destroy_frame_lifetime_allocator(&self, allocator: FrameLifetimeAllocator) {
        self.frame_scheduler.current_schedule().destruction().schedule_frame_lifetime_allocator(allocator);
    }
}

impl Drop for BackendSystem {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        for surface in self.surfaces.lock().drain(..) {
            swapchain::destroy_swap_chain(&self.device, &surface);
        }
        self.frame_scheduler.drain_all_destruction(&self.descriptor_alloc, &self.compiler);
    }
}
