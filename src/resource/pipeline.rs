//! Graphics pipelines and their parameter-set (descriptor-set) layouts.

use ash::vk;

use crate::core::device::Device;
use crate::resource::code_module::CodeModule;

/// A `VkDescriptorSetLayout`, describing the bindings of one parameter set.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PipelineParameterSetLayout {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl PipelineParameterSetLayout {
    pub fn new(device: Device, bindings: Vec<vk::DescriptorSetLayoutBinding>) -> anyhow::Result<Self> {
        let handle = unsafe { device.create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings).build(), None)? };
        Ok(Self { device, handle, bindings })
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for PipelineParameterSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// Everything needed to compile a graphics pipeline: code modules, parameter-set
/// layouts and fixed-function state. Carried by a compilation request rather than
/// being re-derived from a live pipeline, since compilation happens off-thread.
pub struct GraphicsPipelineDesc {
    pub name: String,
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule, String)>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub cull_mode: vk::CullModeFlags,
}

impl GraphicsPipelineDesc {
    pub fn from_modules(name: impl Into<String>, modules: &[CodeModule]) -> Self {
        let stages = modules
            .iter()
            .map(|m| (m.stage(), unsafe { m.handle() }, m.entry_point().to_owned()))
            .collect();
        Self {
            name: name.into(),
            stages,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            color_formats: Vec::new(),
            depth_format: None,
            cull_mode: vk::CullModeFlags::BACK,
        }
    }
}

/// A fully built graphics pipeline. Reaching this state means the backing compilation
/// request resolved to SUCCESS (§4.7); a pipeline that failed compilation is never
/// constructed, and callers instead observe `Error::CompilationFailed`.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct GraphicsPipeline {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    name: String,
}

impl GraphicsPipeline {
    /// Compile synchronously. Invoked by the pipeline compiler worker, never directly
    /// on the caller's thread (§4.7).
    pub fn compile(device: Device, desc: &GraphicsPipelineDesc) -> anyhow::Result<Self> {
        let layout = unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&desc.set_layouts)
                    .push_constant_ranges(&desc.push_constant_ranges)
                    .build(),
                None,
            )?
        };

        let entry_points: Vec<std::ffi::CString> = desc.stages.iter().map(|(_, _, entry)| std::ffi::CString::new(entry.as_str()).unwrap()).collect();
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .zip(entry_points.iter())
            .map(|((stage, module, _), entry)| vk::PipelineShaderStageCreateInfo::builder().stage(*stage).module(*module).name(entry).build())
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes)
            .build();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk::PrimitiveTopology::TRIANGLE_LIST).build();
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1).build();
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0)
            .build();
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1).build();
        let blend_attachments = vec![
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .build();
            desc.color_formats.len().max(1)
        ];
        let blend_state = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments).build();
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states).build();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS)
            .build();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED))
            .build();

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering_info)
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .build();

        let handle = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
                .map_err(|(_, e)| anyhow::Error::from(crate::core::error::Error::VkError(e)))?
                .into_iter()
                .next()
                .expect("create_graphics_pipelines returned no pipelines")
        };

        Ok(Self {
            device,
            handle,
            layout,
            name: desc.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub unsafe fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// A pipeline registry slot: either still compiling in the background or ready to
/// bind. A [`crate::resource::PipelineId`] is valid as soon as the slot is created,
/// before compilation resolves (§4.7), so callers can record pass instances against
/// it and only need to actually fetch the handle once they bind the pipeline.
pub enum PipelineSlot {
    Compiling(crate::compiler::CompilationRequest),
    Ready(GraphicsPipeline),
}

impl PipelineSlot {
    /// If still compiling, check whether the request has resolved and absorb the
    /// result in place; a failed compilation leaves the slot `Compiling` forever and
    /// is reported to the caller through [`crate::core::error::Error::CompilationFailed`]
    /// the next time a handle is requested.
    pub fn poll(&mut self) {
        if let PipelineSlot::Compiling(request) = self {
            match request.state() {
                crate::compiler::CompilationState::Success | crate::compiler::CompilationState::Failure => {
                    if let Ok(pipeline) = request.wait() {
                        *self = PipelineSlot::Ready(pipeline);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineSlot::Ready(_))
    }

    /// `true` once `poll` has observed [`crate::compiler::CompilationState::Failure`]
    /// and so left this slot permanently `Compiling` with no further transition coming.
    pub fn compilation_failed(&self) -> bool {
        match self {
            PipelineSlot::Compiling(request) => request.state() == crate::compiler::CompilationState::Failure,
            PipelineSlot::Ready(_) => false,
        }
    }

    /// # Safety
    /// The caller must not destroy the returned handle or use it after the owning
    /// slot is dropped.
    pub unsafe fn handle(&self) -> Option<vk::Pipeline> {
        match self {
            PipelineSlot::Ready(pipeline) => Some(pipeline.handle()),
            PipelineSlot::Compiling(_) => None,
        }
    }

    pub unsafe fn layout(&self) -> Option<vk::PipelineLayout> {
        match self {
            PipelineSlot::Ready(pipeline) => Some(pipeline.layout()),
            PipelineSlot::Compiling(_) => None,
        }
    }
}
