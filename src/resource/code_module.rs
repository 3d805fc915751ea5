//! Opaque shader code modules consumed by the pipeline compiler.
//!
//! Shader reflection and cross-compilation are out of scope; a module is whatever
//! binary blob the caller already compiled, tagged with the stage it targets.

use anyhow::Result;
use ash::vk;

use crate::core::device::Device;

/// A single compiled shader stage. The bytes are opaque to this crate: supplying a
/// SPIR-V compiler or cross-compilation pipeline is the caller's responsibility.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CodeModule {
    #[derivative(Debug = "ignore")]
    device: Device,
    handle: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: String,
}

impl CodeModule {
    pub fn new(device: Device, stage: vk::ShaderStageFlags, entry_point: impl Into<String>, code: &[u32]) -> Result<Self> {
        let handle = unsafe { device.create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(code).build(), None)? };
        Ok(Self {
            device,
            handle,
            stage,
            entry_point: entry_point.into(),
        })
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// # Safety
    /// The caller must not destroy this handle directly or use it after `self` drops.
    pub unsafe fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for CodeModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}
