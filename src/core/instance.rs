//! Exposes the Vulkan instance, which represents the loaded Vulkan library.

use std::ffi::CString;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::core::collaborators::PlatformInterface;
use crate::core::config::BackendConfig;
use crate::core::error::CriticalErrorHook;

/// The loaded Vulkan instance. Creating this is the first step in backend initialization,
/// and it is used to create the logical device from.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct VkInstance {
    #[derivative(Debug = "ignore")]
    entry: ash::Entry,
    #[derivative(Debug = "ignore")]
    instance: ash::Instance,
    validation_enabled: bool,
}

impl VkInstance {
    /// Initialize the Vulkan API.
    ///
    /// Failure here is a **fatal initialization error**: the Vulkan loader could not be
    /// found, or a requested layer/extension is unavailable. Both are reported through
    /// `hook` rather than returned, since the process cannot meaningfully continue
    /// without a Vulkan instance.
    pub fn new(
        config: &BackendConfig,
        platform: &dyn PlatformInterface,
        enable_validation: bool,
        hook: &dyn CriticalErrorHook,
    ) -> Arc<Self> {
        platform.register_library_usage();
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(e) => hook.report(&format!("failed to load Vulkan: {e}")),
        };
        match create_vk_instance(&entry, config, platform, enable_validation) {
            Ok(instance) => {
                #[cfg(feature = "log-objects")]
                trace!("Created new VkInstance {:p}", instance.handle());
                Arc::new(VkInstance {
                    entry,
                    instance,
                    validation_enabled: enable_validation,
                })
            }
            Err(e) => hook.report(&format!("failed to create Vulkan instance: {e}")),
        }
    }

    /// Whether validation layers were requested and successfully enabled.
    pub fn validation_enabled(&self) -> bool {
        self.validation_enabled
    }

    /// Unsafe access to the Vulkan entry point, for collaborators like the surface
    /// manager that need raw loader access.
    /// # Safety
    /// Misusing this can put the instance in an undefined state.
    pub unsafe fn loader(&self) -> &ash::Entry {
        &self.entry
    }
}

impl Drop for VkInstance {
    fn drop(&mut self) {
        #[cfg(feature = "log-objects")]
        trace!("Destroying VkInstance {:p}", self.instance.handle());
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

impl Deref for VkInstance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

fn create_vk_instance(
    entry: &ash::Entry,
    config: &BackendConfig,
    platform: &dyn PlatformInterface,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(config.application_info_name.clone())?;
    let engine_name = CString::new("vkforge")?;
    let app_info = vk::ApplicationInfo {
        api_version: vk::make_api_version(0, 1, 3, 0),
        p_application_name: app_name.as_ptr(),
        p_engine_name: engine_name.as_ptr(),
        application_version: vk::make_api_version(0, config.version_major, config.version_minor, config.version_patch),
        ..Default::default()
    };

    let mut layers = Vec::<CString>::new();
    let mut extensions: Vec<CString> = platform
        .required_instance_extensions()
        .into_iter()
        .map(CString::from)
        .collect();

    if enable_validation {
        layers.push(CString::new("VK_LAYER_KHRONOS_validation")?);
        extensions.push(ash::extensions::ext::DebugUtils::name().to_owned());
    }

    debug!("enabled instance extensions: {:?}", extensions);

    let layers_raw: Vec<*const i8> = layers.iter().map(|s| s.as_ptr()).collect();
    let extensions_raw: Vec<*const i8> = extensions.iter().map(|s| s.as_ptr()).collect();

    let instance_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_layer_names(&layers_raw)
        .enabled_extension_names(&extensions_raw)
        .build();

    Ok(unsafe { entry.create_instance(&instance_info, None)? })
}
