//! Vulkan loader and instance bootstrap.

use std::ffi::CStr;

use ash::vk;
use tracing::info;

use crate::error::{Result, RuntimeError, VkResultExt};

/// Identity reported to the Vulkan driver at instance creation.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Application name passed in `VkApplicationInfo`.
    pub app_name: &'static CStr,
    /// Application version (Vulkan packed format).
    pub app_version: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self { app_name: c"vkrunner", app_version: vk::make_api_version(0, 0, 1, 0) }
    }
}

/// Load the Vulkan loader and create a 1.0 instance with no layers and no
/// extensions.
pub(crate) fn create_instance(config: &InstanceConfig) -> Result<(ash::Entry, ash::Instance)> {
    let entry =
        unsafe { ash::Entry::load() }.map_err(|err| RuntimeError::Loader(err.to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(config.app_name)
        .application_version(config.app_version)
        .engine_name(c"vkrunner")
        .api_version(vk::API_VERSION_1_0);

    let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.called("vkCreateInstance")?;

    info!("Vulkan instance created (API 1.0, no layers, no extensions)");
    Ok((entry, instance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_identifies_the_engine() {
        let config = InstanceConfig::default();
        assert_eq!(config.app_name, c"vkrunner");
        assert_eq!(config.app_version, vk::make_api_version(0, 0, 1, 0));
    }
}
