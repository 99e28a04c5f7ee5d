// Vulkan instance + validation messenger
//
// Responsibilities:
// - Instance creation with the surface extensions the window needs
// - Optional Khronos validation layer
// - Debug utils messenger routed into `log`
// - Debug object names for handles

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions: the platform surface set plus debug utils and
/// physical-device-properties2.
pub fn instance_extensions(surface_extensions: &[*const c_char]) -> Vec<*const c_char> {
    let mut extensions = surface_extensions.to_vec();
    extensions.push(DebugUtils::name().as_ptr());
    extensions.push(vk::KhrGetPhysicalDeviceProperties2Fn::name().as_ptr());
    extensions
}

pub fn layer_names(enable_validation: bool) -> Vec<*const c_char> {
    if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    }
}

pub fn create_instance(
    entry: &Entry,
    app_name: &str,
    enable_validation: bool,
    surface_extensions: &[*const c_char],
) -> Result<ash::Instance> {
    let app_name_cstr = CString::new(app_name)?;
    let engine_name = c"vk-toolkit";

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extensions = instance_extensions(surface_extensions);
    let layers = layer_names(enable_validation);

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("Failed to create Vulkan instance")?;

    log::info!(
        "Created Vulkan instance ({} extensions, validation {})",
        extensions.len(),
        if enable_validation { "on" } else { "off" }
    );

    Ok(instance)
}

/// Debug utils loader and, when validation is enabled, the messenger.
pub struct DebugMessenger {
    loader: DebugUtils,
    messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl DebugMessenger {
    pub fn new(entry: &Entry, instance: &ash::Instance, enable_validation: bool) -> Result<Self> {
        let loader = DebugUtils::new(entry, instance);

        if !enable_validation {
            return Ok(Self { loader, messenger: None });
        }

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok(Self {
            loader,
            messenger: Some(messenger),
        })
    }

    /// Attach a debug name to any Vulkan handle (shows up in validation
    /// messages and capture tools).
    pub fn set_object_name<H: vk::Handle>(
        &self,
        device: &ash::Device,
        handle: H,
        name: &str,
    ) -> Result<()> {
        let name = CString::new(name)?;
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(H::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&name);

        unsafe { self.loader.set_debug_utils_object_name(device.handle(), &info) }
            .context("Failed to set debug object name")
    }

    /// Must run before the instance is destroyed.
    pub unsafe fn destroy(&mut self) {
        if let Some(messenger) = self.messenger.take() {
            self.loader.destroy_debug_utils_messenger(messenger, None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {:?}] {}", message_type, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {:?}] {}", message_type, message);
        }
        _ => {
            log::debug!("[Vulkan {:?}] {}", message_type, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_keep_surface_set_first() {
        let surface = [ash::extensions::khr::Surface::name().as_ptr()];
        let extensions = instance_extensions(&surface);

        assert_eq!(extensions.len(), 3);
        assert_eq!(extensions[0], surface[0]);
        assert!(extensions.contains(&DebugUtils::name().as_ptr()));
    }

    #[test]
    fn validation_layer_only_when_requested() {
        assert!(layer_names(false).is_empty());
        let layers = layer_names(true);
        let name = unsafe { CStr::from_ptr(layers[0]) };
        assert_eq!(name.to_str().unwrap(), "VK_LAYER_KHRONOS_validation");
    }
}
