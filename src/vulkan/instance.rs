use ash::{ext::debug_utils, khr::surface, vk, Entry, Instance};
use log::{debug, error, warn};
use std::ffi::CStr;

use super::surface::SurfaceProvider;
use crate::{RendererError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper that owns the global instance, optional validation
/// messenger, and the presentation surface.
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    debug_utils: Option<debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a Vulkan instance and a surface from the given provider.
    ///
    /// Fails if the provider cannot produce a presentable surface; the frame
    /// loop has nothing to render into without one.
    pub fn new<S: SurfaceProvider>(surface_provider: &S, enable_validation: bool) -> Result<Self> {
        unsafe {
            let entry = Entry::load().map_err(|e| {
                RendererError::DeviceInitFailed(format!("Failed to load Vulkan entry: {e:?}"))
            })?;

            let validation_layers = if enable_validation {
                Self::query_validation_layers(&entry)?
            } else {
                Vec::new()
            };
            let validation_enabled = !validation_layers.is_empty();

            let mut extensions = surface_provider.required_extensions();
            if validation_enabled {
                extensions.push(debug_utils::NAME.as_ptr());
            }

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Prism Renderer")
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Prism")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_2);

            let mut create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_extension_names(&extensions)
                .enabled_layer_names(&validation_layers);

            // Chained so that instance creation itself is validated.
            let mut debug_create_info =
                validation_enabled.then_some(Self::debug_messenger_create_info());
            if let Some(ref mut info) = debug_create_info {
                create_info = create_info.push_next(info);
            }

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                RendererError::DeviceInitFailed(format!("Failed to create Vulkan instance: {e:?}"))
            })?;

            let debug_utils_loader =
                validation_enabled.then(|| debug_utils::Instance::new(&entry, &instance));

            let debug_messenger = match debug_utils_loader {
                Some(ref utils) => Some(
                    utils
                        .create_debug_utils_messenger(&Self::debug_messenger_create_info(), None)
                        .map_err(|e| {
                            RendererError::DeviceInitFailed(format!(
                                "Failed to create debug messenger: {e:?}"
                            ))
                        })?,
                ),
                None => None,
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = surface_provider.create_surface(&entry, &instance)?;
            if surface == vk::SurfaceKHR::null() {
                return Err(RendererError::DeviceInitFailed(
                    "Surface provider returned no presentable surface".into(),
                ));
            }

            Ok(Self {
                entry,
                instance,
                surface_loader,
                surface,
                debug_utils: debug_utils_loader,
                debug_messenger,
            })
        }
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn query_validation_layers(entry: &Entry) -> Result<Vec<*const std::ffi::c_char>> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }.map_err(|e| {
            RendererError::DeviceInitFailed(format!(
                "Failed to enumerate instance layer properties: {e:?}"
            ))
        })?;

        let found = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));

        if found {
            Ok(vec![VALIDATION_LAYER.as_ptr()])
        } else {
            warn!("Validation layer {VALIDATION_LAYER:?} not available");
            Ok(Vec::new())
        }
    }

    fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }

            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Validation output is telemetry only; it never changes control flow.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if !callback_data.is_null() && !(*callback_data).p_message.is_null() {
        CStr::from_ptr((*callback_data).p_message)
            .to_string_lossy()
            .into_owned()
    } else {
        String::from("<null>")
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "[{message_types:?}] {message}");
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "[{message_types:?}] {message}");
    } else {
        debug!(target: "vulkan", "[{message_types:?}][{message_severity:?}] {message}");
    }

    vk::FALSE
}
