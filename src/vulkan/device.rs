use std::collections::BTreeSet;
use std::ffi::c_char;
use std::sync::Arc;

use ash::{khr::swapchain, vk};
use log::{info, warn};

use super::instance::VulkanInstance;
use crate::{config::Msaa, RendererError, Result};

/// Queue family indices for the three logical execution queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct family indices, used for queue creation and concurrent sharing.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present, self.transfer].into();
        set.into_iter().collect()
    }
}

/// Picks queue families from a device's family list.
///
/// Prefers a dedicated transfer family (transfer without graphics) so uploads
/// can overlap rendering, falling back to the graphics family.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let has = |props: &vk::QueueFamilyProperties, flags: vk::QueueFlags| {
        props.queue_count > 0 && props.queue_flags.contains(flags)
    };

    let graphics = families
        .iter()
        .position(|f| has(f, vk::QueueFlags::GRAPHICS))? as u32;

    let present = if supports_present(graphics) {
        graphics
    } else {
        (0..families.len() as u32).find(|&index| supports_present(index))?
    };

    let transfer = families
        .iter()
        .position(|f| {
            has(f, vk::QueueFlags::TRANSFER) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|index| index as u32)
        .unwrap_or(graphics);

    Some(QueueFamilies {
        graphics,
        present,
        transfer,
    })
}

/// Ranks device types; discrete GPUs win.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    }
}

/// Logical device plus the queues the renderer submits to.
pub struct VulkanDevice {
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Select the best physical device that can render and present to the
    /// instance's surface, then create the logical device.
    pub fn new(instance: &VulkanInstance) -> Result<Self> {
        let vk_instance = instance.instance();
        let physical_devices = unsafe { vk_instance.enumerate_physical_devices() }.map_err(|e| {
            RendererError::DeviceInitFailed(format!("Failed to enumerate physical devices: {e:?}"))
        })?;

        let (physical_device, families, properties) = physical_devices
            .into_iter()
            .filter_map(|pd| {
                let properties = unsafe { vk_instance.get_physical_device_properties(pd) };
                if !Self::supports_swapchain(instance, pd) {
                    return None;
                }
                let family_props =
                    unsafe { vk_instance.get_physical_device_queue_family_properties(pd) };
                let families = select_queue_families(&family_props, |index| unsafe {
                    instance
                        .surface_loader()
                        .get_physical_device_surface_support(pd, index, instance.surface())
                        .unwrap_or(false)
                })?;
                Some((pd, families, properties))
            })
            .max_by_key(|(_, _, properties)| device_type_score(properties.device_type))
            .ok_or_else(|| {
                RendererError::DeviceInitFailed(
                    "No GPU supports graphics, presentation and swapchains".into(),
                )
            })?;

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("Selected GPU: {name} ({:?}) families {families:?}", properties.device_type);

        let priorities = [1.0_f32];
        let queue_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions: [*const c_char; 1] = [swapchain::NAME.as_ptr()];
        let supported_features = unsafe { vk_instance.get_physical_device_features(physical_device) };
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported_features.sampler_anisotropy == vk::TRUE);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { vk_instance.create_device(physical_device, &create_info, None) }
            .map_err(|e| {
                RendererError::DeviceInitFailed(format!("Failed to create logical device: {e:?}"))
            })?;

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };

        Ok(Self {
            physical_device,
            device: Arc::new(device),
            families,
            graphics_queue,
            present_queue,
            transfer_queue,
            properties,
        })
    }

    fn supports_swapchain(instance: &VulkanInstance, pd: vk::PhysicalDevice) -> bool {
        let extensions =
            match unsafe { instance.instance().enumerate_device_extension_properties(pd) } {
                Ok(extensions) => extensions,
                Err(e) => {
                    warn!("Skipping device, extension query failed: {e:?}");
                    return false;
                }
            };

        extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == swapchain::NAME))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// Counts usable for a framebuffer with both color and depth.
    pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts
    }
}

const SAMPLE_COUNTS: [vk::SampleCountFlags; 7] = [
    vk::SampleCountFlags::TYPE_64,
    vk::SampleCountFlags::TYPE_32,
    vk::SampleCountFlags::TYPE_16,
    vk::SampleCountFlags::TYPE_8,
    vk::SampleCountFlags::TYPE_4,
    vk::SampleCountFlags::TYPE_2,
    vk::SampleCountFlags::TYPE_1,
];

/// Highest supported count not above the request.
pub fn select_sample_count(msaa: Msaa, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    let limit = match msaa {
        Msaa::Disabled => return vk::SampleCountFlags::TYPE_1,
        Msaa::Maximum => u32::MAX,
        Msaa::Samples(count) => count,
    };
    SAMPLE_COUNTS
        .into_iter()
        .find(|&count| count.as_raw() <= limit && supported.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let selected = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(selected.graphics, 0);
        assert_eq!(selected.present, 0);
        assert_eq!(selected.transfer, 1);
        assert_eq!(selected.unique(), vec![0, 1]);
    }

    #[test]
    fn falls_back_to_graphics_for_transfer() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let selected = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(selected.transfer, selected.graphics);
        assert_eq!(selected.unique(), vec![0]);
    }

    #[test]
    fn finds_separate_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        let selected = select_queue_families(&families, |index| index == 1).unwrap();
        assert_eq!(selected.graphics, 0);
        assert_eq!(selected.present, 1);
    }

    #[test]
    fn rejects_devices_without_graphics_or_present() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(select_queue_families(&compute_only, |_| true).is_none());

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        assert!(select_queue_families(&graphics, |_| false).is_none());
    }

    #[test]
    fn sample_count_is_clamped_to_device_support() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;

        assert_eq!(
            select_sample_count(Msaa::Maximum, supported),
            vk::SampleCountFlags::TYPE_8
        );
        assert_eq!(
            select_sample_count(Msaa::Samples(4), supported),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            select_sample_count(Msaa::Samples(16), supported),
            vk::SampleCountFlags::TYPE_8
        );
        assert_eq!(
            select_sample_count(Msaa::Disabled, supported),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            select_sample_count(Msaa::Maximum, vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn discrete_gpus_rank_first() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }
}
