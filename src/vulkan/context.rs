use std::sync::Arc;

use ash::vk;
use log::info;

use super::{
    allocator::Allocator, command::CommandPools, device::VulkanDevice, instance::VulkanInstance,
    surface::SurfaceProvider,
};
use crate::Result;

/// Device-bound state shared by every GPU component.
///
/// Built once at startup and passed by reference; there is no global registry.
/// Field order is drop order: pools and allocator go before the device, the
/// device before the instance.
pub struct GpuContext {
    pub command_pools: CommandPools,
    pub allocator: Arc<Allocator>,
    pub device: VulkanDevice,
    pub instance: VulkanInstance,
}

impl GpuContext {
    pub fn new<S: SurfaceProvider>(surface_provider: &S, enable_validation: bool) -> Result<Self> {
        let instance = VulkanInstance::new(surface_provider, enable_validation)?;
        let device = VulkanDevice::new(&instance)?;
        let allocator = Arc::new(Allocator::new(&instance, &device)?);
        let command_pools = CommandPools::new(&device)?;

        info!("GPU context ready (validation: {enable_validation})");

        Ok(Self {
            command_pools,
            allocator,
            device,
            instance,
        })
    }

    pub fn raw_device(&self) -> &Arc<ash::Device> {
        &self.device.device
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Whether `format` can be the source and destination of linear blits.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.instance
                .instance()
                .get_physical_device_format_properties(self.device.physical_device, format)
        };
        properties.optimal_tiling_features.contains(
            vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
        )
    }
}
