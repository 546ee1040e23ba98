use ash::vk;
use vk_mem::Alloc;

use super::{device::VulkanDevice, instance::VulkanInstance};
use crate::{RendererError, Result};

/// Where an allocation should live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local; filled through a staging copy.
    GpuOnly,
    /// Host-visible and coherent; written directly by the CPU.
    CpuToGpu,
}

impl MemoryLocation {
    fn create_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        }
    }
}

/// Device memory allocator backed by VMA.
pub struct Allocator {
    inner: vk_mem::Allocator,
}

impl Allocator {
    pub fn new(instance: &VulkanInstance, device: &VulkanDevice) -> Result<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            instance.instance(),
            &device.device,
            device.physical_device,
        );

        let inner = unsafe { vk_mem::Allocator::new(create_info) }.map_err(|e| {
            RendererError::DeviceInitFailed(format!("Failed to create memory allocator: {e:?}"))
        })?;

        Ok(Self { inner })
    }

    pub(crate) fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        unsafe { self.inner.create_buffer(info, &location.create_info()) }.map_err(|e| {
            RendererError::VulkanError(format!(
                "Failed to allocate {} byte buffer: {e:?}",
                info.size
            ))
        })
    }

    pub(crate) fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
    ) -> Result<(vk::Image, vk_mem::Allocation)> {
        unsafe { self.inner.create_image(info, &location.create_info()) }.map_err(|e| {
            RendererError::VulkanError(format!(
                "Failed to allocate {}x{} image: {e:?}",
                info.extent.width, info.extent.height
            ))
        })
    }

    /// Copies `bytes` into a host-visible allocation.
    pub(crate) fn write(&self, allocation: &mut vk_mem::Allocation, bytes: &[u8]) -> Result<()> {
        unsafe {
            let mapped = self.inner.map_memory(allocation)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped, bytes.len());
            self.inner.unmap_memory(allocation);
        }
        Ok(())
    }

    pub(crate) fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        unsafe { self.inner.destroy_buffer(buffer, allocation) };
    }

    pub(crate) fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        unsafe { self.inner.destroy_image(image, allocation) };
    }
}
