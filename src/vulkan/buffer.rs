use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use super::{
    allocator::{Allocator, MemoryLocation},
    command::QueueType,
    context::GpuContext,
};
use crate::{RendererError, Result};

/// Owning buffer with its VMA allocation.
pub struct Buffer {
    allocator: Arc<Allocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    location: MemoryLocation,
}

impl Buffer {
    pub fn new(
        allocator: Arc<Allocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        sharing_families: &[u32],
    ) -> Result<Self> {
        if size == 0 {
            return Err(RendererError::VulkanError(
                "Refusing to create a zero-sized buffer".into(),
            ));
        }

        let mut info = vk::BufferCreateInfo::default().size(size).usage(usage);
        info = if sharing_families.len() > 1 {
            info.sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(sharing_families)
        } else {
            info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let (buffer, allocation) = allocator.create_buffer(&info, location)?;

        Ok(Self {
            allocator,
            buffer,
            allocation,
            size,
            location,
        })
    }

    /// Host-visible buffer sized for `T`, used for per-frame uniforms.
    pub fn uniform<T: Pod>(allocator: Arc<Allocator>, initial: &T) -> Result<Self> {
        let mut buffer = Self::new(
            allocator,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            &[],
        )?;
        buffer.write(std::slice::from_ref(initial))?;
        Ok(buffer)
    }

    /// Uploads `data` to a device-local buffer through a transient staging
    /// buffer copied on the transfer queue.
    pub fn device_local_with_data<T: Pod>(
        ctx: &GpuContext,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Self::new(
            ctx.allocator.clone(),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &[],
        )?;
        staging.write(data)?;

        // Written by the transfer queue, read by the graphics queue.
        let families = ctx.device.families;
        let sharing = if families.transfer != families.graphics {
            vec![families.graphics, families.transfer]
        } else {
            Vec::new()
        };

        let destination = Self::new(
            ctx.allocator.clone(),
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            &sharing,
        )?;

        ctx.command_pools
            .submit_once(QueueType::Transfer, |device, cmd| unsafe {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                device.cmd_copy_buffer(cmd, staging.handle(), destination.handle(), &[region]);
            })?;

        Ok(destination)
    }

    /// Host-visible staging buffer filled with `bytes`.
    pub fn staging(allocator: Arc<Allocator>, bytes: &[u8]) -> Result<Self> {
        let mut staging = Self::new(
            allocator,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &[],
        )?;
        staging.write(bytes)?;
        Ok(staging)
    }

    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        if self.location != MemoryLocation::CpuToGpu {
            return Err(RendererError::VulkanError(
                "Cannot map a device-local buffer".into(),
            ));
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RendererError::VulkanError(format!(
                "Write of {} bytes overflows {} byte buffer",
                bytes.len(),
                self.size
            )));
        }

        self.allocator.write(&mut self.allocation, bytes)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.allocator
            .destroy_buffer(self.buffer, &mut self.allocation);
    }
}
