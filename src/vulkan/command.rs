use std::sync::Arc;

use ash::vk;
use log::debug;

use super::device::VulkanDevice;
use crate::{RendererError, Result};

/// Logical execution queues; each gets its own command pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Present,
    Transfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Present, QueueType::Transfer];

    fn index(self) -> usize {
        self as usize
    }
}

/// One command pool per queue type.
///
/// Lives in [`GpuContext`](super::GpuContext) instead of a global registry so
/// its lifetime is tied to the device that created it.
pub struct CommandPools {
    device: Arc<ash::Device>,
    pools: [vk::CommandPool; 3],
    queues: [vk::Queue; 3],
}

impl CommandPools {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let families = device.families;
        let family_of = |queue_type| match queue_type {
            QueueType::Graphics => families.graphics,
            QueueType::Present => families.present,
            QueueType::Transfer => families.transfer,
        };

        let mut pools = [vk::CommandPool::null(); 3];
        for queue_type in QueueType::ALL {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family_of(queue_type))
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            pools[queue_type.index()] =
                unsafe { device.device.create_command_pool(&info, None) }.map_err(|e| {
                    RendererError::DeviceInitFailed(format!(
                        "Failed to create {queue_type:?} command pool: {e:?}"
                    ))
                })?;
            debug!(
                "Created {queue_type:?} command pool on family {}",
                family_of(queue_type)
            );
        }

        Ok(Self {
            device: device.device.clone(),
            pools,
            queues: [
                device.graphics_queue,
                device.present_queue,
                device.transfer_queue,
            ],
        })
    }

    pub fn pool(&self, queue_type: QueueType) -> vk::CommandPool {
        self.pools[queue_type.index()]
    }

    pub fn queue(&self, queue_type: QueueType) -> vk::Queue {
        self.queues[queue_type.index()]
    }

    pub fn allocate(
        &self,
        queue_type: QueueType,
        level: vk::CommandBufferLevel,
    ) -> Result<CommandBuffer> {
        let pool = self.pool(queue_type);
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);
        let buffer = unsafe { self.device.allocate_command_buffers(&info) }?
            .pop()
            .ok_or_else(|| RendererError::VulkanError("No command buffer allocated".into()))?;

        Ok(CommandBuffer {
            device: self.device.clone(),
            pool,
            buffer,
            level,
        })
    }

    /// Records `record` into a throwaway buffer, submits it and blocks until
    /// the queue is idle.
    pub fn submit_once<F>(&self, queue_type: QueueType, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let command = self.allocate(queue_type, vk::CommandBufferLevel::PRIMARY)?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(command.handle(), &begin_info)?;
            record(&self.device, command.handle());
            self.device.end_command_buffer(command.handle())?;

            let buffers = [command.handle()];
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            let queue = self.queue(queue_type);
            self.device
                .queue_submit(queue, &[submit], vk::Fence::null())?;
            self.device.queue_wait_idle(queue)?;
        }

        Ok(())
    }
}

impl Drop for CommandPools {
    fn drop(&mut self) {
        unsafe {
            for pool in self.pools {
                self.device.destroy_command_pool(pool, None);
            }
        }
    }
}

/// Owning command buffer, returned to its pool on drop.
pub struct CommandBuffer {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
}

impl CommandBuffer {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
        }?;
        Ok(())
    }

    /// Begins a primary buffer for a single submission.
    pub fn begin_primary(&self) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.buffer, &info) }?;
        Ok(())
    }

    /// Begins a secondary buffer that continues `render_pass` inside `framebuffer`.
    pub fn begin_secondary(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
    ) -> Result<()> {
        let inheritance = vk::CommandBufferInheritanceInfo::default()
            .render_pass(render_pass)
            .subpass(0)
            .framebuffer(framebuffer);
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance);
        unsafe { self.device.begin_command_buffer(self.buffer, &info) }?;
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.buffer) }?;
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &[self.buffer]) };
    }
}
