use std::sync::Arc;

use ash::vk;

use crate::Result;

/// Owning CPU-observable fence.
pub struct Fence {
    device: Arc<ash::Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Frame fences start signaled so the first wait on a slot returns at once.
    pub fn new(device: Arc<ash::Device>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence =
            unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }?;
        Ok(Self { device, fence })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    pub fn wait(&self) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, u64::MAX) }?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }?;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) };
    }
}

/// Owning GPU-side semaphore.
pub struct Semaphore {
    device: Arc<ash::Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        let semaphore =
            unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }?;
        Ok(Self { device, semaphore })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}
