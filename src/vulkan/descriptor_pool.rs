use std::sync::Arc;

use ash::vk;
use log::info;

use super::descriptor_layout::DescriptorSetLayout;
use crate::{RendererError, Result};

/// Fixed-capacity descriptor pool shared by every pass and asset.
///
/// Passes allocate from it but never create their own.
pub struct DescriptorPool {
    device: Arc<ash::Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<ash::Device>,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);

        let pool = unsafe { device.create_descriptor_pool(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create descriptor pool: {e}"))
        })?;

        info!("Descriptor pool created: {max_sets} sets, {} pool sizes", sizes.len());

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSet> {
        let layouts = [layout.handle()];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe { self.device.allocate_descriptor_sets(&info) }
            .map_err(|e| {
                RendererError::VulkanError(format!("Descriptor set allocation failed: {e}"))
            })?
            .pop()
            .ok_or_else(|| RendererError::VulkanError("No descriptor set allocated".into()))?;

        Ok(DescriptorSet {
            device: self.device.clone(),
            pool: self.pool,
            set,
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Descriptor set returned to its pool on drop.
///
/// Must be dropped before the [`DescriptorPool`] it came from.
pub struct DescriptorSet {
    device: Arc<ash::Device>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn write(&self) -> DescriptorWriter<'_> {
        DescriptorWriter {
            set: self,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.free_descriptor_sets(self.pool, &[self.set]);
        }
    }
}

/// Collects buffer/image writes for one set and submits them together.
pub struct DescriptorWriter<'a> {
    set: &'a DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorImageInfo)>,
}

impl DescriptorWriter<'_> {
    pub fn uniform(mut self, binding: u32, buffer: vk::Buffer, range: vk::DeviceSize) -> Self {
        self.buffers.push((
            binding,
            vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(range),
        ));
        self
    }

    pub fn sampled_image(mut self, binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        self.images.push((
            binding,
            vk::DescriptorImageInfo::default()
                .image_view(view)
                .sampler(sampler)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        ));
        self
    }

    pub fn submit(self) {
        let mut writes = Vec::with_capacity(self.buffers.len() + self.images.len());

        for (binding, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }

        for (binding, info) in &self.images {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }

        unsafe { self.set.device.update_descriptor_sets(&writes, &[]) };
    }
}
