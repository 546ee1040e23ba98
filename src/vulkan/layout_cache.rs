use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::descriptor_layout::{BindingShape, DescriptorSetLayout};
use crate::Result;

/// Deduplicates descriptor set layouts by structural equality of their shape.
///
/// Callers hold `Arc`s, so a layout stays alive for as long as any pass uses
/// it even after [`destroy_all`](Self::destroy_all) empties the cache.
pub struct SetLayoutCache<L = DescriptorSetLayout> {
    layouts: HashMap<BindingShape, Arc<L>>,
}

impl<L> Default for SetLayoutCache<L> {
    fn default() -> Self {
        Self {
            layouts: HashMap::new(),
        }
    }
}

impl<L> SetLayoutCache<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached layout for `shape`, creating it with `create` on a miss.
    pub fn get_or_create_with<F>(&mut self, shape: &BindingShape, create: F) -> Result<Arc<L>>
    where
        F: FnOnce(&BindingShape) -> Result<L>,
    {
        if let Some(layout) = self.layouts.get(shape) {
            return Ok(layout.clone());
        }

        let layout = Arc::new(create(shape)?);
        debug!(
            "Created descriptor set layout #{} with {} bindings",
            self.layouts.len(),
            shape.slots().len()
        );
        self.layouts.insert(shape.clone(), layout.clone());
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Drops the cache's references to every layout.
    pub fn destroy_all(&mut self) {
        if !self.layouts.is_empty() {
            debug!("Releasing {} cached set layouts", self.layouts.len());
        }
        self.layouts.clear();
    }
}

impl SetLayoutCache<DescriptorSetLayout> {
    pub fn get_or_create(
        &mut self,
        device: &Arc<ash::Device>,
        shape: &BindingShape,
    ) -> Result<Arc<DescriptorSetLayout>> {
        self.get_or_create_with(shape, |shape| {
            DescriptorSetLayout::new(device.clone(), shape)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::descriptor_layout::DescriptorKind;
    use ash::vk;

    fn shape(kind: DescriptorKind, stages: vk::ShaderStageFlags) -> BindingShape {
        BindingShape::builder()
            .uniform(0, vk::ShaderStageFlags::VERTEX)
            .add_binding(1, kind, stages)
            .build()
            .unwrap()
    }

    /// Stand-in layout: records which creation produced it.
    struct FakeLayout(u32);

    #[test]
    fn identical_shapes_share_one_layout() {
        let mut cache: SetLayoutCache<FakeLayout> = SetLayoutCache::new();
        let mut created = 0;
        let mut create = |_: &BindingShape| {
            created += 1;
            Ok(FakeLayout(created))
        };

        let sky = shape(DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT);
        let tonemap = shape(DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT);

        let a = cache.get_or_create_with(&sky, &mut create).unwrap();
        let b = cache.get_or_create_with(&tonemap, &mut create).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.0, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn differing_kind_or_stage_creates_distinct_layouts() {
        let mut cache: SetLayoutCache<FakeLayout> = SetLayoutCache::new();
        let mut next = 0;
        let mut create = |_: &BindingShape| {
            next += 1;
            Ok(FakeLayout(next))
        };

        let base = shape(DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::FRAGMENT);
        let other_kind = shape(DescriptorKind::UniformBuffer, vk::ShaderStageFlags::FRAGMENT);
        let other_stage = shape(DescriptorKind::CombinedImageSampler, vk::ShaderStageFlags::VERTEX);

        let a = cache.get_or_create_with(&base, &mut create).unwrap();
        let b = cache.get_or_create_with(&other_kind, &mut create).unwrap();
        let c = cache.get_or_create_with(&other_stage, &mut create).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!Arc::ptr_eq(&b, &c));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn destroy_all_keeps_outstanding_references_alive() {
        let mut cache: SetLayoutCache<FakeLayout> = SetLayoutCache::new();
        let held = cache
            .get_or_create_with(
                &shape(DescriptorKind::UniformBuffer, vk::ShaderStageFlags::VERTEX),
                |_| Ok(FakeLayout(7)),
            )
            .unwrap();

        cache.destroy_all();
        assert!(cache.is_empty());
        assert_eq!(held.0, 7);
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut cache: SetLayoutCache<FakeLayout> = SetLayoutCache::new();
        let key = shape(DescriptorKind::StorageImage, vk::ShaderStageFlags::FRAGMENT);

        let failed = cache.get_or_create_with(&key, |_| {
            Err(crate::RendererError::VulkanError("out of memory".into()))
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let retried = cache.get_or_create_with(&key, |_| Ok(FakeLayout(2)));
        assert_eq!(retried.unwrap().0, 2);
    }
}
