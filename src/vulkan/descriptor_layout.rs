use ash::vk;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{RendererError, Result};

/// Resource kinds a binding slot can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
    StorageBuffer,
    StorageImage,
}

impl DescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

/// One (slot, kind, stage) entry of a binding shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

/// Ordered list of binding slots describing what a shader expects in one set.
///
/// Two shapes are equal when their slot lists are equal element by element,
/// which is what the layout cache keys on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindingShape {
    slots: Vec<BindingSlot>,
}

impl BindingShape {
    pub fn builder() -> BindingShapeBuilder {
        BindingShapeBuilder::default()
    }

    /// Validates that every slot number appears once and that stages are set.
    pub fn new(slots: Vec<BindingSlot>) -> Result<Self> {
        if slots.is_empty() {
            return Err(RendererError::InvalidBindingShape(
                "shape has no bindings".into(),
            ));
        }

        let mut seen = HashSet::new();
        for slot in &slots {
            if !seen.insert(slot.binding) {
                return Err(RendererError::InvalidBindingShape(format!(
                    "binding {} declared twice",
                    slot.binding
                )));
            }
            if slot.stages.is_empty() {
                return Err(RendererError::InvalidBindingShape(format!(
                    "binding {} is visible to no shader stage",
                    slot.binding
                )));
            }
        }

        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Number of descriptors of `kind` one set of this shape consumes.
    pub fn count_of(&self, kind: DescriptorKind) -> u32 {
        self.slots.iter().filter(|slot| slot.kind == kind).count() as u32
    }

    fn vk_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.slots
            .iter()
            .map(|slot| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot.binding)
                    .descriptor_type(slot.kind.vk_type())
                    .descriptor_count(1)
                    .stage_flags(slot.stages)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct BindingShapeBuilder {
    slots: Vec<BindingSlot>,
}

impl BindingShapeBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        kind: DescriptorKind,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.slots.push(BindingSlot {
            binding,
            kind,
            stages,
        });
        self
    }

    pub fn uniform(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::UniformBuffer, stages)
    }

    pub fn sampler(self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, DescriptorKind::CombinedImageSampler, stages)
    }

    pub fn build(self) -> Result<BindingShape> {
        BindingShape::new(self.slots)
    }
}

/// RAII wrapper for a descriptor set layout built from a [`BindingShape`].
pub struct DescriptorSetLayout {
    device: Arc<ash::Device>,
    layout: vk::DescriptorSetLayout,
    shape: BindingShape,
}

impl DescriptorSetLayout {
    pub fn new(device: Arc<ash::Device>, shape: &BindingShape) -> Result<Self> {
        let bindings = shape.vk_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(|e| {
                    RendererError::VulkanError(format!(
                        "Failed to create descriptor set layout: {e}"
                    ))
                })?
        };

        Ok(Self {
            device,
            layout,
            shape: shape.clone(),
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn shape(&self) -> &BindingShape {
        &self.shape
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAG: vk::ShaderStageFlags = vk::ShaderStageFlags::FRAGMENT;
    const VERT: vk::ShaderStageFlags = vk::ShaderStageFlags::VERTEX;

    #[test]
    fn identical_slot_lists_are_equal() {
        let a = BindingShape::builder().uniform(0, VERT).sampler(1, FRAG).build().unwrap();
        let b = BindingShape::builder().uniform(0, VERT).sampler(1, FRAG).build().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn slot_order_is_significant() {
        let a = BindingShape::builder().uniform(0, VERT).sampler(1, FRAG).build().unwrap();
        let b = BindingShape::builder().sampler(1, FRAG).uniform(0, VERT).build().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let result = BindingShape::builder().uniform(0, VERT).sampler(0, FRAG).build();
        assert!(matches!(result, Err(RendererError::InvalidBindingShape(_))));
    }

    #[test]
    fn empty_shape_and_missing_stage_are_rejected() {
        assert!(BindingShape::builder().build().is_err());
        let no_stage = BindingShape::builder()
            .uniform(0, vk::ShaderStageFlags::empty())
            .build();
        assert!(no_stage.is_err());
    }

    #[test]
    fn counts_descriptors_by_kind() {
        let shape = BindingShape::builder()
            .uniform(0, VERT)
            .sampler(1, FRAG)
            .sampler(2, FRAG)
            .build()
            .unwrap();
        assert_eq!(shape.count_of(DescriptorKind::UniformBuffer), 1);
        assert_eq!(shape.count_of(DescriptorKind::CombinedImageSampler), 2);
        assert_eq!(shape.count_of(DescriptorKind::StorageImage), 0);
    }
}
