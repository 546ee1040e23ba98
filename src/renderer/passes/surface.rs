use std::sync::Arc;

use ash::vk::{self, Handle};

use super::{DrawData, PassResources};
use crate::{
    assets::ShaderKind,
    renderer::{
        asset::{MaterialTextureSlot, Vertex},
        camera::CameraData,
    },
    vulkan::{
        pipeline::set_viewport_and_scissor, BindingShape, BlendMode, Buffer, DescriptorPool,
        DescriptorSet, DescriptorSetLayout, GraphicsPipelineDesc, Pipeline, PipelineLayout,
        RenderPass,
    },
    Result,
};

/// Descriptor sets of the surface pipeline, by set index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceSet {
    /// One combined image sampler per [`MaterialTextureSlot`].
    Material = 0,
    Camera = 1,
    /// Per-asset model and normal matrices.
    Transform = 2,
}

impl SurfaceSet {
    pub const ALL: [SurfaceSet; 3] = [SurfaceSet::Material, SurfaceSet::Camera, SurfaceSet::Transform];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn shape(self) -> Result<BindingShape> {
        let fragment = vk::ShaderStageFlags::FRAGMENT;
        match self {
            SurfaceSet::Material => MaterialTextureSlot::ALL
                .iter()
                .fold(BindingShape::builder(), |builder, slot| {
                    builder.add_binding(slot.binding(), slot.descriptor_kind(), fragment)
                })
                .build(),
            SurfaceSet::Camera => BindingShape::builder()
                .uniform(0, vk::ShaderStageFlags::VERTEX | fragment)
                .build(),
            SurfaceSet::Transform => BindingShape::builder()
                .uniform(0, vk::ShaderStageFlags::VERTEX)
                .build(),
        }
    }
}

/// Physically based shading of every visible asset into the HDR target.
///
/// Recorded into per-asset secondary buffers that run inside the surface
/// render pass begun by the frame's primary buffer.
pub struct SurfacePass {
    camera_sets: Vec<DescriptorSet>,
    camera_uniforms: Vec<Buffer>,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    set_layouts: [Arc<DescriptorSetLayout>; 3],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
}

impl SurfacePass {
    pub fn new(
        res: &mut PassResources<'_>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let set_layouts = [
            res.layout_cache
                .get_or_create(res.device, &SurfaceSet::Material.shape()?)?,
            res.layout_cache
                .get_or_create(res.device, &SurfaceSet::Camera.shape()?)?,
            res.layout_cache
                .get_or_create(res.device, &SurfaceSet::Transform.shape()?)?,
        ];
        let handles = set_layouts.each_ref().map(|layout| layout.handle());
        let pipeline_layout = PipelineLayout::new(res.device.clone(), &handles, &[])?;

        let vertex = res.shader("pbr", ShaderKind::Vertex)?;
        let fragment = res.shader("pbr", ShaderKind::Fragment)?;
        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let pipeline = Pipeline::graphics(
            res.device.clone(),
            res.pipeline_cache.handle(),
            &GraphicsPipelineDesc {
                name: "surface",
                vertex: &vertex,
                fragment: &fragment,
                vertex_bindings: &bindings,
                vertex_attributes: &attributes,
                depth_test: true,
                depth_write: true,
                cull_mode: vk::CullModeFlags::BACK,
                blend: BlendMode::Opaque,
                layout: pipeline_layout.handle(),
                render_pass,
            },
        )?;

        let camera_layout = &set_layouts[SurfaceSet::Camera as usize];
        let mut camera_uniforms = Vec::with_capacity(res.frames_in_flight);
        let mut camera_sets = Vec::with_capacity(res.frames_in_flight);
        for _ in 0..res.frames_in_flight {
            let uniform = Buffer::uniform(res.allocator.clone(), &CameraData::default())?;
            let set = res.descriptor_pool.allocate(camera_layout)?;
            set.write()
                .uniform(0, uniform.handle(), uniform.size())
                .submit();
            camera_uniforms.push(uniform);
            camera_sets.push(set);
        }

        Ok(Self {
            camera_sets,
            camera_uniforms,
            pipeline,
            pipeline_layout,
            set_layouts,
            render_pass: render_pass.handle(),
            extent,
        })
    }

    pub fn set_layout(&self, set: SurfaceSet) -> &Arc<DescriptorSetLayout> {
        &self.set_layouts[set as usize]
    }

    pub fn allocate_set(&self, pool: &DescriptorPool, set: SurfaceSet) -> Result<DescriptorSet> {
        pool.allocate(self.set_layout(set))
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Extent of the HDR target secondaries draw into.
    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }

    pub fn write_camera(&mut self, frame: usize, camera: &CameraData) -> Result<()> {
        self.camera_uniforms[frame].write(std::slice::from_ref(camera))
    }

    pub(super) unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        data: &DrawData,
    ) {
        if data.index_count == 0 {
            return;
        }

        set_viewport_and_scissor(device, cmd, self.extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout.handle(),
            SurfaceSet::Material.index(),
            &[
                vk::DescriptorSet::from_raw(data.material_set),
                self.camera_sets[frame].handle(),
                vk::DescriptorSet::from_raw(data.transform_set),
            ],
            &[],
        );
        device.cmd_bind_vertex_buffers(cmd, 0, &[vk::Buffer::from_raw(data.vertex_buffer)], &[0]);
        device.cmd_bind_index_buffer(
            cmd,
            vk::Buffer::from_raw(data.index_buffer),
            0,
            vk::IndexType::UINT32,
        );
        device.cmd_draw_indexed(cmd, data.index_count, 1, 0, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::DescriptorKind;

    #[test]
    fn material_set_has_one_sampler_per_texture_slot() {
        let shape = SurfaceSet::Material.shape().unwrap();
        assert_eq!(
            shape.count_of(DescriptorKind::CombinedImageSampler),
            MaterialTextureSlot::COUNT as u32
        );
        assert_eq!(shape.count_of(DescriptorKind::UniformBuffer), 0);
    }

    #[test]
    fn camera_and_transform_sets_differ_in_stage_only() {
        let camera = SurfaceSet::Camera.shape().unwrap();
        let transform = SurfaceSet::Transform.shape().unwrap();
        assert_ne!(camera, transform);
        assert_eq!(camera.slots().len(), transform.slots().len());
    }
}
