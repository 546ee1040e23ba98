use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use super::{begin_render_pass, DrawData, PassInputs, PassResources, PassTarget};
use crate::{
    assets::ShaderKind,
    config::SkySettings,
    renderer::camera::CameraData,
    vulkan::{
        pipeline::set_viewport_and_scissor, BindingShape, BlendMode, Buffer, DescriptorSet,
        DescriptorSetLayout, GraphicsPipelineDesc, Pipeline, PipelineLayout, RenderPass, Texture,
    },
    Result,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SkyUniform {
    pub inverse_view_projection: Mat4,
    pub zenith_color: Vec4,
    pub horizon_color: Vec4,
    /// x: 1 when the environment cube is sampled, y: its intensity.
    pub params: Vec4,
}

/// Camera uniform at binding 0 and the environment cube at binding 1.
pub fn sky_binding_shape() -> Result<BindingShape> {
    BindingShape::builder()
        .uniform(0, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .sampler(1, vk::ShaderStageFlags::FRAGMENT)
        .build()
}

fn environment_params(loaded: bool, intensity: f32) -> Vec4 {
    Vec4::new(if loaded { 1.0 } else { 0.0 }, intensity, 0.0, 0.0)
}

/// Sky background. Clears the HDR target and fills it with a fullscreen
/// triangle that samples the environment cube, or draws the gradient when no
/// environment is loaded. Depth is cleared to the far plane and left untouched.
pub struct SkyPass {
    sets: Vec<DescriptorSet>,
    uniforms: Vec<Buffer>,
    targets: Vec<Option<PassTarget>>,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    set_layout: Arc<DescriptorSetLayout>,
    render_pass: vk::RenderPass,
    zenith_color: Vec4,
    horizon_color: Vec4,
    params: Vec4,
}

impl SkyPass {
    /// `environment` is bound whether or not it was `loaded`; without one the
    /// shader ignores it and draws the gradient.
    pub fn new(
        res: &mut PassResources<'_>,
        render_pass: &RenderPass,
        settings: &SkySettings,
        environment: &Texture,
        loaded: bool,
    ) -> Result<Self> {
        let shape = sky_binding_shape()?;
        let set_layout = res.layout_cache.get_or_create(res.device, &shape)?;
        let pipeline_layout = PipelineLayout::new(res.device.clone(), &[set_layout.handle()], &[])?;

        let vertex = res.shader("fullscreen", ShaderKind::Vertex)?;
        let fragment = res.shader("sky", ShaderKind::Fragment)?;
        let pipeline = Pipeline::graphics(
            res.device.clone(),
            res.pipeline_cache.handle(),
            &GraphicsPipelineDesc {
                name: "sky",
                vertex: &vertex,
                fragment: &fragment,
                vertex_bindings: &[],
                vertex_attributes: &[],
                depth_test: false,
                depth_write: false,
                cull_mode: vk::CullModeFlags::NONE,
                blend: BlendMode::Opaque,
                layout: pipeline_layout.handle(),
                render_pass,
            },
        )?;

        let zenith_color = Vec4::from((glam::Vec3::from(settings.zenith_color), 1.0));
        let horizon_color = Vec4::from((glam::Vec3::from(settings.horizon_color), 1.0));
        let params = environment_params(loaded, settings.environment_intensity);
        let initial = SkyUniform {
            inverse_view_projection: Mat4::IDENTITY,
            zenith_color,
            horizon_color,
            params,
        };

        let mut uniforms = Vec::with_capacity(res.frames_in_flight);
        let mut sets = Vec::with_capacity(res.frames_in_flight);
        for _ in 0..res.frames_in_flight {
            let uniform = Buffer::uniform(res.allocator.clone(), &initial)?;
            let set = res.descriptor_pool.allocate(&set_layout)?;
            set.write()
                .uniform(0, uniform.handle(), uniform.size())
                .sampled_image(1, environment.view(), environment.sampler())
                .submit();
            uniforms.push(uniform);
            sets.push(set);
        }

        Ok(Self {
            sets,
            uniforms,
            targets: vec![None; res.frames_in_flight],
            pipeline,
            pipeline_layout,
            set_layout,
            render_pass: render_pass.handle(),
            zenith_color,
            horizon_color,
            params,
        })
    }

    pub fn set_layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.set_layout
    }

    /// Points every slot at a new environment cube. The device must be idle;
    /// the uniforms pick up the flag on their next camera write.
    pub fn set_environment(&mut self, environment: &Texture, loaded: bool, intensity: f32) {
        for set in &self.sets {
            set.write()
                .sampled_image(1, environment.view(), environment.sampler())
                .submit();
        }
        self.params = environment_params(loaded, intensity);
    }

    /// Refreshes the view rays of `frame`. The frame's fence must have been waited on.
    pub fn write_camera(&mut self, frame: usize, camera: &CameraData) -> Result<()> {
        let uniform = SkyUniform {
            inverse_view_projection: camera.inverse_view_projection,
            zenith_color: self.zenith_color,
            horizon_color: self.horizon_color,
            params: self.params,
        };
        self.uniforms[frame].write(std::slice::from_ref(&uniform))
    }

    pub(super) fn reset_inputs(&mut self) {
        self.targets.fill(None);
    }

    pub(super) fn update_descriptor_sets(&mut self, frame: usize, inputs: &PassInputs<'_>) {
        self.targets[frame] = Some(inputs.hdr_target);
    }

    pub(super) unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        data: &DrawData,
    ) {
        let Some(target) = self.targets[frame] else {
            log::warn!("Sky pass has no target for frame {frame}");
            return;
        };

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        begin_render_pass(
            device,
            cmd,
            self.render_pass,
            target,
            &clear_values,
            vk::SubpassContents::INLINE,
        );
        set_viewport_and_scissor(device, cmd, target.extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout.handle(),
            0,
            &[self.sets[frame].handle()],
            &[],
        );
        device.cmd_draw(cmd, data.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::DescriptorKind;

    #[test]
    fn sky_binds_camera_and_environment_cube() {
        let shape = sky_binding_shape().unwrap();
        assert_eq!(shape.count_of(DescriptorKind::UniformBuffer), 1);
        assert_eq!(shape.count_of(DescriptorKind::CombinedImageSampler), 1);
    }

    #[test]
    fn gradient_is_used_until_an_environment_loads() {
        assert_eq!(environment_params(false, 2.0).x, 0.0);
        let loaded = environment_params(true, 2.0);
        assert_eq!((loaded.x, loaded.y), (1.0, 2.0));
    }

    #[test]
    fn uniform_matches_std140_layout() {
        assert_eq!(std::mem::size_of::<SkyUniform>(), 64 + 3 * 16);
    }
}
