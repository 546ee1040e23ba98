use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use super::{begin_render_pass, DrawData, PassInputs, PassResources, PassTarget};
use crate::{
    assets::ShaderKind,
    config::{BloomSettings, ToneMapSettings},
    vulkan::{
        pipeline::set_viewport_and_scissor, BindingShape, BlendMode, DescriptorSet,
        DescriptorSetLayout, GraphicsPipelineDesc, Pipeline, PipelineLayout, RenderPass, Sampler,
    },
    Result,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ToneMapPushConstants {
    exposure: f32,
    bloom_strength: f32,
}

struct FrameBinding {
    set: DescriptorSet,
    /// `(hdr, bloom)` views the set currently samples.
    bound: (vk::ImageView, vk::ImageView),
    target: Option<PassTarget>,
}

/// Mixes the bloom chain into the HDR image, applies exposure and ACES
/// tone mapping and writes the presentable image.
pub struct ToneMapPass {
    frames: Vec<FrameBinding>,
    pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    sampler: Sampler,
    set_layout: Arc<DescriptorSetLayout>,
    render_pass: vk::RenderPass,
    push: ToneMapPushConstants,
}

impl ToneMapPass {
    pub fn new(
        res: &mut PassResources<'_>,
        render_pass: &RenderPass,
        tone_map: &ToneMapSettings,
        bloom: &BloomSettings,
    ) -> Result<Self> {
        let fragment_stage = vk::ShaderStageFlags::FRAGMENT;
        let shape = BindingShape::builder()
            .sampler(0, fragment_stage)
            .sampler(1, fragment_stage)
            .build()?;
        let set_layout = res.layout_cache.get_or_create(res.device, &shape)?;
        let push_range = vk::PushConstantRange {
            stage_flags: fragment_stage,
            offset: 0,
            size: std::mem::size_of::<ToneMapPushConstants>() as u32,
        };
        let pipeline_layout =
            PipelineLayout::new(res.device.clone(), &[set_layout.handle()], &[push_range])?;

        let vertex = res.shader("fullscreen", ShaderKind::Vertex)?;
        let fragment = res.shader("tonemap", ShaderKind::Fragment)?;
        let pipeline = Pipeline::graphics(
            res.device.clone(),
            res.pipeline_cache.handle(),
            &GraphicsPipelineDesc {
                name: "tone map",
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

        let frames = (0..res.frames_in_flight)
            .map(|_| {
                Ok(FrameBinding {
                    set: res.descriptor_pool.allocate(&set_layout)?,
                    bound: (vk::ImageView::null(), vk::ImageView::null()),
                    target: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            frames,
            pipeline,
            pipeline_layout,
            sampler: Sampler::linear(res.device.clone(), false, 0.0, None)?,
            set_layout,
            render_pass: render_pass.handle(),
            push: ToneMapPushConstants {
                exposure: tone_map.exposure,
                bloom_strength: bloom.strength,
            },
        })
    }

    pub fn set_layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.set_layout
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.push.exposure = exposure;
    }

    pub fn exposure(&self) -> f32 {
        self.push.exposure
    }

    pub(super) fn reset_inputs(&mut self) {
        for binding in &mut self.frames {
            binding.bound = (vk::ImageView::null(), vk::ImageView::null());
            binding.target = None;
        }
    }

    pub(super) fn update_descriptor_sets(&mut self, frame: usize, inputs: &PassInputs<'_>) {
        let bloom_view = inputs
            .bloom_chain
            .levels()
            .first()
            .map_or(vk::ImageView::null(), |level| level.view());
        let sampler = self.sampler.handle();
        let binding = &mut self.frames[frame];

        let wanted = (inputs.hdr_view, bloom_view);
        if binding.bound != wanted && bloom_view != vk::ImageView::null() {
            binding
                .set
                .write()
                .sampled_image(0, inputs.hdr_view, sampler)
                .sampled_image(1, bloom_view, sampler)
                .submit();
            binding.bound = wanted;
        }
        binding.target = Some(inputs.display_target);
    }

    pub(super) unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        data: &DrawData,
    ) {
        let binding = &self.frames[frame];
        let Some(target) = binding.target else {
            log::warn!("Tone map pass has no target for frame {frame}");
            return;
        };

        begin_render_pass(
            device,
            cmd,
            self.render_pass,
            target,
            &[],
            vk::SubpassContents::INLINE,
        );
        set_viewport_and_scissor(device, cmd, target.extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout.handle(),
            0,
            &[binding.set.handle()],
            &[],
        );
        device.cmd_push_constants(
            cmd,
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(&self.push),
        );
        device.cmd_draw(cmd, data.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
    }
}
