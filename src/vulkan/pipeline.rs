use std::io::Cursor;
use std::sync::Arc;

use ash::vk;

use super::render_pass::RenderPass;
use crate::{RendererError, Result};

/// Owning shader module.
pub struct ShaderModule {
    device: Arc<ash::Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Builds a module from SPIR-V bytes. Empty input means the shader provider
    /// had nothing for `name`, which is a configuration error.
    pub fn from_spirv(device: Arc<ash::Device>, name: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(RendererError::ShaderMissing(name.to_string()));
        }

        let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
            RendererError::ShaderMissing(format!("{name} is not valid SPIR-V: {e}"))
        })?;

        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create shader module {name}: {e}"))
        })?;

        Ok(Self { device, module })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

pub struct PipelineLayout {
    device: Arc<ash::Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<ash::Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        let layout = unsafe { device.create_pipeline_layout(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create pipeline layout: {e}"))
        })?;
        Ok(Self { device, layout })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.layout, None) };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    /// `dst += src`, used to accumulate bloom levels.
    Additive,
}

/// Fixed-function and programmable state of one graphics pipeline.
///
/// Viewport and scissor are always dynamic so pipelines survive resizes.
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex: &'a ShaderModule,
    pub fragment: &'a ShaderModule,
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_mode: vk::CullModeFlags,
    pub blend: BlendMode,
    pub layout: vk::PipelineLayout,
    /// Subpass 0 of this pass; its sample count sets rasterization samples.
    pub render_pass: &'a RenderPass,
}

pub struct Pipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    pub fn graphics(
        device: Arc<ash::Device>,
        cache: vk::PipelineCache,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<Self> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex.handle())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment.handle())
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(desc.render_pass.samples());

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let attachment = match desc.blend {
            BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false),
            BlendMode::Additive => vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
        };
        let attachments = [attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass.handle())
            .subpass(0);

        let pipeline = unsafe { device.create_graphics_pipelines(cache, &[info], None) }
            .map_err(|(_, e)| {
                RendererError::VulkanError(format!(
                    "Failed to create {} pipeline: {e}",
                    desc.name
                ))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RendererError::VulkanError(format!("No pipeline returned for {}", desc.name))
            })?;

        Ok(Self { device, pipeline })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
    }
}

/// Full-target viewport with a matching scissor, set per recording.
pub unsafe fn set_viewport_and_scissor(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    };
    device.cmd_set_viewport(cmd, 0, &[viewport]);
    device.cmd_set_scissor(cmd, 0, &[scissor]);
}
