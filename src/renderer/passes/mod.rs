//! The four stages of a frame, in submission order: sky, surface, bloom and
//! tone mapping.
//!
//! Passes only know the images they read and write. They get their render
//! passes, descriptor pool and layout cache from the caller and never create
//! those themselves.

pub mod bloom;
pub mod sky;
pub mod surface;
pub mod tonemap;

use std::sync::Arc;

use ash::vk::{self, Handle};
use bytemuck::{Pod, Zeroable};

pub use bloom::BloomPass;
pub use sky::SkyPass;
pub use surface::{SurfacePass, SurfaceSet};
pub use tonemap::ToneMapPass;

use super::frame::{BloomChain, FrameStage};
use crate::{
    assets::{ShaderKind, ShaderProvider},
    vulkan::{DescriptorPool, PipelineCache, SetLayoutCache, ShaderModule},
    Result,
};

/// Per-draw parameters. An all-zero block means the pass has nothing to draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawData {
    pub vertex_buffer: u64,
    pub index_buffer: u64,
    pub material_set: u64,
    pub transform_set: u64,
    pub index_count: u32,
    pub vertex_count: u32,
}

impl DrawData {
    /// Three generated vertices covering the whole target.
    pub fn fullscreen() -> Self {
        Self {
            vertex_count: 3,
            ..Self::zeroed()
        }
    }

    pub fn indexed(
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        index_count: u32,
        material_set: vk::DescriptorSet,
        transform_set: vk::DescriptorSet,
    ) -> Self {
        Self {
            vertex_buffer: vertex_buffer.as_raw(),
            index_buffer: index_buffer.as_raw(),
            material_set: material_set.as_raw(),
            transform_set: transform_set.as_raw(),
            index_count,
            vertex_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(&Self::zeroed())
    }
}

/// Shared objects a pass is built from.
pub struct PassResources<'a> {
    pub device: &'a Arc<ash::Device>,
    pub allocator: &'a Arc<crate::vulkan::Allocator>,
    pub descriptor_pool: &'a DescriptorPool,
    pub layout_cache: &'a mut SetLayoutCache,
    pub pipeline_cache: &'a PipelineCache,
    pub shaders: &'a dyn ShaderProvider,
    pub frames_in_flight: usize,
}

impl PassResources<'_> {
    pub(crate) fn shader(&self, program: &str, kind: ShaderKind) -> Result<ShaderModule> {
        let bytes = self.shaders.load(program, kind)?;
        ShaderModule::from_spirv(
            self.device.clone(),
            &format!("{program}.{}", kind.extension()),
            &bytes,
        )
    }
}

/// Render target of one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTarget {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl PassTarget {
    pub fn area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        }
    }
}

/// Images produced upstream of a pass for the frame being recorded.
pub struct PassInputs<'a> {
    /// HDR color written by the sky and surface stages.
    pub hdr_view: vk::ImageView,
    pub hdr_target: PassTarget,
    pub display_target: PassTarget,
    pub bloom_chain: &'a BloomChain,
}

/// A pipeline stage. Dispatch is a match over the variants; a pass is
/// destroyed by dropping it.
pub enum Pass {
    Sky(SkyPass),
    Surface(SurfacePass),
    Bloom(BloomPass),
    ToneMap(ToneMapPass),
}

impl Pass {
    pub fn stage(&self) -> FrameStage {
        match self {
            Pass::Sky(_) => FrameStage::Sky,
            Pass::Surface(_) => FrameStage::Surface,
            Pass::Bloom(_) => FrameStage::Bloom,
            Pass::ToneMap(_) => FrameStage::ToneMap,
        }
    }

    /// Points the pass's descriptor sets and targets for `frame` at this
    /// frame's inputs. Descriptor sets are only rewritten when an input view
    /// changed identity.
    pub fn update_descriptor_sets(&mut self, frame: usize, inputs: &PassInputs<'_>) {
        match self {
            Pass::Sky(pass) => pass.update_descriptor_sets(frame, inputs),
            Pass::Surface(_) => {}
            Pass::Bloom(pass) => pass.update_descriptor_sets(frame, inputs),
            Pass::ToneMap(pass) => pass.update_descriptor_sets(frame, inputs),
        }
    }

    /// Forgets the views and targets each frame was last bound to. Rebuilt
    /// swap resources may reuse old handle values, so the next update must
    /// rewrite every set.
    pub fn reset_inputs(&mut self) {
        match self {
            Pass::Sky(pass) => pass.reset_inputs(),
            Pass::Surface(_) => {}
            Pass::Bloom(pass) => pass.reset_inputs(),
            Pass::ToneMap(pass) => pass.reset_inputs(),
        }
    }

    /// Records the stage into `cmd`.
    ///
    /// # Safety
    ///
    /// `cmd` must be recording. The surface pass must be recorded inside its
    /// render pass; the others begin their own. Every handle in `data` must be
    /// alive until the buffer has executed.
    pub unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        data: &DrawData,
    ) {
        if data.is_empty() {
            return;
        }
        match self {
            Pass::Sky(pass) => pass.draw(device, cmd, frame, data),
            Pass::Surface(pass) => pass.draw(device, cmd, frame, data),
            Pass::Bloom(pass) => pass.draw(device, cmd, frame, data),
            Pass::ToneMap(pass) => pass.draw(device, cmd, frame, data),
        }
    }
}

/// Begins a single-subpass render pass over the whole target.
pub(crate) unsafe fn begin_render_pass(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    target: PassTarget,
    clear_values: &[vk::ClearValue],
    contents: vk::SubpassContents,
) {
    let info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(target.framebuffer)
        .render_area(target.area())
        .clear_values(clear_values);
    device.cmd_begin_render_pass(cmd, &info, contents);
}
