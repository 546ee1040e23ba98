//! Bloom: a chain of five-tap box downsamples of the HDR image followed by
//! additive tent upsamples back to the first level.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use super::{begin_render_pass, DrawData, PassInputs, PassResources, PassTarget};
use crate::{
    assets::ShaderKind,
    config::BloomSettings,
    vulkan::{
        pipeline::set_viewport_and_scissor, BindingShape, BlendMode, DescriptorSet,
        DescriptorSetLayout, GraphicsPipelineDesc, Pipeline, PipelineLayout, RenderPass, Sampler,
    },
    Result,
};

/// Weight of the center tap of a downsample.
pub const CENTER_WEIGHT: f32 = 0.5;
/// Weight of each of the four diagonal taps of a downsample.
pub const CORNER_WEIGHT: f32 = 0.125;
/// Luma scale of the Karis average applied on the first downsample.
pub const KARIS_LUMA_SCALE: f32 = 0.25;

const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

pub fn luma(color: Vec3) -> f32 {
    color.dot(LUMA)
}

/// Attenuates bright samples so single hot pixels don't flicker into
/// fireflies once spread over the chain.
pub fn karis_weight(color: Vec3) -> f32 {
    1.0 / (1.0 + KARIS_LUMA_SCALE * luma(color))
}

/// Extent of chain level `level`; level 0 is half the source size.
pub fn level_extent(source: vk::Extent2D, level: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (source.width >> (level + 1)).max(1),
        height: (source.height >> (level + 1)).max(1),
    }
}

/// CPU image used to check the downsample filter.
#[derive(Clone, Debug, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
}

impl HdrImage {
    pub fn filled(width: u32, height: u32, color: Vec3) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width * height) as usize],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Bilinear fetch at normalized coordinates with clamp-to-edge addressing.
    /// An empty image reads as black.
    pub fn sample(&self, u: f32, v: f32) -> Vec3 {
        if self.is_empty() {
            return Vec3::ZERO;
        }
        let x = (u * self.width as f32 - 0.5).clamp(0.0, (self.width - 1) as f32);
        let y = (v * self.height as f32 - 0.5).clamp(0.0, (self.height - 1) as f32);
        let (x0, y0) = (x.floor() as u32, y.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(self.width - 1), (y0 + 1).min(self.height - 1));
        let (fx, fy) = (x.fract(), y.fract());

        let top = self.pixel(x0, y0).lerp(self.pixel(x1, y0), fx);
        let bottom = self.pixel(x0, y1).lerp(self.pixel(x1, y1), fx);
        top.lerp(bottom, fy)
    }
}

/// Reference implementation of `bloom_downsample.frag`: one output pixel per
/// 2x2 source block, from a bilinear center tap and four diagonal taps one
/// source texel away. With `karis` every tap is scaled by its Karis weight.
/// An empty source gives an empty image.
pub fn downsample(source: &HdrImage, karis: bool) -> HdrImage {
    if source.is_empty() {
        return HdrImage::filled(0, 0, Vec3::ZERO);
    }
    let width = (source.width / 2).max(1);
    let height = (source.height / 2).max(1);
    let texel_u = 1.0 / source.width as f32;
    let texel_v = 1.0 / source.height as f32;

    let mut pixels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let u = (x as f32 + 0.5) / width as f32;
            let v = (y as f32 + 0.5) / height as f32;
            let taps = [
                (source.sample(u, v), CENTER_WEIGHT),
                (source.sample(u - texel_u, v - texel_v), CORNER_WEIGHT),
                (source.sample(u + texel_u, v - texel_v), CORNER_WEIGHT),
                (source.sample(u - texel_u, v + texel_v), CORNER_WEIGHT),
                (source.sample(u + texel_u, v + texel_v), CORNER_WEIGHT),
            ];
            let color = taps.iter().fold(Vec3::ZERO, |sum, (tap, weight)| {
                let karis_scale = if karis { karis_weight(*tap) } else { 1.0 };
                sum + *tap * *weight * karis_scale
            });
            pixels.push(color);
        }
    }

    HdrImage {
        width,
        height,
        pixels,
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct BloomPushConstants {
    /// Size of one texel of the image being sampled.
    texel_size: [f32; 2],
    filter_radius: f32,
    karis: u32,
}

/// Descriptor sets and targets of one frame slot's chain.
#[derive(Default)]
struct FrameSets {
    /// `down[i]` samples the source of level `i`.
    down: Vec<DescriptorSet>,
    /// `up[i]` samples level `i + 1` while accumulating into level `i`.
    up: Vec<DescriptorSet>,
    down_sources: Vec<vk::ImageView>,
    up_sources: Vec<vk::ImageView>,
    targets: Vec<PassTarget>,
    source_extent: vk::Extent2D,
}

pub struct BloomPass {
    frames: Vec<FrameSets>,
    down_pipeline: Pipeline,
    up_pipeline: Pipeline,
    pipeline_layout: PipelineLayout,
    sampler: Sampler,
    set_layout: Arc<DescriptorSetLayout>,
    down_render_pass: vk::RenderPass,
    up_render_pass: vk::RenderPass,
    filter_radius: f32,
}

impl BloomPass {
    pub fn new(
        res: &mut PassResources<'_>,
        down_render_pass: &RenderPass,
        up_render_pass: &RenderPass,
        settings: &BloomSettings,
    ) -> Result<Self> {
        let shape = BindingShape::builder()
            .sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build()?;
        let set_layout = res.layout_cache.get_or_create(res.device, &shape)?;
        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<BloomPushConstants>() as u32,
        };
        let pipeline_layout =
            PipelineLayout::new(res.device.clone(), &[set_layout.handle()], &[push_range])?;

        let vertex = res.shader("fullscreen", ShaderKind::Vertex)?;
        let down_fragment = res.shader("bloom_downsample", ShaderKind::Fragment)?;
        let up_fragment = res.shader("bloom_upsample", ShaderKind::Fragment)?;

        let desc = |name, fragment, blend, render_pass| GraphicsPipelineDesc {
            name,
            vertex: &vertex,
            fragment,
            vertex_bindings: &[],
            vertex_attributes: &[],
            depth_test: false,
            depth_write: false,
            cull_mode: vk::CullModeFlags::NONE,
            blend,
            layout: pipeline_layout.handle(),
            render_pass,
        };
        let down_pipeline = Pipeline::graphics(
            res.device.clone(),
            res.pipeline_cache.handle(),
            &desc(
                "bloom downsample",
                &down_fragment,
                BlendMode::Opaque,
                down_render_pass,
            ),
        )?;
        let up_pipeline = Pipeline::graphics(
            res.device.clone(),
            res.pipeline_cache.handle(),
            &desc(
                "bloom upsample",
                &up_fragment,
                BlendMode::Additive,
                up_render_pass,
            ),
        )?;

        let levels = settings.mip_levels as usize;
        let mut frames = Vec::with_capacity(res.frames_in_flight);
        for _ in 0..res.frames_in_flight {
            let mut sets = FrameSets::default();
            for _ in 0..levels {
                sets.down.push(res.descriptor_pool.allocate(&set_layout)?);
            }
            for _ in 1..levels {
                sets.up.push(res.descriptor_pool.allocate(&set_layout)?);
            }
            sets.down_sources = vec![vk::ImageView::null(); levels];
            sets.up_sources = vec![vk::ImageView::null(); levels.saturating_sub(1)];
            frames.push(sets);
        }

        let sampler = Sampler::linear(res.device.clone(), false, 0.0, None)?;

        Ok(Self {
            frames,
            down_pipeline,
            up_pipeline,
            pipeline_layout,
            sampler,
            set_layout,
            down_render_pass: down_render_pass.handle(),
            up_render_pass: up_render_pass.handle(),
            filter_radius: settings.filter_radius,
        })
    }

    pub fn set_layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.set_layout
    }

    pub(super) fn reset_inputs(&mut self) {
        for sets in &mut self.frames {
            sets.down_sources.fill(vk::ImageView::null());
            sets.up_sources.fill(vk::ImageView::null());
            sets.targets.clear();
        }
    }

    pub(super) fn update_descriptor_sets(&mut self, frame: usize, inputs: &PassInputs<'_>) {
        let sampler = self.sampler.handle();
        let levels = inputs.bloom_chain.levels();
        let sets = &mut self.frames[frame];
        let count = levels.len().min(sets.down.len());

        for i in 0..count {
            let source = if i == 0 {
                inputs.hdr_view
            } else {
                levels[i - 1].view()
            };
            if sets.down_sources[i] != source {
                sets.down[i].write().sampled_image(0, source, sampler).submit();
                sets.down_sources[i] = source;
            }
        }
        for i in 0..count.saturating_sub(1) {
            let source = levels[i + 1].view();
            if sets.up_sources[i] != source {
                sets.up[i].write().sampled_image(0, source, sampler).submit();
                sets.up_sources[i] = source;
            }
        }

        sets.targets = levels[..count].iter().map(|level| level.target()).collect();
        sets.source_extent = inputs.hdr_target.extent;
    }

    pub(super) unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: usize,
        data: &DrawData,
    ) {
        let sets = &self.frames[frame];
        let texel = |extent: vk::Extent2D| [1.0 / extent.width as f32, 1.0 / extent.height as f32];

        let mut source_extent = sets.source_extent;
        for (i, target) in sets.targets.iter().enumerate() {
            let push = BloomPushConstants {
                texel_size: texel(source_extent),
                filter_radius: self.filter_radius,
                karis: u32::from(i == 0),
            };
            self.record_level(
                device,
                cmd,
                self.down_render_pass,
                &self.down_pipeline,
                *target,
                sets.down[i].handle(),
                &push,
                data,
            );
            source_extent = target.extent;
        }

        for i in (0..sets.targets.len().saturating_sub(1)).rev() {
            let push = BloomPushConstants {
                texel_size: texel(sets.targets[i + 1].extent),
                filter_radius: self.filter_radius,
                karis: 0,
            };
            self.record_level(
                device,
                cmd,
                self.up_render_pass,
                &self.up_pipeline,
                sets.targets[i],
                sets.up[i].handle(),
                &push,
                data,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn record_level(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        pipeline: &Pipeline,
        target: PassTarget,
        set: vk::DescriptorSet,
        push: &BloomPushConstants,
        data: &DrawData,
    ) {
        begin_render_pass(
            device,
            cmd,
            render_pass,
            target,
            &[],
            vk::SubpassContents::INLINE,
        );
        set_viewport_and_scissor(device, cmd, target.extent);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout.handle(),
            0,
            &[set],
            &[],
        );
        device.cmd_push_constants(
            cmd,
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::FRAGMENT,
            0,
            bytemuck::bytes_of(push),
        );
        device.cmd_draw(cmd, data.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V: Vec3 = Vec3::new(2.0, 0.5, 0.25);

    #[test]
    fn weights_sum_to_one() {
        assert!((CENTER_WEIGHT + 4.0 * CORNER_WEIGHT - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_sized_source_downsamples_to_nothing() {
        for (width, height) in [(0, 4), (4, 0), (0, 0)] {
            let source = HdrImage::filled(width, height, Vec3::ONE);
            for karis in [false, true] {
                let out = downsample(&source, karis);
                assert!(out.is_empty() && out.pixels.is_empty());
            }
            assert_eq!(source.sample(0.5, 0.5), Vec3::ZERO);
        }
    }

    #[test]
    fn constant_image_is_preserved_by_plain_downsample() {
        let mut image = HdrImage::filled(64, 32, V);
        for _ in 0..4 {
            image = downsample(&image, false);
            assert!(image.pixels.iter().all(|p| p.abs_diff_eq(V, 1e-5)));
        }
        assert_eq!((image.width, image.height), (4, 2));
    }

    #[test]
    fn karis_level_scales_constant_image_by_luma() {
        let image = downsample(&HdrImage::filled(16, 16, V), true);
        let expected = V / (1.0 + 0.25 * luma(V));
        assert!(image.pixels.iter().all(|p| p.abs_diff_eq(expected, 1e-5)));
    }

    #[test]
    fn karis_weight_attenuates_bright_samples_more() {
        assert!(karis_weight(Vec3::splat(10.0)) < karis_weight(Vec3::splat(1.0)));
        assert_eq!(karis_weight(Vec3::ZERO), 1.0);
    }

    #[test]
    fn downsample_halves_and_clamps_extent() {
        let image = downsample(&HdrImage::filled(5, 1, V), false);
        assert_eq!((image.width, image.height), (2, 1));
    }

    #[test]
    fn level_extents_halve_per_level() {
        let source = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(
            level_extent(source, 0),
            vk::Extent2D {
                width: 640,
                height: 360
            }
        );
        assert_eq!(level_extent(source, 4).width, 40);
        assert_eq!(level_extent(source, 12).height, 1);
    }

    #[test]
    fn bilinear_sample_interpolates_between_texels() {
        let image = HdrImage {
            width: 2,
            height: 1,
            pixels: vec![Vec3::ZERO, Vec3::ONE],
        };
        assert!(image.sample(0.5, 0.5).abs_diff_eq(Vec3::splat(0.5), 1e-6));
        assert!(image.sample(0.0, 0.5).abs_diff_eq(Vec3::ZERO, 1e-6));
    }
}
