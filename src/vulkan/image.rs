use std::sync::Arc;

use ash::vk;
use log::debug;

use super::{
    allocator::{Allocator, MemoryLocation},
    buffer::Buffer,
    command::QueueType,
    context::GpuContext,
};
use crate::{RendererError, Result};

pub const HDR_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Creation parameters for an image and its default view.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub array_layers: u32,
    /// `CUBE` needs six layers and makes the image cube compatible.
    pub view_type: vk::ImageViewType,
}

impl ImageDesc {
    pub fn color_target(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            array_layers: 1,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }

    pub fn depth_target(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            format: DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            array_layers: 1,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }

    /// Multisampled attachment. Only its resolve target is ever sampled.
    pub fn multisampled(self, samples: vk::SampleCountFlags) -> Self {
        Self {
            samples,
            usage: self.usage & !vk::ImageUsageFlags::SAMPLED,
            ..self
        }
    }

    /// Six square faces filled by transfer and sampled as a cube.
    pub fn cube(size: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            format,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            array_layers: CUBE_FACE_COUNT,
            view_type: vk::ImageViewType::CUBE,
        }
    }

    fn create_flags(&self) -> vk::ImageCreateFlags {
        if self.view_type == vk::ImageViewType::CUBE {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        }
    }

    fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            layer_count: self.array_layers,
            ..subresource_range(self.aspect, 0, self.mip_levels)
        }
    }
}

pub const CUBE_FACE_COUNT: u32 = 6;

/// Number of mip levels in a full chain down to 1x1.
pub fn full_mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Owning image view over an image owned elsewhere (e.g. a swapchain image).
pub struct ImageView {
    device: Arc<ash::Device>,
    view: vk::ImageView,
}

impl ImageView {
    pub fn new(
        device: Arc<ash::Device>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<Self> {
        Self::with_range(
            device,
            image,
            format,
            vk::ImageViewType::TYPE_2D,
            subresource_range(aspect, 0, mip_levels),
        )
    }

    pub fn with_range(
        device: Arc<ash::Device>,
        image: vk::Image,
        format: vk::Format,
        view_type: vk::ImageViewType,
        range: vk::ImageSubresourceRange,
    ) -> Result<Self> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(range);
        let view = unsafe { device.create_image_view(&info, None) }?;
        Ok(Self { device, view })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.destroy_image_view(self.view, None) };
    }
}

/// Owning image, its allocation and a view covering every mip level.
pub struct Image {
    allocator: Arc<Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: Option<ImageView>,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: Arc<ash::Device>, allocator: Arc<Allocator>, desc: ImageDesc) -> Result<Self> {
        let info = vk::ImageCreateInfo::default()
            .flags(desc.create_flags())
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, mut allocation) = allocator.create_image(&info, MemoryLocation::GpuOnly)?;

        let view = match ImageView::with_range(
            device,
            image,
            desc.format,
            desc.view_type,
            desc.full_range(),
        ) {
            Ok(view) => view,
            Err(e) => {
                allocator.destroy_image(image, &mut allocation);
                return Err(e);
            }
        };

        Ok(Self {
            allocator,
            image,
            allocation,
            view: Some(view),
            desc,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.as_ref().map_or(vk::ImageView::null(), ImageView::handle)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.view.take();
        self.allocator
            .destroy_image(self.image, &mut self.allocation);
    }
}

/// Owning sampler.
pub struct Sampler {
    device: Arc<ash::Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Trilinear sampler; `repeat` selects wrap vs clamp addressing.
    pub fn linear(
        device: Arc<ash::Device>,
        repeat: bool,
        max_lod: f32,
        anisotropy: Option<f32>,
    ) -> Result<Self> {
        let address_mode = if repeat {
            vk::SamplerAddressMode::REPEAT
        } else {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        };

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(max_lod)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);

        let sampler = unsafe { device.create_sampler(&info, None) }?;
        Ok(Self { device, sampler })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}

/// Sampled image uploaded from CPU pixels.
pub struct Texture {
    // Sampler first so it is released before the image it samples.
    sampler: Sampler,
    image: Image,
}

impl Texture {
    /// Uploads tightly packed RGBA8 pixels. Mip levels are generated with
    /// linear blits when `generate_mips` is set and the format allows it.
    pub fn from_rgba8(
        ctx: &GpuContext,
        width: u32,
        height: u32,
        pixels: &[u8],
        format: vk::Format,
        generate_mips: bool,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RendererError::VulkanError(format!(
                "Texture data is {} bytes, expected {expected} for {width}x{height} RGBA8",
                pixels.len()
            )));
        }

        let device = ctx.device.device.clone();
        let blit_supported = ctx.supports_linear_blit(format);
        let mip_levels = if generate_mips && blit_supported {
            full_mip_count(width, height)
        } else {
            1
        };

        let extent = vk::Extent2D { width, height };
        let image = Image::new(
            device.clone(),
            ctx.allocator.clone(),
            ImageDesc {
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
                mip_levels,
                ..ImageDesc::color_target(extent, format)
            },
        )?;

        let staging = Buffer::staging(ctx.allocator.clone(), pixels)?;

        // Layout transitions into FRAGMENT_SHADER need a graphics-capable queue.
        ctx.command_pools
            .submit_once(QueueType::Graphics, |device, cmd| unsafe {
                transition(
                    device,
                    cmd,
                    image.handle(),
                    subresource_range(vk::ImageAspectFlags::COLOR, 0, mip_levels),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );

                let region = vk::BufferImageCopy::default()
                    .image_subresource(subresource_layers(0))
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    });
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                record_mip_chain(device, cmd, image.handle(), width, height, mip_levels);
            })?;

        debug!("Uploaded {width}x{height} texture ({mip_levels} mips, {format:?})");

        let anisotropy = ctx.device.max_sampler_anisotropy().min(8.0);
        let sampler = Sampler::linear(
            device,
            true,
            mip_levels as f32,
            (anisotropy > 1.0).then_some(anisotropy),
        )?;

        Ok(Self { sampler, image })
    }

    /// 1x1 texture of a single color, used for missing material slots.
    pub fn solid(ctx: &GpuContext, rgba: [u8; 4], format: vk::Format) -> Result<Self> {
        Self::from_rgba8(ctx, 1, 1, &rgba, format, false)
    }

    /// Uploads six RGBA16F faces laid out back to back in layer order
    /// (+X, -X, +Y, -Y, +Z, -Z) into a cube map sampled with clamped edges.
    pub fn cube_from_rgba16f(ctx: &GpuContext, size: u32, texels: &[half::f16]) -> Result<Self> {
        let expected = (size as usize).pow(2) * 4 * CUBE_FACE_COUNT as usize;
        if size == 0 || texels.len() != expected {
            return Err(RendererError::VulkanError(format!(
                "Cube map data has {} texels, expected {expected} for six {size}x{size} faces",
                texels.len()
            )));
        }

        let device = ctx.device.device.clone();
        let desc = ImageDesc::cube(size, HDR_COLOR_FORMAT);
        let image = Image::new(device.clone(), ctx.allocator.clone(), desc)?;
        let staging = Buffer::staging(ctx.allocator.clone(), bytemuck::cast_slice(texels))?;

        ctx.command_pools
            .submit_once(QueueType::Graphics, |device, cmd| unsafe {
                transition(
                    device,
                    cmd,
                    image.handle(),
                    desc.full_range(),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );

                let region = vk::BufferImageCopy::default()
                    .image_subresource(vk::ImageSubresourceLayers {
                        layer_count: CUBE_FACE_COUNT,
                        ..subresource_layers(0)
                    })
                    .image_extent(vk::Extent3D {
                        width: size,
                        height: size,
                        depth: 1,
                    });
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                transition(
                    device,
                    cmd,
                    image.handle(),
                    desc.full_range(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })?;

        debug!("Uploaded {size}x{size} cube map");

        let sampler = Sampler::linear(device, false, 0.0, None)?;
        Ok(Self { sampler, image })
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

pub fn subresource_range(
    aspect: vk::ImageAspectFlags,
    base_mip: u32,
    level_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: base_mip,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn subresource_layers(mip_level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    }
}

unsafe fn transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, src_stage) = match old_layout {
        vk::ImageLayout::UNDEFINED => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
    };

    let (dst_access, dst_stage) = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    };

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

/// Blits each level into the next and leaves the whole chain in
/// SHADER_READ_ONLY_OPTIMAL. Level 0 must be in TRANSFER_DST_OPTIMAL.
unsafe fn record_mip_chain(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let color = vk::ImageAspectFlags::COLOR;
    let (mut mip_width, mut mip_height) = (width as i32, height as i32);

    for level in 1..mip_levels {
        transition(
            device,
            cmd,
            image,
            subresource_range(color, level - 1, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);
        let blit = vk::ImageBlit::default()
            .src_subresource(subresource_layers(level - 1))
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .dst_subresource(subresource_layers(level))
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ]);

        device.cmd_blit_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[blit],
            vk::Filter::LINEAR,
        );

        transition(
            device,
            cmd,
            image,
            subresource_range(color, level - 1, 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        mip_width = next_width;
        mip_height = next_height;
    }

    transition(
        device,
        cmd,
        image,
        subresource_range(color, mip_levels - 1, 1),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_covers_largest_dimension() {
        assert_eq!(full_mip_count(1, 1), 1);
        assert_eq!(full_mip_count(2, 1), 2);
        assert_eq!(full_mip_count(256, 256), 9);
        assert_eq!(full_mip_count(1024, 300), 11);
        assert_eq!(full_mip_count(0, 0), 1);
    }

    #[test]
    fn cube_desc_covers_six_layers() {
        let desc = ImageDesc::cube(256, HDR_COLOR_FORMAT);
        assert_eq!(desc.array_layers, 6);
        assert_eq!(desc.view_type, vk::ImageViewType::CUBE);
        assert_eq!(desc.create_flags(), vk::ImageCreateFlags::CUBE_COMPATIBLE);
        assert_eq!(desc.full_range().layer_count, 6);
        assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn multisampled_targets_are_not_sampled() {
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let desc = ImageDesc::color_target(extent, HDR_COLOR_FORMAT)
            .multisampled(vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_4);
        assert!(!desc.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(desc.create_flags().is_empty());
    }
}
