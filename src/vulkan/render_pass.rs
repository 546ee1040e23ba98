use std::sync::Arc;

use ash::vk;

use super::image::{DEPTH_FORMAT, HDR_COLOR_FORMAT};
use crate::{RendererError, Result};

/// Format, load/store behavior and layouts of one attachment.
#[derive(Clone, Copy, Debug)]
pub struct AttachmentSpec {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentSpec {
    fn description(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Owning single-subpass render pass.
pub struct RenderPass {
    device: Arc<ash::Device>,
    render_pass: vk::RenderPass,
    has_depth: bool,
    samples: vk::SampleCountFlags,
}

impl RenderPass {
    /// Single subpass writing `color` and optionally `depth`, with `resolve`
    /// receiving the resolved `color` when it is multisampled. Attachments are
    /// numbered color, depth, resolve.
    ///
    /// External dependencies order the pass after earlier attachment writes and
    /// shader reads, and make its color output visible to later fragment reads.
    pub fn new(
        device: Arc<ash::Device>,
        color: AttachmentSpec,
        depth: Option<AttachmentSpec>,
        resolve: Option<AttachmentSpec>,
    ) -> Result<Self> {
        if resolve.is_some() && depth.is_none() {
            return Err(RendererError::VulkanError(
                "resolve attachment requires a depth attachment slot".into(),
            ));
        }

        let mut attachments = vec![color.description()];
        attachments.extend(depth.iter().chain(resolve.iter()).map(AttachmentSpec::description));

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let resolve_refs = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if depth.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        if resolve.is_some() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

        let dependencies = [
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
                .dst_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_access_mask(attachment_access | vk::AccessFlags::SHADER_READ),
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ),
        ];

        let subpasses = [subpass];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.create_render_pass(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create render pass: {e}"))
        })?;

        Ok(Self {
            device,
            render_pass,
            has_depth: depth.is_some(),
            samples: color.samples,
        })
    }

    /// HDR color + depth at `samples`. `clear` starts a frame (sky);
    /// otherwise the pass continues the target and leaves color ready for
    /// sampling (surfaces). Both variants share one framebuffer layout.
    pub fn hdr(device: Arc<ash::Device>, clear: bool, samples: vk::SampleCountFlags) -> Result<Self> {
        let attachments = hdr_attachments(clear, samples);
        Self::new(device, attachments.color, Some(attachments.depth), attachments.resolve)
    }

    /// One bloom level. Downsampling overwrites the level; upsampling
    /// accumulates into it.
    pub fn bloom(device: Arc<ash::Device>, accumulate: bool) -> Result<Self> {
        let color = if accumulate {
            AttachmentSpec {
                format: HDR_COLOR_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::LOAD,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        } else {
            AttachmentSpec {
                format: HDR_COLOR_FORMAT,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        };
        Self::new(device, color, None, None)
    }

    /// Presentable swap image, fully overwritten by the tone-map pass.
    pub fn display(device: Arc<ash::Device>, format: vk::Format) -> Result<Self> {
        Self::new(
            device,
            AttachmentSpec {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            },
            None,
            None,
        )
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn has_depth(&self) -> bool {
        self.has_depth
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

/// Attachments of the two HDR render passes.
#[derive(Clone, Copy, Debug)]
pub struct HdrAttachments {
    pub color: AttachmentSpec,
    pub depth: AttachmentSpec,
    /// Single-sample image the multisampled color resolves into.
    pub resolve: Option<AttachmentSpec>,
}

/// The sampled HDR image leaves the continuing pass in
/// SHADER_READ_ONLY_OPTIMAL. Without multisampling that is the color
/// attachment itself; otherwise the resolve target, and the multisampled
/// color is dropped once resolved.
pub fn hdr_attachments(clear: bool, samples: vk::SampleCountFlags) -> HdrAttachments {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;
    let (load_op, initial_layout) = if clear {
        (vk::AttachmentLoadOp::CLEAR, vk::ImageLayout::UNDEFINED)
    } else {
        (vk::AttachmentLoadOp::LOAD, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
    };
    let depth_initial = if clear {
        vk::ImageLayout::UNDEFINED
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    };

    let sampled_final = if clear {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    };

    let color = AttachmentSpec {
        format: HDR_COLOR_FORMAT,
        samples,
        load_op,
        store_op: if multisampled && !clear {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        initial_layout,
        final_layout: if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            sampled_final
        },
    };

    let depth = AttachmentSpec {
        format: DEPTH_FORMAT,
        samples,
        load_op,
        store_op: if clear {
            vk::AttachmentStoreOp::STORE
        } else {
            vk::AttachmentStoreOp::DONT_CARE
        },
        initial_layout: depth_initial,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let resolve = multisampled.then_some(AttachmentSpec {
        format: HDR_COLOR_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: if clear {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: sampled_final,
    });

    HdrAttachments {
        color,
        depth,
        resolve,
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Owning framebuffer.
pub struct Framebuffer {
    device: Arc<ash::Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(
        device: Arc<ash::Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.create_framebuffer(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create framebuffer: {e}"))
        })?;

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Render area covering the whole framebuffer.
    pub fn area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        }
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_hdr_has_no_resolve() {
        let sky = hdr_attachments(true, vk::SampleCountFlags::TYPE_1);
        let surfaces = hdr_attachments(false, vk::SampleCountFlags::TYPE_1);
        assert!(sky.resolve.is_none() && surfaces.resolve.is_none());
        assert_eq!(sky.color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(surfaces.color.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(surfaces.color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            surfaces.color.final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn multisampled_hdr_resolves_into_sampled_image() {
        let samples = vk::SampleCountFlags::TYPE_4;
        let sky = hdr_attachments(true, samples);
        let surfaces = hdr_attachments(false, samples);

        assert_eq!(sky.color.samples, samples);
        assert_eq!(sky.depth.samples, samples);
        // Sky output survives into the surface pass.
        assert_eq!(sky.color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(surfaces.color.initial_layout, sky.color.final_layout);
        assert_eq!(surfaces.color.store_op, vk::AttachmentStoreOp::DONT_CARE);

        let resolve = surfaces.resolve.expect("multisampled pass resolves");
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(resolve.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        // Both passes need the same attachment count to share a framebuffer.
        assert!(sky.resolve.is_some());
    }
}
