//! Per-frame-slot and per-swap-image resource bundles.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use uuid::Uuid;

use super::passes::{bloom::level_extent, PassTarget};
use crate::{
    vulkan::{
        Allocator, Buffer, CommandBuffer, CommandPools, DescriptorSet, Fence, Framebuffer, Image,
        ImageDesc, QueueType, RenderPass, Semaphore, HDR_COLOR_FORMAT,
    },
    Result,
};

/// Stages of a frame, in submission order. Each has its own primary command
/// buffer and signals its own completion semaphore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameStage {
    Sky,
    Surface,
    Bloom,
    ToneMap,
}

impl FrameStage {
    pub const COUNT: usize = 4;
    pub const ALL: [FrameStage; Self::COUNT] = [
        FrameStage::Sky,
        FrameStage::Surface,
        FrameStage::Bloom,
        FrameStage::ToneMap,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameStage::Sky => "sky",
            FrameStage::Surface => "surface",
            FrameStage::Bloom => "bloom",
            FrameStage::ToneMap => "tone map",
        }
    }

    /// Pipeline stage at which this stage first touches the previous stage's
    /// output (or, for the sky, the freshly acquired swap image).
    pub fn wait_stage(self) -> vk::PipelineStageFlags {
        match self {
            FrameStage::Sky => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            FrameStage::Surface => {
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            }
            FrameStage::Bloom => vk::PipelineStageFlags::FRAGMENT_SHADER,
            FrameStage::ToneMap => {
                vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            }
        }
    }
}

/// One level of a bloom mip chain.
pub struct BloomLevel {
    framebuffer: Framebuffer,
    image: Image,
}

impl BloomLevel {
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    pub fn target(&self) -> PassTarget {
        PassTarget {
            framebuffer: self.framebuffer.handle(),
            extent: self.framebuffer.extent(),
        }
    }
}

/// Successively halved HDR images the bloom stage renders into.
#[derive(Default)]
pub struct BloomChain {
    levels: Vec<BloomLevel>,
}

impl BloomChain {
    /// `render_pass` may be either bloom render pass; they are compatible.
    pub fn new(
        device: &Arc<ash::Device>,
        allocator: &Arc<Allocator>,
        render_pass: &RenderPass,
        source: vk::Extent2D,
        level_count: u32,
    ) -> Result<Self> {
        let mut levels = Vec::with_capacity(level_count as usize);
        for level in 0..level_count {
            let extent = level_extent(source, level);
            let image = Image::new(
                device.clone(),
                allocator.clone(),
                ImageDesc::color_target(extent, HDR_COLOR_FORMAT),
            )?;
            let framebuffer = Framebuffer::new(device.clone(), render_pass, &[image.view()], extent)?;
            levels.push(BloomLevel { framebuffer, image });
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[BloomLevel] {
        &self.levels
    }
}

/// Transform uniform and its descriptor set, one per asset per frame slot.
pub struct AssetFrameData {
    pub set: DescriptorSet,
    pub transform: Buffer,
}

/// Everything that belongs to one frame in flight.
pub struct FrameData {
    pub commands: [CommandBuffer; FrameStage::COUNT],
    pub image_acquired: Semaphore,
    /// `stage_complete[i]` is signaled when stage `i` finishes.
    pub stage_complete: [Semaphore; FrameStage::COUNT],
    pub in_flight: Fence,
    pub bloom_chain: BloomChain,
    pub assets: HashMap<Uuid, AssetFrameData>,
}

impl FrameData {
    pub fn new(device: &Arc<ash::Device>, pools: &CommandPools) -> Result<Self> {
        let primary = || pools.allocate(QueueType::Graphics, vk::CommandBufferLevel::PRIMARY);
        let semaphore = || Semaphore::new(device.clone());

        Ok(Self {
            commands: [primary()?, primary()?, primary()?, primary()?],
            image_acquired: semaphore()?,
            stage_complete: [semaphore()?, semaphore()?, semaphore()?, semaphore()?],
            // Signaled so the first wait on a fresh slot returns immediately.
            in_flight: Fence::new(device.clone(), true)?,
            bloom_chain: BloomChain::default(),
            assets: HashMap::new(),
        })
    }

    pub fn command(&self, stage: FrameStage) -> &CommandBuffer {
        &self.commands[stage.index()]
    }

    /// Semaphore the given stage waits on before executing.
    pub fn wait_semaphore(&self, stage: FrameStage) -> vk::Semaphore {
        match stage.index() {
            0 => self.image_acquired.handle(),
            i => self.stage_complete[i - 1].handle(),
        }
    }

    pub fn signal_semaphore(&self, stage: FrameStage) -> vk::Semaphore {
        self.stage_complete[stage.index()].handle()
    }

    /// Semaphore presentation waits on.
    pub fn render_finished(&self) -> vk::Semaphore {
        self.signal_semaphore(FrameStage::ToneMap)
    }
}

/// HDR color and depth a swap image's frame is rendered into before tone mapping.
pub struct HdrTarget {
    pub framebuffer: Framebuffer,
    /// Single-sample image later stages sample. With multisampling it is
    /// the resolve target of `multisampled`.
    pub color: Image,
    pub multisampled: Option<Image>,
    pub depth: Image,
}

impl HdrTarget {
    /// `render_pass` may be either HDR render pass; they are compatible. Its
    /// sample count decides whether a resolve target is created.
    pub fn new(
        device: &Arc<ash::Device>,
        allocator: &Arc<Allocator>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let samples = render_pass.samples();
        let color_desc = ImageDesc::color_target(extent, HDR_COLOR_FORMAT);

        let color = Image::new(device.clone(), allocator.clone(), color_desc)?;
        let multisampled = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(Image::new(
                device.clone(),
                allocator.clone(),
                color_desc.multisampled(samples),
            )?)
        };
        let depth = Image::new(
            device.clone(),
            allocator.clone(),
            ImageDesc::depth_target(extent).multisampled(samples),
        )?;

        let views = match &multisampled {
            Some(msaa) => vec![msaa.view(), depth.view(), color.view()],
            None => vec![color.view(), depth.view()],
        };
        let framebuffer = Framebuffer::new(device.clone(), render_pass, &views, extent)?;
        Ok(Self {
            framebuffer,
            color,
            multisampled,
            depth,
        })
    }

    pub fn target(&self) -> PassTarget {
        PassTarget {
            framebuffer: self.framebuffer.handle(),
            extent: self.framebuffer.extent(),
        }
    }
}

/// Everything that belongs to one presentable image. Rebuilt as a whole when
/// the swap chain is recreated.
pub struct SwapImageData {
    /// Per-asset surface draws, recorded against `hdr`'s framebuffer.
    pub secondaries: HashMap<Uuid, CommandBuffer>,
    pub display_framebuffer: Framebuffer,
    pub hdr: HdrTarget,
}

impl SwapImageData {
    pub fn display_target(&self) -> PassTarget {
        PassTarget {
            framebuffer: self.display_framebuffer.handle(),
            extent: self.display_framebuffer.extent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_in_submission_order() {
        let indices: Vec<_> = FrameStage::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn only_the_sky_waits_on_acquisition() {
        assert_eq!(
            FrameStage::Sky.wait_stage(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert!(FrameStage::Bloom
            .wait_stage()
            .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }
}
