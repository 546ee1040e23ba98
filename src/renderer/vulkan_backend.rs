//! [`RenderBackend`] on a real Vulkan device.

use std::{collections::HashMap, path::Path};

use ash::vk;
use log::{debug, info, warn};
use uuid::Uuid;

use super::{
    asset::{AssetData, Transform, TransformUniform},
    asset_resources::{AssetGpu, FallbackTextures},
    backend::RenderBackend,
    camera::CameraData,
    environment::{load_equirect, CubeMapData},
    frame::{AssetFrameData, BloomChain, FrameData, FrameStage, HdrTarget, SwapImageData},
    orchestrator::Renderer,
    passes::{
        begin_render_pass, BloomPass, DrawData, Pass, PassInputs, PassResources, SkyPass,
        SurfacePass, SurfaceSet, ToneMapPass,
    },
};
use crate::{
    assets::{DirectoryShaderProvider, ShaderProvider},
    config::{RendererConfig, SkySettings},
    vulkan::{
        device::select_sample_count, AcquireOutcome, Buffer, DescriptorPool, Framebuffer,
        GpuContext, PipelineCache, PresentOutcome, QueueType, RenderPass, SetLayoutCache,
        SurfaceProvider, Swapchain, Texture, CUBE_FACE_COUNT,
    },
    RendererError, Result,
};

/// Render passes shared by the stages. The HDR and bloom pairs differ only in
/// load behavior and are compatible with each other's framebuffers.
struct RenderPasses {
    hdr_clear: RenderPass,
    hdr_load: RenderPass,
    bloom_down: RenderPass,
    bloom_up: RenderPass,
    display: RenderPass,
}

/// Sets and descriptors the shared pool must hold for `config`.
///
/// Per asset: one material set and a transform set per frame slot. Per slot:
/// the sky set (camera and environment cube), the surface camera set, the
/// bloom chain's down and up sets and the tone-map set, the latter twice over
/// so the tone-map pass can be rebuilt before its predecessor is released.
pub fn descriptor_pool_sizes(config: &RendererConfig) -> (u32, [vk::DescriptorPoolSize; 2]) {
    let frames = config.frames_in_flight as u32;
    let assets = config.max_asset_count;
    let bloom_sets = 2 * config.bloom.mip_levels - 1;
    let material_samplers = super::asset::MaterialTextureSlot::COUNT as u32;

    let max_sets = assets * (1 + frames) + frames * (2 + bloom_sets + 2);
    let uniforms = assets * frames + 2 * frames;
    let samplers = assets * material_samplers + frames * (bloom_sets + 2 * 2 + 1);

    (
        max_sets,
        [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: uniforms,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: samplers,
            },
        ],
    )
}

fn surface_pass(passes: &[Pass]) -> Result<&SurfacePass> {
    match passes.get(FrameStage::Surface.index()) {
        Some(Pass::Surface(pass)) => Ok(pass),
        _ => Err(RendererError::InvalidState("surface pass missing".into())),
    }
}

/// The configured environment as an uploaded cube, or a black 1x1 cube and
/// `false` when none is configured. A configured map that fails to load is
/// an error.
fn environment_texture(ctx: &GpuContext, sky: &SkySettings) -> Result<(Texture, bool)> {
    let Some(path) = &sky.environment_map else {
        let texels = [half::f16::ZERO, half::f16::ZERO, half::f16::ZERO, half::f16::ONE]
            .repeat(CUBE_FACE_COUNT as usize);
        return Ok((Texture::cube_from_rgba16f(ctx, 1, &texels)?, false));
    };

    let cube = CubeMapData::from_equirect(&load_equirect(path)?, sky.cubemap_size)?;
    let texture = Texture::cube_from_rgba16f(ctx, cube.size(), &cube.to_rgba16f())?;
    info!(
        "Environment cube {}x{} from {}",
        cube.size(),
        cube.size(),
        path.display()
    );
    Ok((texture, true))
}

/// Owns the device and everything created from it.
///
/// Field order is drop order: command buffers, sets and images go before the
/// passes, the passes before the pool and layouts, and the context last.
pub struct VulkanBackend {
    swap_images: Vec<SwapImageData>,
    frames: Vec<FrameData>,
    assets: HashMap<Uuid, AssetGpu>,
    fallbacks: FallbackTextures,
    environment: Texture,
    /// Indexed by [`FrameStage`].
    passes: Vec<Pass>,
    render_passes: RenderPasses,
    swapchain: Option<Swapchain>,
    pipeline_cache: PipelineCache,
    layout_cache: SetLayoutCache,
    descriptor_pool: DescriptorPool,
    shaders: Box<dyn ShaderProvider>,
    config: RendererConfig,
    extent: vk::Extent2D,
    /// Format the display render pass was built for.
    display_format: vk::Format,
    ctx: GpuContext,
}

impl VulkanBackend {
    pub fn new<S: SurfaceProvider>(
        surface_provider: &S,
        config: RendererConfig,
        shaders: Box<dyn ShaderProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let ctx = GpuContext::new(surface_provider, config.enable_validation)?;
        let device = ctx.raw_device().clone();
        let swapchain = Swapchain::new(&ctx, surface_provider.extent())?;

        let samples = select_sample_count(config.msaa, ctx.device.framebuffer_sample_counts());
        info!("HDR targets use {} sample(s)", samples.as_raw());

        let render_passes = RenderPasses {
            hdr_clear: RenderPass::hdr(device.clone(), true, samples)?,
            hdr_load: RenderPass::hdr(device.clone(), false, samples)?,
            bloom_down: RenderPass::bloom(device.clone(), false)?,
            bloom_up: RenderPass::bloom(device.clone(), true)?,
            display: RenderPass::display(device.clone(), swapchain.format())?,
        };

        let (max_sets, sizes) = descriptor_pool_sizes(&config);
        let descriptor_pool = DescriptorPool::new(device.clone(), max_sets, &sizes)?;
        let mut layout_cache = SetLayoutCache::new();
        let pipeline_cache = PipelineCache::new(device.clone(), config.pipeline_cache_path.clone())?;
        let (environment, environment_loaded) = environment_texture(&ctx, &config.sky)?;

        let passes = {
            let mut res = PassResources {
                device: &device,
                allocator: &ctx.allocator,
                descriptor_pool: &descriptor_pool,
                layout_cache: &mut layout_cache,
                pipeline_cache: &pipeline_cache,
                shaders: shaders.as_ref(),
                frames_in_flight: config.frames_in_flight,
            };
            vec![
                Pass::Sky(SkyPass::new(
                    &mut res,
                    &render_passes.hdr_clear,
                    &config.sky,
                    &environment,
                    environment_loaded,
                )?),
                Pass::Surface(SurfacePass::new(
                    &mut res,
                    &render_passes.hdr_load,
                    swapchain.extent(),
                )?),
                Pass::Bloom(BloomPass::new(
                    &mut res,
                    &render_passes.bloom_down,
                    &render_passes.bloom_up,
                    &config.bloom,
                )?),
                Pass::ToneMap(ToneMapPass::new(
                    &mut res,
                    &render_passes.display,
                    &config.tone_map,
                    &config.bloom,
                )?),
            ]
        };
        debug!("{} descriptor set layouts after pass creation", layout_cache.len());

        let fallbacks = FallbackTextures::new(&ctx)?;
        let frames = (0..config.frames_in_flight)
            .map(|_| FrameData::new(&device, &ctx.command_pools))
            .collect::<Result<Vec<_>>>()?;

        let mut backend = Self {
            swap_images: Vec::new(),
            frames,
            assets: HashMap::new(),
            fallbacks,
            environment,
            passes,
            render_passes,
            swapchain: None,
            pipeline_cache,
            layout_cache,
            descriptor_pool,
            shaders,
            config,
            extent: vk::Extent2D::default(),
            display_format: swapchain.format(),
            ctx,
        };
        backend.build_swap_dependents(swapchain)?;
        Ok(backend)
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn swapchain_format(&self) -> Option<vk::Format> {
        self.swapchain.as_ref().map(Swapchain::format)
    }

    /// Replaces the sky's environment with the equirectangular image at
    /// `path`. Waits for the device to go idle first.
    pub fn load_environment(&mut self, path: &Path) -> Result<()> {
        let mut sky = self.config.sky.clone();
        sky.environment_map = Some(path.to_path_buf());
        sky.cubemap_size = sky.cubemap_size.clamp(1, crate::config::MAX_CUBEMAP_SIZE);
        let (environment, loaded) = environment_texture(&self.ctx, &sky)?;

        self.wait_idle()?;
        match self.passes.get_mut(FrameStage::Sky.index()) {
            Some(Pass::Sky(pass)) => {
                pass.set_environment(&environment, loaded, sky.environment_intensity)
            }
            _ => return Err(RendererError::InvalidState("sky pass missing".into())),
        }
        self.environment = environment;
        self.config.sky = sky;
        Ok(())
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RendererError::InvalidState("swap chain has been torn down".into()))
    }

    /// Creates the per-image targets and per-slot bloom chains for `swapchain`
    /// and takes ownership of it.
    fn build_swap_dependents(&mut self, swapchain: Swapchain) -> Result<()> {
        let device = self.ctx.raw_device().clone();
        let allocator = self.ctx.allocator.clone();
        let extent = swapchain.extent();

        let mut swap_images = Vec::with_capacity(swapchain.image_count());
        for index in 0..swapchain.image_count() {
            let hdr = HdrTarget::new(&device, &allocator, &self.render_passes.hdr_load, extent)?;
            let display_framebuffer = Framebuffer::new(
                device.clone(),
                &self.render_passes.display,
                &[swapchain.view(index)],
                extent,
            )?;
            swap_images.push(SwapImageData {
                secondaries: HashMap::new(),
                display_framebuffer,
                hdr,
            });
        }

        for frame in &mut self.frames {
            frame.bloom_chain = BloomChain::new(
                &device,
                &allocator,
                &self.render_passes.bloom_down,
                extent,
                self.config.bloom.mip_levels,
            )?;
        }

        for pass in &mut self.passes {
            pass.reset_inputs();
            if let Pass::Surface(surface) = pass {
                surface.set_extent(extent);
            }
        }

        self.swap_images = swap_images;
        self.extent = extent;
        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// The display render pass is tied to the surface format; rebuild it and
    /// the tone-map pass when the format changes.
    fn rebuild_display_pass(&mut self, format: vk::Format) -> Result<()> {
        info!("Surface format changed to {format:?}, rebuilding tone-map pass");
        let device = self.ctx.raw_device().clone();
        let display = RenderPass::display(device.clone(), format)?;

        let tone_map = {
            let mut res = PassResources {
                device: &device,
                allocator: &self.ctx.allocator,
                descriptor_pool: &self.descriptor_pool,
                layout_cache: &mut self.layout_cache,
                pipeline_cache: &self.pipeline_cache,
                shaders: self.shaders.as_ref(),
                frames_in_flight: self.config.frames_in_flight,
            };
            ToneMapPass::new(&mut res, &display, &self.config.tone_map, &self.config.bloom)?
        };

        self.passes[FrameStage::ToneMap.index()] = Pass::ToneMap(tone_map);
        self.render_passes.display = display;
        self.display_format = format;
        Ok(())
    }

    /// Records the primary buffer of one stage.
    fn record_stage(
        &self,
        stage: FrameStage,
        slot: usize,
        swap: &SwapImageData,
        visible: &[Uuid],
    ) -> Result<()> {
        let device = self.ctx.raw_device();
        let command = self.frames[slot].command(stage);
        command.reset()?;
        command.begin_primary()?;
        let cmd = command.handle();

        match stage {
            FrameStage::Surface => {
                // The render pass always runs, even with nothing visible, so
                // the HDR target reaches the layout bloom samples it in.
                let secondaries: Vec<vk::CommandBuffer> = visible
                    .iter()
                    .filter_map(|uuid| {
                        let secondary = swap.secondaries.get(uuid);
                        if secondary.is_none() {
                            warn!("No surface commands recorded for asset {uuid}");
                        }
                        secondary.map(|buffer| buffer.handle())
                    })
                    .collect();

                unsafe {
                    begin_render_pass(
                        device,
                        cmd,
                        self.render_passes.hdr_load.handle(),
                        swap.hdr.target(),
                        &[],
                        vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
                    );
                    if !secondaries.is_empty() {
                        device.cmd_execute_commands(cmd, &secondaries);
                    }
                    device.cmd_end_render_pass(cmd);
                }
            }
            _ => unsafe {
                self.passes[stage.index()].draw(device, cmd, slot, &DrawData::fullscreen());
            },
        }

        command.end()
    }
}

impl RenderBackend for VulkanBackend {
    fn swap_image_count(&self) -> usize {
        self.swap_images.len()
    }

    fn swap_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_frame(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].in_flight.wait()
    }

    fn reset_frame(&mut self, slot: usize) -> Result<()> {
        self.frames[slot].in_flight.reset()
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frames[slot].image_acquired.handle();
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn update_camera(&mut self, slot: usize, camera: &CameraData) -> Result<()> {
        for pass in &mut self.passes {
            match pass {
                Pass::Sky(sky) => sky.write_camera(slot, camera)?,
                Pass::Surface(surface) => surface.write_camera(slot, camera)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn update_asset_transform(
        &mut self,
        slot: usize,
        asset: Uuid,
        transform: &Transform,
    ) -> Result<()> {
        let data = self.frames[slot].assets.get_mut(&asset).ok_or_else(|| {
            RendererError::InvalidState(format!("no transform uniform for asset {asset}"))
        })?;
        data.transform
            .write(std::slice::from_ref(&TransformUniform::from(transform)))
    }

    fn record_asset_commands(&mut self, slot: usize, image: usize, asset: Uuid) -> Result<()> {
        let surface = surface_pass(&self.passes)?;
        let gpu = self.assets.get(&asset).ok_or_else(|| {
            RendererError::InvalidState(format!("no GPU resources for asset {asset}"))
        })?;
        let frame_data = self.frames[slot].assets.get(&asset).ok_or_else(|| {
            RendererError::InvalidState(format!("no frame data for asset {asset}"))
        })?;
        let swap = &mut self.swap_images[image];

        let secondary = match swap.secondaries.entry(asset) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let buffer = entry.into_mut();
                buffer.reset()?;
                buffer
            }
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(
                self.ctx
                    .command_pools
                    .allocate(QueueType::Graphics, vk::CommandBufferLevel::SECONDARY)?,
            ),
        };

        secondary.begin_secondary(surface.render_pass(), swap.hdr.framebuffer.handle())?;
        let device = self.ctx.raw_device();
        for mesh in &gpu.meshes {
            let data = DrawData::indexed(
                mesh.vertices.handle(),
                mesh.indices.handle(),
                mesh.index_count,
                gpu.material_set.handle(),
                frame_data.set.handle(),
            );
            unsafe {
                self.passes[FrameStage::Surface.index()].draw(
                    device,
                    secondary.handle(),
                    slot,
                    &data,
                )
            };
        }
        secondary.end()
    }

    fn record_frame(&mut self, slot: usize, image: usize, visible: &[Uuid]) -> Result<()> {
        let swap = &self.swap_images[image];
        let inputs = PassInputs {
            hdr_view: swap.hdr.color.view(),
            hdr_target: swap.hdr.target(),
            display_target: swap.display_target(),
            bloom_chain: &self.frames[slot].bloom_chain,
        };
        for pass in &mut self.passes {
            pass.update_descriptor_sets(slot, &inputs);
        }

        for stage in FrameStage::ALL {
            self.record_stage(stage, slot, &self.swap_images[image], visible)?;
        }
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize, _image: usize) -> Result<()> {
        let frame = &self.frames[slot];
        let commands = FrameStage::ALL.map(|stage| [frame.command(stage).handle()]);
        let waits = FrameStage::ALL.map(|stage| [frame.wait_semaphore(stage)]);
        let wait_stages = FrameStage::ALL.map(|stage| [stage.wait_stage()]);
        let signals = FrameStage::ALL.map(|stage| [frame.signal_semaphore(stage)]);

        let submits: Vec<vk::SubmitInfo> = FrameStage::ALL
            .iter()
            .map(|stage| {
                let i = stage.index();
                vk::SubmitInfo::default()
                    .wait_semaphores(&waits[i])
                    .wait_dst_stage_mask(&wait_stages[i])
                    .command_buffers(&commands[i])
                    .signal_semaphores(&signals[i])
            })
            .collect();

        // The fence signals once the last batch (tone mapping) completes.
        unsafe {
            self.ctx.raw_device().queue_submit(
                self.ctx.device.graphics_queue,
                &submits,
                frame.in_flight.handle(),
            )
        }
        .map_err(|e| RendererError::VulkanError(format!("Frame submission failed: {e}")))
    }

    fn present(&mut self, slot: usize, image: usize) -> Result<PresentOutcome> {
        let wait = self.frames[slot].render_finished();
        self.swapchain()?
            .present(self.ctx.device.present_queue, wait, image as u32)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn destroy_swap_resources(&mut self) {
        self.swap_images.clear();
        for frame in &mut self.frames {
            frame.bloom_chain = BloomChain::default();
        }
        for pass in &mut self.passes {
            pass.reset_inputs();
        }
        self.swapchain = None;
    }

    fn create_swap_resources(&mut self, desired: vk::Extent2D) -> Result<()> {
        let swapchain = Swapchain::new(&self.ctx, desired)?;
        if swapchain.format() != self.display_format {
            self.rebuild_display_pass(swapchain.format())?;
        }
        self.build_swap_dependents(swapchain)
    }

    fn create_asset_resources(&mut self, asset: &AssetData) -> Result<()> {
        let surface = surface_pass(&self.passes)?;
        let material_set = surface.allocate_set(&self.descriptor_pool, SurfaceSet::Material)?;
        let gpu = AssetGpu::new(
            &self.ctx,
            asset,
            &self.config.texture_dir,
            &self.fallbacks,
            material_set,
        )?;

        let mut per_frame = Vec::with_capacity(self.frames.len());
        for _ in 0..self.frames.len() {
            let transform = Buffer::uniform(
                self.ctx.allocator.clone(),
                &TransformUniform::from(&Transform::default()),
            )?;
            let set = surface.allocate_set(&self.descriptor_pool, SurfaceSet::Transform)?;
            set.write()
                .uniform(0, transform.handle(), transform.size())
                .submit();
            per_frame.push(AssetFrameData { set, transform });
        }

        debug!(
            "'{}': {} meshes, {} material textures loaded",
            asset.name,
            gpu.meshes.len(),
            gpu.loaded_texture_count()
        );

        for (frame, data) in self.frames.iter_mut().zip(per_frame) {
            frame.assets.insert(asset.uuid, data);
        }
        self.assets.insert(asset.uuid, gpu);
        Ok(())
    }

    fn destroy_asset_resources(&mut self, asset: Uuid) {
        for swap in &mut self.swap_images {
            swap.secondaries.remove(&asset);
        }
        for frame in &mut self.frames {
            frame.assets.remove(&asset);
        }
        self.assets.remove(&asset);
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("wait_idle before teardown failed: {e}");
        }
        self.layout_cache.destroy_all();
    }
}

impl Renderer<VulkanBackend> {
    /// Brings up the device, swap chain and passes for `surface_provider` and
    /// wraps them in a renderer. Shaders are read from `config.shader_dir`.
    pub fn initialize<S: SurfaceProvider>(surface_provider: &S, config: RendererConfig) -> Result<Self> {
        let shaders = Box::new(DirectoryShaderProvider::new(config.shader_dir.clone()));
        let backend = VulkanBackend::new(surface_provider, config.clone(), shaders)?;
        Renderer::with_backend(backend, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_every_asset_and_pass_set() {
        let config = RendererConfig::default();
        let (max_sets, sizes) = descriptor_pool_sizes(&config);

        // 100 assets x (material + 2 transforms) + 2 slots x (2 camera + 9 bloom + 2 tone map)
        assert_eq!(max_sets, 300 + 26);
        assert_eq!(sizes[0].descriptor_count, 200 + 4);
        // Per slot: 9 bloom inputs, 2 tone-map sets of 2 and the sky cube.
        assert_eq!(sizes[1].descriptor_count, 500 + 2 * (9 + 4 + 1));
    }

    #[test]
    fn pool_grows_with_frames_in_flight() {
        let two = descriptor_pool_sizes(&RendererConfig::default()).0;
        let three = descriptor_pool_sizes(&RendererConfig {
            frames_in_flight: 3,
            ..RendererConfig::default()
        })
        .0;
        assert!(three > two);
    }
}
