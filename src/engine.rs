//! Application-facing wrapper that owns a renderer, a first-person camera and
//! an asset loader, and enforces initialize → frames → shutdown ordering.

use std::path::Path;

use glam::Vec3;
use log::{error, info};
use uuid::Uuid;
use winit::event::KeyEvent;

use crate::{
    assets::AssetLoader,
    config::RendererConfig,
    renderer::{
        asset::Transform, backend::RenderBackend, orchestrator::Renderer, CameraController,
        VulkanBackend,
    },
    vulkan::SurfaceProvider,
    RendererError, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Running,
    ShutDown,
}

pub struct Engine<B: RenderBackend = VulkanBackend> {
    renderer: Option<Renderer<B>>,
    camera: CameraController,
    loader: Option<Box<dyn AssetLoader>>,
    config: RendererConfig,
    state: EngineState,
}

impl<B: RenderBackend> Engine<B> {
    /// Uses the glTF loader when the `gltf_loading` feature is enabled.
    pub fn new(config: RendererConfig) -> Self {
        #[cfg(feature = "gltf_loading")]
        let loader: Option<Box<dyn AssetLoader>> =
            Some(Box::new(crate::assets::GltfAssetLoader::new()));
        #[cfg(not(feature = "gltf_loading"))]
        let loader: Option<Box<dyn AssetLoader>> = None;

        Self {
            renderer: None,
            camera: CameraController::new(Vec3::new(0.0, 1.0, 5.0)),
            loader,
            config,
            state: EngineState::Uninitialized,
        }
    }

    pub fn with_loader(mut self, loader: impl AssetLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Takes over a renderer built on any backend.
    pub fn start(&mut self, renderer: Renderer<B>) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(RendererError::InvalidState(format!(
                "engine cannot start while {:?}",
                self.state
            )));
        }
        self.renderer = Some(renderer);
        self.state = EngineState::Running;
        info!("Engine running");
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn renderer(&self) -> Option<&Renderer<B>> {
        self.renderer.as_ref()
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    /// Moves the camera, hands its view to the renderer and reconciles any
    /// pending resize.
    pub fn update(&mut self, delta_time: f32) -> Result<()> {
        self.camera.update(delta_time);
        let (position, view) = (self.camera.position(), self.camera.view_matrix());
        let renderer = self.running_mut("update")?;
        renderer.update_camera_data(position, view);
        renderer.update(delta_time)
    }

    pub fn draw(&mut self) -> Result<()> {
        self.running_mut("draw")?.draw()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.take() else {
            error!("shutdown called while {:?}", self.state);
            return Err(RendererError::NotInitialized);
        };
        self.state = EngineState::ShutDown;
        renderer.shutdown()
    }

    /// Loads a file through the configured loader and uploads it. Loading the
    /// same path twice yields the same id and keeps the first upload.
    pub fn load_asset(&mut self, path: impl AsRef<Path>) -> Result<Uuid> {
        let path = path.as_ref();
        if self.renderer.is_none() {
            error!("load_asset({}) called while {:?}", path.display(), self.state);
            return Err(RendererError::NotInitialized);
        }
        let loader = self
            .loader
            .as_mut()
            .ok_or_else(|| RendererError::AssetLoad("no asset loader configured".into()))?;

        let asset = loader.load(path)?;
        self.running_mut("load_asset")?
            .create_asset_resources(&asset)?;
        Ok(asset.uuid)
    }

    pub fn unload_asset(&mut self, uuid: Uuid) -> Result<()> {
        self.running_mut("unload_asset")?
            .destroy_asset_resources(uuid)
    }

    pub fn set_camera_speed(&mut self, speed: f32) {
        self.camera.set_speed(speed);
    }

    pub fn set_camera_sensitivity(&mut self, sensitivity: f32) {
        self.camera.set_sensitivity(sensitivity);
    }

    /// Draws `uuid` in the next frame. Must be repeated every frame it should
    /// stay visible.
    pub fn show_asset(&mut self, uuid: Uuid) -> Result<()> {
        let renderer = self.running_mut("show_asset")?;
        if !renderer.has_asset(uuid) {
            error!("show_asset: unknown asset {uuid}");
            return Err(RendererError::InvalidAsset(format!("unknown asset {uuid}")));
        }
        renderer.set_asset_draw_state(uuid);
        Ok(())
    }

    pub fn update_asset_transform(
        &mut self,
        uuid: Uuid,
        position: Vec3,
        rotation: Vec3,
        scale: Vec3,
        is_degrees: bool,
    ) -> Result<()> {
        let transform = Transform {
            position,
            rotation: to_radians(rotation, is_degrees),
            scale,
        };
        self.running_mut("update_asset_transform")?
            .set_asset_transform(uuid, transform);
        Ok(())
    }

    pub fn update_asset_position(&mut self, uuid: Uuid, position: Vec3) -> Result<()> {
        self.running_mut("update_asset_position")?
            .set_asset_position(uuid, position);
        Ok(())
    }

    pub fn update_asset_rotation(
        &mut self,
        uuid: Uuid,
        rotation: Vec3,
        is_degrees: bool,
    ) -> Result<()> {
        self.running_mut("update_asset_rotation")?
            .set_asset_rotation(uuid, to_radians(rotation, is_degrees));
        Ok(())
    }

    pub fn update_asset_scale(&mut self, uuid: Uuid, scale: Vec3) -> Result<()> {
        self.running_mut("update_asset_scale")?
            .set_asset_scale(uuid, scale);
        Ok(())
    }

    /// Records the new window size; the swap chain follows on the next update.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.running_mut("resize")?
            .set_next_framebuffer_size(width, height);
        Ok(())
    }

    pub fn handle_key_event(&mut self, event: &KeyEvent) {
        self.camera.handle_key_event(event);
    }

    pub fn handle_mouse_motion(&mut self, delta: (f32, f32)) {
        self.camera.handle_mouse_motion(delta);
    }

    fn running_mut(&mut self, call: &str) -> Result<&mut Renderer<B>> {
        match self.renderer.as_mut() {
            Some(renderer) => Ok(renderer),
            None => {
                error!("{call} called while {:?}", self.state);
                Err(RendererError::NotInitialized)
            }
        }
    }
}

impl Engine<VulkanBackend> {
    /// Creates the GPU renderer for `surface_provider`. A size differing from
    /// the surface's current extent is applied on the first update.
    pub fn initialize<S: SurfaceProvider>(
        &mut self,
        surface_provider: &S,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if self.state != EngineState::Uninitialized {
            return Err(RendererError::InvalidState(format!(
                "engine cannot initialize while {:?}",
                self.state
            )));
        }

        let mut renderer = Renderer::initialize(surface_provider, self.config.clone())?;
        let extent = renderer.swap_extent();
        if (extent.width, extent.height) != (width, height) {
            renderer.set_next_framebuffer_size(width, height);
        }
        self.start(renderer)
    }

    /// Swaps the sky's environment for the equirectangular image at `path`.
    pub fn load_environment(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.running_mut("load_environment")?
            .backend_mut()
            .load_environment(path)?;
        info!("Sky environment set to {}", path.display());
        Ok(())
    }
}

fn to_radians(rotation: Vec3, is_degrees: bool) -> Vec3 {
    if is_degrees {
        Vec3::new(
            rotation.x.to_radians(),
            rotation.y.to_radians(),
            rotation.z.to_radians(),
        )
    } else {
        rotation
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::renderer::{AssetData, HeadlessBackend, MeshData, Vertex};

    struct FixedLoader {
        asset: AssetData,
    }

    impl AssetLoader for FixedLoader {
        fn load(&mut self, _path: &Path) -> Result<AssetData> {
            Ok(self.asset.clone())
        }
    }

    fn triangle() -> AssetData {
        AssetData {
            uuid: Uuid::new_v4(),
            name: "triangle".into(),
            meshes: vec![MeshData {
                vertices: vec![Vertex::default(); 3],
                indices: vec![0, 1, 2],
            }],
            materials: Vec::new(),
        }
    }

    fn running_engine(asset: AssetData) -> Engine<HeadlessBackend> {
        let config = RendererConfig::default();
        let backend = HeadlessBackend::new(
            config.frames_in_flight,
            3,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        );
        let renderer = Renderer::with_backend(backend, config.clone()).unwrap();
        let mut engine = Engine::new(config).with_loader(FixedLoader { asset });
        engine.start(renderer).unwrap();
        engine
    }

    #[test]
    fn calls_before_start_are_refused() {
        let mut engine: Engine<HeadlessBackend> = Engine::new(RendererConfig::default());
        assert!(matches!(engine.draw(), Err(RendererError::NotInitialized)));
        assert!(matches!(engine.update(0.016), Err(RendererError::NotInitialized)));
        assert!(matches!(
            engine.load_asset("model.gltf"),
            Err(RendererError::NotInitialized)
        ));
        assert!(matches!(engine.shutdown(), Err(RendererError::NotInitialized)));
    }

    #[test]
    fn calls_after_shutdown_are_refused() {
        let mut engine = running_engine(triangle());
        engine.shutdown().unwrap();
        assert_eq!(engine.state(), EngineState::ShutDown);
        assert!(matches!(engine.draw(), Err(RendererError::NotInitialized)));
        assert!(matches!(engine.resize(10, 10), Err(RendererError::NotInitialized)));
        assert!(engine.start(Renderer::with_backend(
            HeadlessBackend::new(2, 2, vk::Extent2D { width: 1, height: 1 }),
            RendererConfig::default(),
        )
        .unwrap())
        .is_err());
    }

    #[test]
    fn loaded_asset_is_drawn_when_shown() {
        let asset = triangle();
        let mut engine = running_engine(asset.clone());

        let uuid = engine.load_asset("triangle.gltf").unwrap();
        assert_eq!(uuid, asset.uuid);

        engine.show_asset(uuid).unwrap();
        engine.update(0.016).unwrap();
        engine.draw().unwrap();
        engine.draw().unwrap();

        let stats = engine.renderer().unwrap().backend().stats();
        assert_eq!(stats.submitted[0].visible, vec![uuid]);
        assert!(stats.submitted[1].visible.is_empty());
    }

    #[test]
    fn showing_an_unknown_asset_is_an_error() {
        let mut engine = running_engine(triangle());
        assert!(matches!(
            engine.show_asset(Uuid::new_v4()),
            Err(RendererError::InvalidAsset(_))
        ));
    }

    #[test]
    fn rotation_in_degrees_is_converted() {
        let mut engine = running_engine(triangle());
        let uuid = engine.load_asset("triangle.gltf").unwrap();

        engine
            .update_asset_rotation(uuid, Vec3::new(180.0, 0.0, 90.0), true)
            .unwrap();
        let rotation = engine
            .renderer()
            .unwrap()
            .asset_transform(uuid)
            .unwrap()
            .rotation;
        assert!((rotation.x - std::f32::consts::PI).abs() < 1e-6);
        assert!((rotation.z - std::f32::consts::FRAC_PI_2).abs() < 1e-6);

        engine
            .update_asset_rotation(uuid, Vec3::new(1.0, 0.0, 0.0), false)
            .unwrap();
        let rotation = engine.renderer().unwrap().asset_transform(uuid).unwrap().rotation;
        assert_eq!(rotation, Vec3::X);
    }

    #[test]
    fn resize_is_applied_on_update() {
        let mut engine = running_engine(triangle());
        engine.resize(1024, 768).unwrap();
        engine.update(0.0).unwrap();
        assert_eq!(
            engine.renderer().unwrap().swap_extent(),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }
}
