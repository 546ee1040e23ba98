//! Loads a glTF file and spins it in front of the camera.
//!
//! Usage: `cargo run --example spinning_asset -- path/to/model.gltf`
//! WASD/QE move the camera, the mouse looks around while the right button is held.

use std::{path::PathBuf, sync::Arc, time::Instant};

use glam::Vec3;
use prism_renderer::{Engine, RendererConfig, WindowSurfaceProvider};
use uuid::Uuid;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

const DEGREES_PER_SECOND: f32 = 45.0;

struct App {
    model_path: PathBuf,
    // Dropped before the window it renders into.
    engine: Option<Engine>,
    window: Option<Arc<Window>>,
    asset: Option<Uuid>,
    last_frame: Instant,
    angle: f32,
    looking: bool,
}

impl App {
    fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            engine: None,
            window: None,
            asset: None,
            last_frame: Instant::now(),
            angle: 0.0,
            looking: false,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> prism_renderer::Result<()> {
        let attrs = Window::default_attributes()
            .with_title("Prism Renderer - Spinning Asset")
            .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720));
        let window = Arc::new(event_loop.create_window(attrs).map_err(|e| {
            prism_renderer::RendererError::InvalidState(format!("window creation failed: {e}"))
        })?);
        let size = window.inner_size();

        let provider = WindowSurfaceProvider::new(window.clone(), size.width, size.height);
        let mut engine: Engine = Engine::new(RendererConfig::default());
        engine.initialize(&provider, size.width, size.height)?;

        let asset = engine.load_asset(&self.model_path)?;
        log::info!("Loaded {} as {asset}", self.model_path.display());

        self.asset = Some(asset);
        self.engine = Some(engine);
        self.window = Some(window);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn frame(&mut self) -> prism_renderer::Result<()> {
        let (Some(engine), Some(asset)) = (self.engine.as_mut(), self.asset) else {
            return Ok(());
        };

        let now = Instant::now();
        let delta = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.angle = (self.angle + DEGREES_PER_SECOND * delta) % 360.0;

        engine.update_asset_rotation(asset, Vec3::new(0.0, self.angle, 0.0), true)?;
        engine.show_asset(asset)?;
        engine.update(delta)?;
        engine.draw()
    }

    fn stop(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.shutdown() {
                log::error!("Shutdown failed: {e}");
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            log::error!("Failed to start: {e}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(engine) = &mut self.engine {
                    if let Err(e) = engine.resize(size.width, size.height) {
                        log::error!("Resize failed: {e}");
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(engine) = &mut self.engine {
                    engine.handle_key_event(&event);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.looking = state == ElementState::Pressed;
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    log::error!("Frame error: {e}");
                    self.stop();
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if let (true, Some(engine)) = (self.looking, &mut self.engine) {
                engine.handle_mouse_motion((delta.0 as f32, delta.1 as f32));
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.stop();
    }
}

fn main() {
    env_logger::init();

    let Some(model_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: spinning_asset <model.gltf>");
        std::process::exit(2);
    };

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(model_path);
    event_loop.run_app(&mut app).expect("Event loop error");
}
