//! Multi-stage HDR frame orchestration on Vulkan.
//!
//! Each frame runs four stages, each in its own command buffer and chained by
//! semaphores: a procedural sky, physically based surfaces, a bloom mip chain
//! and tone mapping into the presentable image. Several frames are recorded
//! ahead of the GPU and the swap chain is rebuilt transparently on resize.
//!
//! [`Renderer`] holds the frame bookkeeping and drives any [`RenderBackend`]:
//! [`VulkanBackend`] on real hardware, [`HeadlessBackend`] in tests.
//! [`Engine`] adds a camera, an asset loader and lifecycle checks on top.

pub mod assets;
pub mod config;
pub mod engine;
pub mod error;
pub mod renderer;
pub mod vulkan;

pub use config::RendererConfig;
pub use engine::{Engine, EngineState};
pub use error::{RendererError, Result};
pub use renderer::{
    AssetData, CameraController, FrameStage, HeadlessBackend, MaterialData, MaterialTextureSlot,
    MeshData, RecreationState, RenderBackend, Renderer, Transform, Vertex, VulkanBackend,
};
pub use vulkan::{SurfaceProvider, WindowSurfaceProvider};
