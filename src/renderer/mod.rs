//! Frame orchestration and the GPU work it drives.

pub mod asset;
pub mod asset_resources;
pub mod backend;
pub mod camera;
pub mod environment;
pub mod frame;
pub mod headless;
pub mod orchestrator;
pub mod passes;
pub mod resources;
pub mod vulkan_backend;

pub use asset::{AssetData, MaterialData, MaterialTextureSlot, MeshData, Transform, Vertex};
pub use backend::RenderBackend;
pub use camera::CameraData;
pub use frame::FrameStage;
pub use headless::{FenceState, HeadlessBackend, HeadlessStats};
pub use orchestrator::{RecreationState, Renderer};
pub use passes::{DrawData, Pass};
pub use resources::CameraController;
pub use vulkan_backend::VulkanBackend;
