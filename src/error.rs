use ash::vk;
use thiserror::Error;

/// Errors surfaced by the renderer.
///
/// Everything except [`RendererError::SwapchainOutOfDate`] is treated as
/// fatal by the frame loop: there is no degraded rendering mode.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Vulkan error: {0}")]
    VulkanError(String),

    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),

    #[error("Device initialization failed: {0}")]
    DeviceInitFailed(String),

    #[error("Swapchain out of date: {0}")]
    SwapchainOutOfDate(String),

    #[error("Shader unavailable: {0}")]
    ShaderMissing(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Invalid binding shape: {0}")]
    InvalidBindingShape(String),

    #[error("Asset loading failed: {0}")]
    AssetLoad(String),

    #[error("Invalid renderer state: {0}")]
    InvalidState(String),

    #[error("Renderer is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, RendererError>;
