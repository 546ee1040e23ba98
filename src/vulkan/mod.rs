//! Thin owning wrappers over the Vulkan objects the renderer uses.
//!
//! Every wrapper destroys its handle on drop and holds an `Arc<ash::Device>`
//! (or the allocator) so destruction never outlives the device.

pub mod allocator;
pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor_layout;
pub mod descriptor_pool;
pub mod device;
pub mod image;
pub mod instance;
pub mod layout_cache;
pub mod pipeline;
pub mod pipeline_cache;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use allocator::{Allocator, MemoryLocation};
pub use buffer::Buffer;
pub use command::{CommandBuffer, CommandPools, QueueType};
pub use context::GpuContext;
pub use descriptor_layout::{
    BindingShape, BindingShapeBuilder, BindingSlot, DescriptorKind, DescriptorSetLayout,
};
pub use descriptor_pool::{DescriptorPool, DescriptorSet, DescriptorWriter};
pub use device::{QueueFamilies, VulkanDevice};
pub use image::{
    Image, ImageDesc, ImageView, Sampler, Texture, CUBE_FACE_COUNT, DEPTH_FORMAT, HDR_COLOR_FORMAT,
};
pub use instance::VulkanInstance;
pub use layout_cache::SetLayoutCache;
pub use pipeline::{BlendMode, GraphicsPipelineDesc, Pipeline, PipelineLayout, ShaderModule};
pub use pipeline_cache::PipelineCache;
pub use render_pass::{AttachmentSpec, Framebuffer, RenderPass};
pub use surface::{SurfaceProvider, WindowSurfaceProvider};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use sync::{Fence, Semaphore};
