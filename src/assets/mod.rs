//! Default implementations of the seams the renderer consumes: asset files
//! in, [`AssetData`](crate::renderer::AssetData) out, and shader programs by name.

pub mod loader;
pub mod shader_provider;

#[cfg(feature = "gltf_loading")]
pub use loader::GltfAssetLoader;
pub use loader::{AssetIds, AssetLoader};
pub use shader_provider::{DirectoryShaderProvider, ShaderKind, ShaderProvider};
