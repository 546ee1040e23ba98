//! GPU copies of an asset's geometry and material textures.

use std::path::{Path, PathBuf};

use ash::vk;
use log::{debug, warn};

use super::asset::{AssetData, MaterialTextureSlot};
use crate::{
    vulkan::{Buffer, DescriptorSet, GpuContext, Texture},
    Result,
};

/// One vertex/index buffer pair.
pub struct MeshBuffers {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

/// 1x1 textures bound wherever a material leaves a slot empty.
pub struct FallbackTextures {
    textures: Vec<Texture>,
}

impl FallbackTextures {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let textures = MaterialTextureSlot::ALL
            .iter()
            .map(|slot| Texture::solid(ctx, slot.fallback_rgba(), slot.format()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { textures })
    }

    pub fn get(&self, slot: MaterialTextureSlot) -> &Texture {
        &self.textures[slot as usize]
    }
}

/// Buffers, textures and material set of one asset.
pub struct AssetGpu {
    // The set references the textures, so it goes first.
    pub material_set: DescriptorSet,
    pub meshes: Vec<MeshBuffers>,
    /// Decoded textures by slot; `None` means the fallback is bound.
    textures: Vec<Option<Texture>>,
}

impl AssetGpu {
    /// Uploads geometry through staging buffers and points `material_set` at
    /// the asset's textures, substituting fallbacks for absent or unreadable files.
    pub fn new(
        ctx: &GpuContext,
        asset: &AssetData,
        texture_dir: &Path,
        fallbacks: &FallbackTextures,
        material_set: DescriptorSet,
    ) -> Result<Self> {
        let meshes = asset
            .meshes
            .iter()
            .map(|mesh| {
                Ok(MeshBuffers {
                    vertices: Buffer::device_local_with_data(
                        ctx,
                        &mesh.vertices,
                        vk::BufferUsageFlags::VERTEX_BUFFER,
                    )?,
                    indices: Buffer::device_local_with_data(
                        ctx,
                        &mesh.indices,
                        vk::BufferUsageFlags::INDEX_BUFFER,
                    )?,
                    index_count: mesh.indices.len() as u32,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let material = asset.material();
        let textures: Vec<Option<Texture>> = MaterialTextureSlot::ALL
            .iter()
            .map(|&slot| {
                let path = material.texture(slot)?;
                let resolved = resolve_texture_path(texture_dir, path);
                match load_texture(ctx, &resolved, slot) {
                    Ok(texture) => Some(texture),
                    Err(e) => {
                        warn!(
                            "'{}': {slot:?} texture {} unusable ({e}), using fallback",
                            asset.name,
                            resolved.display()
                        );
                        None
                    }
                }
            })
            .collect();

        let mut writer = material_set.write();
        for slot in MaterialTextureSlot::ALL {
            let texture = textures[slot as usize]
                .as_ref()
                .unwrap_or_else(|| fallbacks.get(slot));
            writer = writer.sampled_image(slot.binding(), texture.view(), texture.sampler());
        }
        writer.submit();

        Ok(Self {
            material_set,
            meshes,
            textures,
        })
    }

    pub fn loaded_texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }
}

/// Relative references are looked up under `texture_dir`.
pub fn resolve_texture_path(texture_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        texture_dir.join(path)
    }
}

fn load_texture(ctx: &GpuContext, path: &Path, slot: MaterialTextureSlot) -> Result<Texture> {
    let rgba = image::open(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    debug!("Decoded {} ({width}x{height})", path.display());
    Texture::from_rgba8(ctx, width, height, rgba.as_raw(), slot.format(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_texture_paths_resolve_under_the_texture_dir() {
        let dir = Path::new("/data/textures");
        assert_eq!(
            resolve_texture_path(dir, Path::new("brick/albedo.png")),
            PathBuf::from("/data/textures/brick/albedo.png")
        );
    }

    #[test]
    fn absolute_texture_paths_are_kept() {
        let dir = Path::new("/data/textures");
        let absolute = std::env::temp_dir().join("albedo.png");
        assert_eq!(resolve_texture_path(dir, &absolute), absolute);
    }
}
