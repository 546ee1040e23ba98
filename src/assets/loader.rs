//! Turning files into [`AssetData`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{renderer::asset::AssetData, Result};

/// Produces renderable data from a file. Implementations decide the format.
pub trait AssetLoader {
    fn load(&mut self, path: &Path) -> Result<AssetData>;
}

/// Hands out one stable id per path.
#[derive(Debug, Default)]
pub struct AssetIds {
    ids: HashMap<PathBuf, Uuid>,
}

impl AssetIds {
    pub fn id_for(&mut self, path: &Path) -> Uuid {
        *self
            .ids
            .entry(path.to_path_buf())
            .or_insert_with(Uuid::new_v4)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(feature = "gltf_loading")]
pub use gltf_loader::GltfAssetLoader;

#[cfg(feature = "gltf_loading")]
mod gltf_loader {
    use std::path::{Path, PathBuf};

    use gltf::image::Source;
    use log::{info, warn};

    use super::{AssetIds, AssetLoader};
    use crate::{
        renderer::asset::{AssetData, MaterialData, MaterialTextureSlot, MeshData, Vertex},
        RendererError, Result,
    };

    /// Loads `.gltf`/`.glb` files: every triangle primitive becomes a mesh.
    /// Texture references are resolved next to the file; embedded images
    /// are skipped and their slots fall back to defaults.
    #[derive(Debug, Default)]
    pub struct GltfAssetLoader {
        ids: AssetIds,
    }

    impl GltfAssetLoader {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl AssetLoader for GltfAssetLoader {
        fn load(&mut self, path: &Path) -> Result<AssetData> {
            let load_error = |e: gltf::Error| {
                RendererError::AssetLoad(format!("{}: {e}", path.display()))
            };
            let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(load_error)?;
            let buffers =
                gltf::import_buffers(&document, path.parent(), blob).map_err(load_error)?;
            let base = path.parent().unwrap_or_else(|| Path::new(""));

            let mut meshes = Vec::new();
            let mut materials = Vec::new();
            for mesh in document.meshes() {
                for primitive in mesh.primitives() {
                    if primitive.mode() != gltf::mesh::Mode::Triangles {
                        warn!(
                            "{}: skipping {:?} primitive of mesh {}",
                            path.display(),
                            primitive.mode(),
                            mesh.index()
                        );
                        continue;
                    }

                    let reader = primitive
                        .reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
                    let Some(positions) = reader.read_positions() else {
                        continue;
                    };

                    let mut vertices: Vec<Vertex> = positions
                        .map(|position| Vertex {
                            position,
                            tangent: [1.0, 0.0, 0.0, 1.0],
                            ..Vertex::default()
                        })
                        .collect();
                    if let Some(normals) = reader.read_normals() {
                        vertices.iter_mut().zip(normals).for_each(|(v, n)| v.normal = n);
                    }
                    if let Some(tangents) = reader.read_tangents() {
                        vertices.iter_mut().zip(tangents).for_each(|(v, t)| v.tangent = t);
                    }
                    if let Some(uvs) = reader.read_tex_coords(0) {
                        vertices
                            .iter_mut()
                            .zip(uvs.into_f32())
                            .for_each(|(v, uv)| v.uv = uv);
                    }

                    let indices = match reader.read_indices() {
                        Some(indices) => indices.into_u32().collect(),
                        None => (0..vertices.len() as u32).collect(),
                    };

                    meshes.push(MeshData { vertices, indices });
                    materials.push(material_textures(&primitive.material(), base));
                }
            }

            let asset = AssetData {
                uuid: self.ids.id_for(path),
                name: path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                meshes,
                materials,
            };

            info!(
                "Loaded {}: {} meshes, {} indices",
                path.display(),
                asset.meshes.len(),
                asset.index_count()
            );
            Ok(asset)
        }
    }

    fn material_textures(material: &gltf::Material<'_>, base: &Path) -> MaterialData {
        let mut data = MaterialData::default();
        let pbr = material.pbr_metallic_roughness();

        let mut assign = |slot, texture: Option<gltf::Texture<'_>>| {
            if let Some(path) = texture.and_then(|t| texture_path(&t, base)) {
                data.set_texture(slot, path);
            }
        };

        assign(
            MaterialTextureSlot::Diffuse,
            pbr.base_color_texture().map(|info| info.texture()),
        );
        assign(
            MaterialTextureSlot::Normal,
            material.normal_texture().map(|normal| normal.texture()),
        );
        // glTF packs metallic (B) and roughness (G) into one image.
        let metallic_roughness = pbr.metallic_roughness_texture().map(|info| info.texture());
        assign(MaterialTextureSlot::Metallic, metallic_roughness.clone());
        assign(MaterialTextureSlot::Roughness, metallic_roughness);
        // Baked occlusion stands in for the lightmap.
        assign(
            MaterialTextureSlot::Lightmap,
            material.occlusion_texture().map(|occlusion| occlusion.texture()),
        );

        data
    }

    fn texture_path(texture: &gltf::Texture<'_>, base: &Path) -> Option<PathBuf> {
        match texture.source().source() {
            Source::Uri { uri, .. } if !uri.starts_with("data:") => Some(base.join(uri)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_keeps_its_id() {
        let mut ids = AssetIds::default();
        let a = ids.id_for(Path::new("models/helmet.glb"));
        let b = ids.id_for(Path::new("models/helmet.glb"));
        let c = ids.id_for(Path::new("models/sponza.gltf"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ids.len(), 2);
    }

    #[cfg(feature = "gltf_loading")]
    #[test]
    fn loads_a_minimal_triangle() {
        use base64_triangle::TRIANGLE_GLTF;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triangle.gltf");
        std::fs::write(&path, TRIANGLE_GLTF).unwrap();

        let mut loader = GltfAssetLoader::new();
        let asset = loader.load(&path).unwrap();

        assert!(asset.is_valid());
        assert_eq!(asset.name, "triangle");
        assert_eq!(asset.meshes.len(), 1);
        assert_eq!(asset.meshes[0].vertices.len(), 3);
        assert_eq!(asset.meshes[0].indices, vec![0, 1, 2]);
        assert_eq!(loader.load(&path).unwrap().uuid, asset.uuid);
    }

    #[cfg(feature = "gltf_loading")]
    #[test]
    fn missing_file_is_a_load_error() {
        let mut loader = GltfAssetLoader::new();
        let err = loader.load(Path::new("/nonexistent/model.gltf")).unwrap_err();
        assert!(matches!(err, crate::RendererError::AssetLoad(_)));
    }

    #[cfg(feature = "gltf_loading")]
    mod base64_triangle {
        /// Three positions (0,0,0) (1,0,0) (0,1,0), no indices, embedded as a data URI.
        pub const TRIANGLE_GLTF: &str = r#"{
  "asset": { "version": "2.0" },
  "buffers": [{
    "byteLength": 36,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA"
  }],
  "bufferViews": [{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }],
  "accessors": [{
    "bufferView": 0,
    "componentType": 5126,
    "count": 3,
    "type": "VEC3",
    "min": [0.0, 0.0, 0.0],
    "max": [1.0, 1.0, 0.0]
  }],
  "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
  "nodes": [{ "mesh": 0 }],
  "scenes": [{ "nodes": [0] }],
  "scene": 0
}"#;
    }
}
