//! CPU-side asset description consumed by the renderer.

use std::path::PathBuf;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec3};
use uuid::Uuid;

use crate::vulkan::DescriptorKind;

/// Interleaved surface vertex, as consumed by the PBR pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// xyz tangent, w handedness of the bitangent.
    pub tangent: [f32; 4],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, tangent) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Texture slots of a surface material, in descriptor binding order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialTextureSlot {
    Diffuse = 0,
    Normal = 1,
    Metallic = 2,
    Roughness = 3,
    Lightmap = 4,
}

impl MaterialTextureSlot {
    pub const COUNT: usize = 5;
    pub const ALL: [MaterialTextureSlot; Self::COUNT] = [
        MaterialTextureSlot::Diffuse,
        MaterialTextureSlot::Normal,
        MaterialTextureSlot::Metallic,
        MaterialTextureSlot::Roughness,
        MaterialTextureSlot::Lightmap,
    ];

    pub fn binding(self) -> u32 {
        self as u32
    }

    pub fn descriptor_kind(self) -> DescriptorKind {
        DescriptorKind::CombinedImageSampler
    }

    /// Color of the 1x1 texture bound when a material leaves this slot empty.
    pub fn fallback_rgba(self) -> [u8; 4] {
        match self {
            MaterialTextureSlot::Diffuse => [255, 255, 255, 255],
            MaterialTextureSlot::Normal => [128, 128, 255, 255],
            MaterialTextureSlot::Metallic => [0, 0, 0, 255],
            MaterialTextureSlot::Roughness => [255, 255, 255, 255],
            MaterialTextureSlot::Lightmap => [255, 255, 255, 255],
        }
    }

    /// Only color data is stored in sRGB; normals and PBR factors are linear.
    pub fn format(self) -> vk::Format {
        match self {
            MaterialTextureSlot::Diffuse => vk::Format::R8G8B8A8_SRGB,
            _ => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MaterialData {
    /// Texture file per slot, indexed by [`MaterialTextureSlot`].
    pub textures: [Option<PathBuf>; MaterialTextureSlot::COUNT],
}

impl MaterialData {
    pub fn texture(&self, slot: MaterialTextureSlot) -> Option<&PathBuf> {
        self.textures[slot as usize].as_ref()
    }

    pub fn set_texture(&mut self, slot: MaterialTextureSlot, path: impl Into<PathBuf>) {
        self.textures[slot as usize] = Some(path.into());
    }
}

/// Everything the renderer needs to build GPU resources for one asset.
#[derive(Clone, Debug, Default)]
pub struct AssetData {
    pub uuid: Uuid,
    pub name: String,
    pub meshes: Vec<MeshData>,
    /// Material used by the asset's meshes. Only the first is bound.
    pub materials: Vec<MaterialData>,
}

impl AssetData {
    pub fn is_valid(&self) -> bool {
        !self.uuid.is_nil() && !self.meshes.is_empty() && self.meshes.iter().all(|m| !m.is_empty())
    }

    pub fn index_count(&self) -> u32 {
        self.meshes.iter().map(|m| m.indices.len() as u32).sum()
    }

    pub fn material(&self) -> MaterialData {
        self.materials.first().cloned().unwrap_or_default()
    }
}

/// Position, Euler rotation (radians, applied X then Y then Z) and scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn model_matrix(&self) -> Mat4 {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

/// Per-asset uniform read by the surface vertex shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TransformUniform {
    pub model: Mat4,
    pub normal: Mat4,
}

impl From<&Transform> for TransformUniform {
    fn from(transform: &Transform) -> Self {
        let model = transform.model_matrix();
        Self {
            model,
            normal: model.inverse().transpose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        MeshData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn vertex_layout_matches_attributes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[3].offset, 40);
        assert_eq!(Vertex::binding_description().stride, 48);
    }

    #[test]
    fn asset_without_geometry_is_invalid() {
        let mut asset = AssetData {
            uuid: Uuid::new_v4(),
            ..Default::default()
        };
        assert!(!asset.is_valid());

        asset.meshes.push(MeshData::default());
        assert!(!asset.is_valid());

        asset.meshes[0] = triangle();
        assert!(asset.is_valid());

        asset.uuid = Uuid::nil();
        assert!(!asset.is_valid());
    }

    #[test]
    fn index_count_spans_meshes() {
        let asset = AssetData {
            uuid: Uuid::new_v4(),
            meshes: vec![triangle(), triangle()],
            ..Default::default()
        };
        assert_eq!(asset.index_count(), 6);
    }

    #[test]
    fn model_matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            scale: Vec3::splat(2.0),
        };
        let p = transform.model_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 2.0, 1.0), 1e-5), "{p}");
    }

    #[test]
    fn euler_order_is_x_then_y_then_z() {
        let transform = Transform {
            rotation: Vec3::new(0.3, -0.7, 1.1),
            ..Default::default()
        };
        let expected = Mat4::from_rotation_x(0.3)
            * Mat4::from_rotation_y(-0.7)
            * Mat4::from_rotation_z(1.1);
        assert!(transform.model_matrix().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn missing_material_slots_use_neutral_fallbacks() {
        let material = AssetData::default().material();
        assert!(MaterialTextureSlot::ALL
            .iter()
            .all(|slot| material.texture(*slot).is_none()));
        assert_eq!(
            MaterialTextureSlot::Normal.fallback_rgba(),
            [128, 128, 255, 255]
        );
        assert_eq!(MaterialTextureSlot::Metallic.fallback_rgba()[0], 0);
    }
}
