use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::config::CameraSettings;

/// Camera uniform shared by the sky and surface passes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// Maps clip space back to world space; the sky reconstructs view rays from it.
    pub inverse_view_projection: Mat4,
    /// World position, w = 1.
    pub position: Vec4,
}

impl CameraData {
    pub fn new(
        position: Vec3,
        view: Mat4,
        extent: vk::Extent2D,
        settings: &CameraSettings,
    ) -> Self {
        let projection = projection(extent, settings);
        let view_projection = projection * view;
        Self {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            position: position.extend(1.0),
        }
    }
}

impl Default for CameraData {
    fn default() -> Self {
        Self::new(
            Vec3::ZERO,
            Mat4::IDENTITY,
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            &CameraSettings::default(),
        )
    }
}

/// Right-handed perspective with Vulkan's downward clip-space Y.
pub fn projection(extent: vk::Extent2D, settings: &CameraSettings) -> Mat4 {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(
        settings.fov_y_degrees.to_radians(),
        aspect,
        settings.near_plane,
        settings.far_plane,
    );
    projection.y_axis.y *= -1.0;
    projection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_flips_y_for_vulkan() {
        let settings = CameraSettings::default();
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let clip = projection(extent, &settings).project_point3(Vec3::new(0.0, 1.0, -5.0));
        assert!(clip.y < 0.0);
    }

    #[test]
    fn aspect_follows_extent() {
        let settings = CameraSettings::default();
        let wide = projection(
            vk::Extent2D {
                width: 2000,
                height: 1000,
            },
            &settings,
        );
        assert!((wide.y_axis.y.abs() / wide.x_axis.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn zero_extent_does_not_produce_nan() {
        let p = projection(vk::Extent2D::default(), &CameraSettings::default());
        assert!(!p.is_nan());
    }

    #[test]
    fn inverse_view_projection_round_trips() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let camera = CameraData::new(
            Vec3::new(0.0, 2.0, 5.0),
            view,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            &CameraSettings::default(),
        );
        let world = Vec3::new(0.5, 0.25, -1.0);
        let clip = camera.view_projection.project_point3(world);
        let back = camera.inverse_view_projection.project_point3(clip);
        assert!(back.abs_diff_eq(world, 1e-3), "{back}");
    }
}
