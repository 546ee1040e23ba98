//! Renderer configuration.
//!
//! All values have sensible defaults; construct with `RendererConfig::default()`
//! and override the fields you care about.

use std::path::PathBuf;

use crate::{RendererError, Result};

/// Default window dimensions used by the demos and the engine wrapper.
pub const DEFAULT_WINDOW_WIDTH: u32 = 1280;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 720;

/// Upper bound on bloom mip levels (a 4K target is ~12 levels deep).
pub const MAX_BLOOM_MIP_LEVELS: u32 = 8;

#[derive(Clone, Debug)]
pub struct BloomSettings {
    /// Number of downsampled levels in the bloom chain.
    pub mip_levels: u32,
    /// Upsample tent filter radius in UV units.
    pub filter_radius: f32,
    /// Blend factor of the bloom chain into the HDR image during tone mapping.
    pub strength: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            mip_levels: 5,
            filter_radius: 0.005,
            strength: 0.04,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToneMapSettings {
    pub exposure: f32,
}

impl Default for ToneMapSettings {
    fn default() -> Self {
        Self { exposure: 1.0 }
    }
}

/// Largest cube face edge an environment map is resampled to.
pub const MAX_CUBEMAP_SIZE: u32 = 4096;

/// Sky background. With an `environment_map` the sky samples a cube map
/// resampled from that equirectangular image; otherwise it draws the gradient.
#[derive(Clone, Debug)]
pub struct SkySettings {
    /// Gradient colors (linear HDR values).
    pub zenith_color: [f32; 3],
    pub horizon_color: [f32; 3],
    /// Equirectangular environment image (`.hdr`, `.png`, `.jpg`).
    pub environment_map: Option<PathBuf>,
    /// Edge length of each cube face.
    pub cubemap_size: u32,
    /// Scale applied to environment radiance.
    pub environment_intensity: f32,
}

impl Default for SkySettings {
    fn default() -> Self {
        Self {
            zenith_color: [0.18, 0.36, 0.85],
            horizon_color: [0.9, 0.85, 0.75],
            environment_map: None,
            cubemap_size: 1024,
            environment_intensity: 1.0,
        }
    }
}

/// Multisampling of the HDR color and depth target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Msaa {
    Disabled,
    /// Highest count the device supports for both color and depth.
    #[default]
    Maximum,
    /// A power of two; lowered to the nearest count the device supports.
    Samples(u32),
}

#[derive(Clone, Debug)]
pub struct CameraSettings {
    pub fov_y_degrees: f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_y_degrees: 45.0,
            near_plane: 0.1,
            far_plane: 1000.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Capacity of the asset table; sizes the shared descriptor pool.
    pub max_asset_count: u32,
    pub enable_validation: bool,
    /// Directory holding `<program>.<kind>.spv` files.
    pub shader_dir: PathBuf,
    /// Base directory for relative material texture references.
    pub texture_dir: PathBuf,
    /// Persist the pipeline cache here between runs.
    pub pipeline_cache_path: Option<PathBuf>,
    pub bloom: BloomSettings,
    pub tone_map: ToneMapSettings,
    pub sky: SkySettings,
    pub camera: CameraSettings,
    pub msaa: Msaa,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_asset_count: 100,
            enable_validation: cfg!(all(feature = "validation", debug_assertions)),
            shader_dir: PathBuf::from(env!("PRISM_SHADER_DIR")),
            texture_dir: PathBuf::from("assets/textures"),
            pipeline_cache_path: None,
            bloom: BloomSettings::default(),
            tone_map: ToneMapSettings::default(),
            sky: SkySettings::default(),
            camera: CameraSettings::default(),
            msaa: Msaa::default(),
        }
    }
}

impl RendererConfig {
    /// Rejects configurations the frame loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(RendererError::InvalidState(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        if self.max_asset_count == 0 {
            return Err(RendererError::InvalidState(
                "max_asset_count must be at least 1".into(),
            ));
        }

        if self.bloom.mip_levels == 0 || self.bloom.mip_levels > MAX_BLOOM_MIP_LEVELS {
            return Err(RendererError::InvalidState(format!(
                "bloom mip levels ({}) must be within 1..={MAX_BLOOM_MIP_LEVELS}",
                self.bloom.mip_levels
            )));
        }

        if let Msaa::Samples(count) = self.msaa {
            if !count.is_power_of_two() || count > 64 {
                return Err(RendererError::InvalidState(format!(
                    "MSAA sample count {count} must be a power of two up to 64"
                )));
            }
        }

        let sky = &self.sky;
        if sky.environment_map.is_some()
            && (sky.cubemap_size == 0 || sky.cubemap_size > MAX_CUBEMAP_SIZE)
        {
            return Err(RendererError::InvalidState(format!(
                "cube map size ({}) must be within 1..={MAX_CUBEMAP_SIZE}",
                sky.cubemap_size
            )));
        }

        let camera = &self.camera;
        if camera.near_plane <= 0.0 || camera.far_plane <= camera.near_plane {
            return Err(RendererError::InvalidState(format!(
                "invalid clip planes: near {} far {}",
                camera.near_plane, camera.far_plane
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_asset_count, 100);
        assert_eq!(config.bloom.mip_levels, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_frames_in_flight() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..RendererConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_bloom_levels() {
        let mut config = RendererConfig::default();
        config.bloom.mip_levels = 0;
        assert!(config.validate().is_err());
        config.bloom.mip_levels = MAX_BLOOM_MIP_LEVELS + 1;
        assert!(config.validate().is_err());
        config.bloom.mip_levels = MAX_BLOOM_MIP_LEVELS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_needs_a_usable_face_size() {
        let mut config = RendererConfig::default();
        config.sky.cubemap_size = 0;
        // Unused without an environment map.
        assert!(config.validate().is_ok());

        config.sky.environment_map = Some(PathBuf::from("sky.hdr"));
        assert!(config.validate().is_err());
        config.sky.cubemap_size = MAX_CUBEMAP_SIZE + 1;
        assert!(config.validate().is_err());
        config.sky.cubemap_size = 512;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn msaa_count_must_be_a_power_of_two() {
        let mut config = RendererConfig::default();
        assert_eq!(config.msaa, Msaa::Maximum);
        config.msaa = Msaa::Samples(3);
        assert!(config.validate().is_err());
        config.msaa = Msaa::Samples(128);
        assert!(config.validate().is_err());
        config.msaa = Msaa::Samples(4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_clip_planes() {
        let mut config = RendererConfig::default();
        config.camera.far_plane = 0.05;
        assert!(config.validate().is_err());
    }
}
