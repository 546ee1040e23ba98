//! Environment cube maps for the sky, resampled on the CPU from an
//! equirectangular HDR image and uploaded once.

use std::f32::consts::FRAC_1_PI;
use std::path::Path;

use glam::{Vec2, Vec3};
use half::f16;
use log::info;

use super::passes::bloom::HdrImage;
use crate::{RendererError, Result};

/// Cube faces in Vulkan layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn layer(self) -> usize {
        self as usize
    }

    /// Unit direction through the center of texel (x, y) on a face `size`
    /// texels wide, following Vulkan's cube addressing.
    pub fn direction(self, x: u32, y: u32, size: u32) -> Vec3 {
        let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
        let direction = match self {
            CubeFace::PositiveX => Vec3::new(1.0, -v, -u),
            CubeFace::NegativeX => Vec3::new(-1.0, -v, u),
            CubeFace::PositiveY => Vec3::new(u, 1.0, v),
            CubeFace::NegativeY => Vec3::new(u, -1.0, -v),
            CubeFace::PositiveZ => Vec3::new(u, -v, 1.0),
            CubeFace::NegativeZ => Vec3::new(-u, -v, -1.0),
        };
        direction.normalize()
    }
}

/// Where `direction` lands on an equirectangular image. The top row looks
/// straight up and +X is the horizontal center.
pub fn equirect_uv(direction: Vec3) -> Vec2 {
    let d = direction.normalize_or(Vec3::Y);
    Vec2::new(
        d.z.atan2(d.x) * 0.5 * FRAC_1_PI + 0.5,
        0.5 - d.y.clamp(-1.0, 1.0).asin() * FRAC_1_PI,
    )
}

/// Bilinear fetch that wraps horizontally, so the seam behind the viewer
/// blends both edges.
fn sample_equirect(source: &HdrImage, uv: Vec2) -> Vec3 {
    let x = uv.x * source.width as f32 - 0.5;
    let y = (uv.y * source.height as f32 - 0.5).clamp(0.0, (source.height - 1) as f32);
    let (fx, fy) = (x - x.floor(), y.fract());

    let column = |offset: f32| (x.floor() + offset).rem_euclid(source.width as f32) as u32;
    let (x0, x1) = (column(0.0), column(1.0));
    let y0 = y.floor() as u32;
    let y1 = (y0 + 1).min(source.height - 1);

    let top = source.pixel(x0, y0).lerp(source.pixel(x1, y0), fx);
    let bottom = source.pixel(x0, y1).lerp(source.pixel(x1, y1), fx);
    top.lerp(bottom, fy)
}

/// Six square faces of linear radiance.
#[derive(Clone, Debug, PartialEq)]
pub struct CubeMapData {
    size: u32,
    faces: [Vec<Vec3>; 6],
}

impl CubeMapData {
    pub fn from_equirect(source: &HdrImage, size: u32) -> Result<Self> {
        if size == 0 || source.width == 0 || source.height == 0 {
            return Err(RendererError::InvalidAsset(format!(
                "cannot resample a {}x{} environment into {size}x{size} faces",
                source.width, source.height
            )));
        }

        let faces = CubeFace::ALL.map(|face| {
            (0..size * size)
                .map(|i| {
                    let direction = face.direction(i % size, i / size, size);
                    sample_equirect(source, equirect_uv(direction))
                })
                .collect()
        });
        Ok(Self { size, faces })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn face(&self, face: CubeFace) -> &[Vec3] {
        &self.faces[face.layer()]
    }

    /// Opaque RGBA16F texels, face after face in layer order.
    pub fn to_rgba16f(&self) -> Vec<f16> {
        self.faces
            .iter()
            .flatten()
            .flat_map(|texel| {
                [
                    f16::from_f32(texel.x),
                    f16::from_f32(texel.y),
                    f16::from_f32(texel.z),
                    f16::ONE,
                ]
            })
            .collect()
    }
}

/// Decodes an equirectangular image of any enabled format into linear RGB.
pub fn load_equirect(path: &Path) -> Result<HdrImage> {
    let decoded = image::open(path)
        .map_err(|e| RendererError::AssetLoad(format!("{}: {e}", path.display())))?
        .to_rgb32f();
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(RendererError::InvalidAsset(format!(
            "{} has no pixels",
            path.display()
        )));
    }

    info!("Loaded environment {} ({width}x{height})", path.display());
    Ok(HdrImage {
        width,
        height,
        pixels: decoded.pixels().map(|p| Vec3::from(p.0)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-3
    }

    /// Bright upper hemisphere over a dark lower one.
    fn horizon_image() -> HdrImage {
        let (width, height) = (64, 32);
        let pixels = (0..width * height)
            .map(|i| {
                if i / width < height / 2 {
                    Vec3::splat(4.0)
                } else {
                    Vec3::splat(0.25)
                }
            })
            .collect();
        HdrImage {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn face_centers_point_along_their_axis() {
        let expected = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (face, axis) in CubeFace::ALL.into_iter().zip(expected) {
            // Odd size puts a texel exactly at the center.
            assert!(approx(face.direction(1, 1, 3), axis), "{face:?}");
        }
    }

    #[test]
    fn equirect_rows_run_from_zenith_to_nadir() {
        assert!(equirect_uv(Vec3::Y).y.abs() < 1e-6);
        assert!((equirect_uv(-Vec3::Y).y - 1.0).abs() < 1e-6);
        let forward = equirect_uv(Vec3::X);
        assert!((forward.x - 0.5).abs() < 1e-6 && (forward.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn constant_environment_gives_constant_faces() {
        let color = Vec3::new(1.5, 0.5, 0.25);
        let cube = CubeMapData::from_equirect(&HdrImage::filled(16, 8, color), 4).unwrap();
        for face in CubeFace::ALL {
            assert_eq!(cube.face(face).len(), 16);
            assert!(cube.face(face).iter().all(|&texel| approx(texel, color)));
        }
    }

    #[test]
    fn sky_lands_on_the_upper_face() {
        let cube = CubeMapData::from_equirect(&horizon_image(), 8).unwrap();
        assert!(cube.face(CubeFace::PositiveY).iter().all(|t| approx(*t, Vec3::splat(4.0))));
        assert!(cube.face(CubeFace::NegativeY).iter().all(|t| approx(*t, Vec3::splat(0.25))));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let image = HdrImage::filled(4, 2, Vec3::ONE);
        assert!(CubeMapData::from_equirect(&image, 0).is_err());
        assert!(CubeMapData::from_equirect(&HdrImage::filled(0, 2, Vec3::ONE), 4).is_err());
    }

    #[test]
    fn packed_texels_are_opaque_and_face_ordered() {
        let cube = CubeMapData::from_equirect(&horizon_image(), 2).unwrap();
        let texels = cube.to_rgba16f();
        assert_eq!(texels.len(), 2 * 2 * 6 * 4);
        assert!(texels.chunks(4).all(|t| t[3] == f16::ONE));

        // +Y is the third layer.
        let up = &texels[2 * 16..3 * 16];
        assert!(up.chunks(4).all(|t| (t[0].to_f32() - 4.0).abs() < 1e-2));
    }

    #[test]
    fn loads_ldr_images_as_linear_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sky.png");
        image::RgbImage::from_pixel(8, 4, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        let loaded = load_equirect(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (8, 4));
        assert!(loaded.pixels.iter().all(|p| approx(*p, Vec3::ONE)));
    }

    #[test]
    fn missing_environment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_equirect(&dir.path().join("missing.hdr")).is_err());
    }
}
