use ash::vk;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Mat4, Vec3};
use prism_renderer::{
    config::CameraSettings,
    renderer::{
        camera::{projection, CameraData},
        passes::bloom::{downsample, level_extent, HdrImage},
    },
    AssetData, HeadlessBackend, MeshData, Renderer, RendererConfig, Vertex,
};
use uuid::Uuid;

/// Benchmark the per-frame camera math
fn camera_calculations(c: &mut Criterion) {
    let mut group = c.benchmark_group("camera");
    let settings = CameraSettings::default();
    let extent = vk::Extent2D {
        width: 1920,
        height: 1080,
    };

    group.bench_function("projection", |b| {
        b.iter(|| projection(extent, &settings))
    });

    group.bench_function("camera_data", |b| {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        b.iter(|| CameraData::new(Vec3::new(0.0, 2.0, 5.0), view, extent, &settings))
    });

    group.finish();
}

/// CPU reference of the bloom downsample filter, first level with and without
/// Karis weighting.
fn bloom_downsample(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom_downsample");

    for size in [64u32, 256] {
        let pixels = (0..size * size)
            .map(|i| Vec3::splat((i % 17) as f32 * 0.5))
            .collect();
        let image = HdrImage {
            width: size,
            height: size,
            pixels,
        };

        group.bench_with_input(BenchmarkId::new("karis", size), &image, |b, image| {
            b.iter(|| downsample(image, true))
        });
        group.bench_with_input(BenchmarkId::new("plain", size), &image, |b, image| {
            b.iter(|| downsample(image, false))
        });
    }

    group.bench_function("chain_extents", |b| {
        let source = vk::Extent2D {
            width: 2560,
            height: 1440,
        };
        b.iter(|| (0..8).map(|level| level_extent(source, level)).collect::<Vec<_>>())
    });

    group.finish();
}

fn quad_asset() -> AssetData {
    AssetData {
        uuid: Uuid::new_v4(),
        name: "quad".into(),
        meshes: vec![MeshData {
            vertices: vec![Vertex::default(); 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        }],
        materials: Vec::new(),
    }
}

/// Orchestrator overhead per frame on the headless backend
fn headless_frame_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("renderer_headless");

    for count in [1usize, 16, 64] {
        let config = RendererConfig {
            max_asset_count: 64,
            ..RendererConfig::default()
        };
        let backend = HeadlessBackend::new(
            config.frames_in_flight,
            3,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );

        let mut renderer = match Renderer::with_backend(backend, config) {
            Ok(renderer) => renderer,
            Err(e) => {
                eprintln!("Failed to create headless renderer: {e}");
                continue;
            }
        };

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let asset = quad_asset();
            if let Err(e) = renderer.create_asset_resources(&asset) {
                eprintln!("Skipping asset: {e}");
                continue;
            }
            ids.push(asset.uuid);
        }

        group.bench_with_input(BenchmarkId::new("frame", count), &ids, |b, ids| {
            let mut angle = 0.0_f32;
            b.iter(|| {
                angle += 0.01;
                for &uuid in ids {
                    renderer.set_asset_rotation(uuid, Vec3::new(0.0, angle, 0.0));
                    renderer.set_asset_draw_state(uuid);
                }
                renderer
                    .update(1.0 / 60.0)
                    .expect("update failed during benchmark");
                renderer.draw().expect("draw failed during benchmark");
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    camera_calculations,
    bloom_downsample,
    headless_frame_loop
);
criterion_main!(benches);
