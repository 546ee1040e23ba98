//! Frame-loop scenarios driven end to end through the headless backend.

use ash::vk;
use glam::Vec3;
use prism_renderer::{
    renderer::FenceState, vulkan::PresentOutcome, AssetData, HeadlessBackend, MeshData,
    RecreationState, Renderer, RendererConfig, Vertex,
};
use uuid::Uuid;

const IMAGES: usize = 3;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn renderer() -> Renderer<HeadlessBackend> {
    init_logging();
    let config = RendererConfig::default();
    let backend = HeadlessBackend::new(config.frames_in_flight, IMAGES, extent(1280, 720));
    Renderer::with_backend(backend, config).expect("default config is valid")
}

fn quad(name: &str) -> AssetData {
    AssetData {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        meshes: vec![MeshData {
            vertices: vec![Vertex::default(); 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        }],
        materials: Vec::new(),
    }
}

#[test]
fn three_frames_alternate_slots_without_rebuilding() {
    let mut r = renderer();
    let a = quad("a");
    r.create_asset_resources(&a).unwrap();
    for _ in 0..3 {
        r.set_asset_draw_state(a.uuid);
        r.draw().unwrap();
    }

    let stats = r.backend().stats();
    assert_eq!(stats.fence_waits, vec![0, 1, 0]);
    let slots: Vec<_> = stats.submitted.iter().map(|f| f.slot).collect();
    assert_eq!(slots, vec![0, 1, 0]);
    assert!(stats.submitted.iter().all(|f| f.visible == vec![a.uuid]));
    assert_eq!(stats.presented, 3);
    assert!(stats.rebuilds.is_empty());
    assert_eq!(stats.teardowns, 0);
    assert_eq!(r.frame_index(), 1);
}

#[test]
fn reused_image_waits_for_the_slot_that_last_used_it() {
    let mut r = renderer();
    for _ in 0..4 {
        r.draw().unwrap();
    }

    // The fourth frame runs on slot 1 but lands on image 0, last submitted by slot 0.
    let stats = r.backend().stats();
    assert_eq!(stats.acquisitions[3], (1, 0));
    assert_eq!(stats.fence_waits, vec![0, 1, 0, 1, 0]);
}

#[test]
fn fences_are_pending_only_for_submitted_slots() {
    let mut r = renderer();
    assert_eq!(r.backend().fence_state(0), Some(FenceState::Signaled));

    r.draw().unwrap();
    assert_eq!(r.backend().fence_state(0), Some(FenceState::Pending));
    assert_eq!(r.backend().fence_state(1), Some(FenceState::Signaled));

    r.draw().unwrap();
    assert_eq!(r.backend().fence_state(1), Some(FenceState::Pending));

    r.destroy_all_asset_resources().unwrap();
    let a = quad("a");
    r.create_asset_resources(&a).unwrap();
    r.destroy_asset_resources(a.uuid).unwrap();
    assert_eq!(r.backend().fence_state(0), Some(FenceState::Signaled));
    assert_eq!(r.backend().fence_state(1), Some(FenceState::Signaled));
}

#[test]
fn repeated_resizes_collapse_into_one_rebuild() {
    let mut r = renderer();
    r.draw().unwrap();

    for (w, h) in [(800, 600), (1024, 768), (640, 480), (1920, 1080)] {
        r.set_next_framebuffer_size(w, h);
    }
    r.update(0.016).unwrap();
    r.update(0.016).unwrap();
    r.draw().unwrap();

    let stats = r.backend().stats();
    assert_eq!(stats.rebuilds, vec![extent(1920, 1080)]);
    assert_eq!(stats.teardowns, 1);
    assert_eq!(r.swap_extent(), extent(1920, 1080));
    assert_eq!(r.recreation_state(), RecreationState::Normal);
}

#[test]
fn resize_to_the_current_size_does_nothing() {
    let mut r = renderer();
    r.set_next_framebuffer_size(1280, 720);
    r.update(0.016).unwrap();
    assert!(r.backend().stats().rebuilds.is_empty());
}

#[test]
fn rebuild_rerecords_every_asset_for_every_image() {
    let mut r = renderer();
    let a = quad("a");
    let b = quad("b");
    r.create_asset_resources(&a).unwrap();
    r.create_asset_resources(&b).unwrap();
    r.set_asset_draw_state(a.uuid);
    r.draw().unwrap();

    r.set_next_framebuffer_size(1600, 900);
    r.update(0.016).unwrap();

    let generation = r.backend().swap_generation();
    assert_eq!(generation, 1);
    let stats = r.backend().stats();
    let rerecorded: Vec<_> = stats
        .asset_recordings
        .iter()
        .filter(|rec| rec.swap_generation == generation)
        .collect();
    assert_eq!(rerecorded.len(), 2 * IMAGES);
    for image in 0..IMAGES {
        for asset in [a.uuid, b.uuid] {
            assert!(rerecorded
                .iter()
                .any(|rec| rec.image == image && rec.asset == asset));
        }
    }

    r.set_asset_draw_state(b.uuid);
    r.draw().unwrap();
    assert_eq!(r.backend().stats().submitted.last().unwrap().visible, vec![b.uuid]);
}

#[test]
fn only_flagged_assets_are_drawn() {
    let mut r = renderer();
    let shown = quad("shown");
    let hidden = quad("hidden");
    r.create_asset_resources(&shown).unwrap();
    r.create_asset_resources(&hidden).unwrap();

    r.set_asset_draw_state(shown.uuid);
    r.draw().unwrap();
    r.draw().unwrap();

    let stats = r.backend().stats();
    assert_eq!(stats.submitted[0].visible, vec![shown.uuid]);
    assert!(stats.submitted[1].visible.is_empty());
}

#[test]
fn visible_assets_keep_insertion_order() {
    let mut r = renderer();
    let assets: Vec<_> = ["a", "b", "c"].into_iter().map(quad).collect();
    for asset in &assets {
        r.create_asset_resources(asset).unwrap();
    }
    for asset in assets.iter().rev() {
        r.set_asset_draw_state(asset.uuid);
    }
    r.draw().unwrap();

    let expected: Vec<_> = assets.iter().map(|a| a.uuid).collect();
    assert_eq!(r.backend().stats().submitted[0].visible, expected);
}

#[test]
fn an_asset_drawn_every_frame_survives_many_frames() {
    let mut r = renderer();
    let a = quad("spinning");
    r.create_asset_resources(&a).unwrap();

    for frame in 0..12 {
        r.set_asset_rotation(a.uuid, Vec3::new(0.0, (frame + 1) as f32 * 0.1, 0.0));
        r.set_asset_draw_state(a.uuid);
        r.draw().unwrap();
    }

    let stats = r.backend().stats();
    assert_eq!(stats.submitted.len(), 12);
    assert!(stats.submitted.iter().all(|f| f.visible == vec![a.uuid]));
    // Every frame moved the asset, so every frame uploaded its transform.
    assert_eq!(stats.transform_uploads.len(), 12);
}

#[test]
fn out_of_date_surface_rebuilds_and_skips_the_frame() {
    let mut r = renderer();
    r.backend_mut().queue_acquire_out_of_date();
    r.draw().unwrap();

    let stats = r.backend().stats();
    assert!(stats.submitted.is_empty());
    assert_eq!(stats.rebuilds, vec![extent(1280, 720)]);
    assert_eq!(r.frame_index(), 1);

    r.draw().unwrap();
    assert_eq!(r.backend().stats().submitted.len(), 1);
}

#[test]
fn suboptimal_present_rebuilds_before_the_next_frame() {
    let mut r = renderer();
    r.backend_mut().queue_present_outcome(PresentOutcome::Suboptimal);
    r.draw().unwrap();
    r.draw().unwrap();

    let stats = r.backend().stats();
    assert_eq!(stats.submitted.len(), 2);
    assert_eq!(stats.rebuilds.len(), 1);
}

#[test]
fn minimized_window_defers_the_rebuild_until_restored() {
    let mut r = renderer();
    r.set_next_framebuffer_size(0, 0);
    r.update(0.016).unwrap();
    assert!(r.backend().stats().rebuilds.is_empty());

    r.set_next_framebuffer_size(1280, 800);
    r.update(0.016).unwrap();
    assert_eq!(r.backend().stats().rebuilds, vec![extent(1280, 800)]);
}

#[test]
fn destroyed_assets_release_backend_resources_once() {
    let mut r = renderer();
    let a = quad("a");
    r.create_asset_resources(&a).unwrap();
    r.destroy_asset_resources(a.uuid).unwrap();
    r.destroy_asset_resources(a.uuid).unwrap();

    assert!(!r.has_asset(a.uuid));
    assert!(!r.backend().has_asset(a.uuid));
    assert_eq!(r.backend().stats().assets_destroyed, 1);
}

#[test]
fn shutdown_releases_everything() {
    let mut r = renderer();
    let a = quad("a");
    let b = quad("b");
    r.create_asset_resources(&a).unwrap();
    r.create_asset_resources(&b).unwrap();
    r.draw().unwrap();

    let stats = r.backend().stats_handle();
    r.shutdown().unwrap();

    let stats = stats.lock();
    assert_eq!(stats.assets_destroyed, 2);
    assert_eq!(stats.teardowns, 1);
    assert!(stats.wait_idle_calls >= 1);
}
