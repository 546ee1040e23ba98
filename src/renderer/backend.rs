use ash::vk;
use uuid::Uuid;

use super::{
    asset::{AssetData, Transform},
    camera::CameraData,
};
use crate::{
    vulkan::{AcquireOutcome, PresentOutcome},
    Result,
};

/// GPU-facing half of the renderer.
///
/// [`Renderer`](super::Renderer) owns the frame bookkeeping (slots, draw
/// flags, resize reconciliation, which secondaries are stale) and drives a
/// backend through these calls in a fixed order. `slot` is always the current
/// frame-in-flight index and `image` a presentable image index returned by
/// [`acquire_next_image`](Self::acquire_next_image).
pub trait RenderBackend {
    fn swap_image_count(&self) -> usize;

    fn swap_extent(&self) -> vk::Extent2D;

    /// Blocks until the GPU has finished the last submission made from `slot`.
    fn wait_for_frame(&mut self, slot: usize) -> Result<()>;

    /// Re-arms the fence of `slot`. Called once per frame after a successful
    /// acquire, immediately before recording.
    fn reset_frame(&mut self, slot: usize) -> Result<()>;

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    fn update_camera(&mut self, slot: usize, camera: &CameraData) -> Result<()>;

    /// Refreshes the transform uniform `slot` holds for `asset`.
    fn update_asset_transform(
        &mut self,
        slot: usize,
        asset: Uuid,
        transform: &Transform,
    ) -> Result<()>;

    /// Re-records the secondary buffer drawing `asset` into `image`, binding
    /// the per-frame data of `slot`.
    fn record_asset_commands(&mut self, slot: usize, image: usize, asset: Uuid) -> Result<()>;

    /// Records the primary buffer of every stage for this frame. `visible`
    /// lists the assets whose secondaries the surface stage executes.
    fn record_frame(&mut self, slot: usize, image: usize, visible: &[Uuid]) -> Result<()>;

    /// Submits the stages chained by semaphores, signaling the fence of `slot`.
    fn submit_frame(&mut self, slot: usize, image: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image: usize) -> Result<PresentOutcome>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Releases everything sized by or bound to the swap images.
    fn destroy_swap_resources(&mut self);

    /// Rebuilds the swap chain and its dependents at (roughly) `desired`.
    fn create_swap_resources(&mut self, desired: vk::Extent2D) -> Result<()>;

    fn create_asset_resources(&mut self, asset: &AssetData) -> Result<()>;

    fn destroy_asset_resources(&mut self, asset: Uuid);
}
