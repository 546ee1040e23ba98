//! GPU-free backend that simulates fences, swap images and command recording.
//!
//! Used by tests, benches and CI machines without a Vulkan driver. It enforces
//! the synchronization rules a real device would silently violate: a slot's
//! command buffers may only be touched once its fence has been waited on, and
//! a swap image's secondaries may only be re-recorded once the slot that last
//! submitted to that image has completed.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use ash::vk;
use log::trace;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    asset::{AssetData, Transform},
    backend::RenderBackend,
    camera::CameraData,
};
use crate::{
    vulkan::{AcquireOutcome, PresentOutcome},
    RendererError, Result,
};

/// Simulated state of a frame-in-flight fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    /// GPU work (if any) has completed.
    Signaled,
    /// Re-armed by `reset_frame`, awaiting the next submission.
    Reset,
    /// Submitted; becomes signaled on the next wait.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetRecording {
    pub slot: usize,
    pub image: usize,
    pub asset: Uuid,
    /// Swap chain generation the secondary was recorded against.
    pub swap_generation: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedFrame {
    pub slot: usize,
    pub image: usize,
    pub visible: Vec<Uuid>,
}

/// Everything the backend was asked to do, in call order.
#[derive(Clone, Debug, Default)]
pub struct HeadlessStats {
    /// Slot of every fence wait.
    pub fence_waits: Vec<usize>,
    /// `(slot, image)` of every successful acquire.
    pub acquisitions: Vec<(usize, usize)>,
    pub teardowns: usize,
    /// Extent of every swap chain rebuild.
    pub rebuilds: Vec<vk::Extent2D>,
    pub wait_idle_calls: usize,
    pub camera_uploads: Vec<usize>,
    pub transform_uploads: Vec<(usize, Uuid)>,
    pub asset_recordings: Vec<AssetRecording>,
    pub submitted: Vec<SubmittedFrame>,
    pub presented: usize,
    pub assets_created: usize,
    pub assets_destroyed: usize,
}

pub struct HeadlessBackend {
    fences: Vec<FenceState>,
    image_count: usize,
    extent: vk::Extent2D,
    swap_alive: bool,
    swap_generation: u64,
    next_image: usize,
    /// Slot that last submitted work for each swap image.
    image_owners: Vec<Option<usize>>,
    assets: HashSet<Uuid>,
    recorded: HashSet<(usize, Uuid)>,
    frame_in_progress: Option<(usize, Vec<Uuid>)>,
    acquire_overrides: VecDeque<AcquireOutcome>,
    present_overrides: VecDeque<PresentOutcome>,
    stats: Arc<Mutex<HeadlessStats>>,
}

impl HeadlessBackend {
    /// Fences start signaled, like the real backend's.
    pub fn new(frames_in_flight: usize, image_count: usize, extent: vk::Extent2D) -> Self {
        Self {
            fences: vec![FenceState::Signaled; frames_in_flight],
            image_count,
            extent,
            swap_alive: true,
            swap_generation: 0,
            next_image: 0,
            image_owners: vec![None; image_count],
            assets: HashSet::new(),
            recorded: HashSet::new(),
            frame_in_progress: None,
            acquire_overrides: VecDeque::new(),
            present_overrides: VecDeque::new(),
            stats: Arc::new(Mutex::new(HeadlessStats::default())),
        }
    }

    /// Snapshot of the calls made so far.
    pub fn stats(&self) -> HeadlessStats {
        self.stats.lock().clone()
    }

    /// Shared handle to the live counters.
    pub fn stats_handle(&self) -> Arc<Mutex<HeadlessStats>> {
        self.stats.clone()
    }

    pub fn fence_state(&self, slot: usize) -> Option<FenceState> {
        self.fences.get(slot).copied()
    }

    pub fn swap_generation(&self) -> u64 {
        self.swap_generation
    }

    pub fn has_asset(&self, asset: Uuid) -> bool {
        self.assets.contains(&asset)
    }

    /// Makes the next acquire report an out-of-date surface.
    pub fn queue_acquire_out_of_date(&mut self) {
        self.acquire_overrides.push_back(AcquireOutcome::OutOfDate);
    }

    /// Overrides the outcome of the next present.
    pub fn queue_present_outcome(&mut self, outcome: PresentOutcome) {
        self.present_overrides.push_back(outcome);
    }

    fn fence(&self, slot: usize) -> Result<FenceState> {
        self.fence_state(slot).ok_or_else(|| {
            RendererError::InvalidState(format!(
                "frame slot {slot} out of range ({} slots)",
                self.fences.len()
            ))
        })
    }

    fn require_idle_slot(&self, slot: usize, action: &str) -> Result<()> {
        if self.fence(slot)? == FenceState::Pending {
            return Err(RendererError::InvalidState(format!(
                "{action} while frame slot {slot} is still in flight"
            )));
        }
        Ok(())
    }

    fn require_swap(&self, image: Option<usize>) -> Result<()> {
        if !self.swap_alive {
            return Err(RendererError::InvalidState(
                "swap resources used after teardown".into(),
            ));
        }
        match image {
            Some(image) if image >= self.image_count => Err(RendererError::InvalidState(
                format!("swap image {image} out of range ({} images)", self.image_count),
            )),
            _ => Ok(()),
        }
    }
}

impl RenderBackend for HeadlessBackend {
    fn swap_image_count(&self) -> usize {
        self.image_count
    }

    fn swap_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_frame(&mut self, slot: usize) -> Result<()> {
        self.fence(slot)?;
        if self.fences[slot] == FenceState::Pending {
            self.fences[slot] = FenceState::Signaled;
        }
        self.stats.lock().fence_waits.push(slot);
        Ok(())
    }

    fn reset_frame(&mut self, slot: usize) -> Result<()> {
        if self.fence(slot)? != FenceState::Signaled {
            return Err(RendererError::InvalidState(format!(
                "fence of frame slot {slot} reset before it was waited on"
            )));
        }
        self.fences[slot] = FenceState::Reset;
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.fence(slot)?;
        self.require_swap(None)?;

        if let Some(outcome) = self.acquire_overrides.pop_front() {
            return Ok(outcome);
        }

        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count.max(1);
        self.stats.lock().acquisitions.push((slot, image));
        Ok(AcquireOutcome::Acquired {
            image_index: image as u32,
            suboptimal: false,
        })
    }

    fn update_camera(&mut self, slot: usize, _camera: &CameraData) -> Result<()> {
        self.require_idle_slot(slot, "camera uniform written")?;
        self.stats.lock().camera_uploads.push(slot);
        Ok(())
    }

    fn update_asset_transform(
        &mut self,
        slot: usize,
        asset: Uuid,
        _transform: &Transform,
    ) -> Result<()> {
        self.require_idle_slot(slot, "transform uniform written")?;
        if !self.assets.contains(&asset) {
            return Err(RendererError::InvalidState(format!(
                "transform written for unknown asset {asset}"
            )));
        }
        self.stats.lock().transform_uploads.push((slot, asset));
        Ok(())
    }

    fn record_asset_commands(&mut self, slot: usize, image: usize, asset: Uuid) -> Result<()> {
        self.fence(slot)?;
        self.require_swap(Some(image))?;
        if !self.assets.contains(&asset) {
            return Err(RendererError::InvalidState(format!(
                "secondary recorded for unknown asset {asset}"
            )));
        }

        // A fresh secondary can be recorded at any time; re-recording one that
        // an in-flight submission may still execute cannot.
        if self.recorded.contains(&(image, asset)) {
            if let Some(owner) = self.image_owners[image] {
                self.require_idle_slot(owner, "secondary re-recorded")?;
            }
        }
        self.recorded.insert((image, asset));

        trace!("headless: recorded {asset} for image {image} (slot {slot})");
        self.stats.lock().asset_recordings.push(AssetRecording {
            slot,
            image,
            asset,
            swap_generation: self.swap_generation,
        });
        Ok(())
    }

    fn record_frame(&mut self, slot: usize, image: usize, visible: &[Uuid]) -> Result<()> {
        if self.fence(slot)? != FenceState::Reset {
            return Err(RendererError::InvalidState(format!(
                "primary buffers of slot {slot} recorded without waiting on its fence"
            )));
        }
        self.require_swap(Some(image))?;
        if let Some(missing) = visible.iter().find(|a| !self.recorded.contains(&(image, **a))) {
            return Err(RendererError::InvalidState(format!(
                "asset {missing} has no secondary for image {image}"
            )));
        }
        self.frame_in_progress = Some((image, visible.to_vec()));
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize, image: usize) -> Result<()> {
        if self.fence(slot)? != FenceState::Reset {
            return Err(RendererError::InvalidState(format!(
                "slot {slot} submitted with an unreset fence"
            )));
        }
        let visible = match self.frame_in_progress.take() {
            Some((recorded_image, visible)) if recorded_image == image => visible,
            _ => {
                return Err(RendererError::InvalidState(format!(
                    "image {image} submitted without recorded primaries"
                )))
            }
        };

        self.fences[slot] = FenceState::Pending;
        self.image_owners[image] = Some(slot);
        self.stats.lock().submitted.push(SubmittedFrame {
            slot,
            image,
            visible,
        });
        Ok(())
    }

    fn present(&mut self, _slot: usize, image: usize) -> Result<PresentOutcome> {
        self.require_swap(Some(image))?;
        self.stats.lock().presented += 1;
        Ok(self
            .present_overrides
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn wait_idle(&mut self) -> Result<()> {
        for fence in &mut self.fences {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
        self.stats.lock().wait_idle_calls += 1;
        Ok(())
    }

    fn destroy_swap_resources(&mut self) {
        self.swap_alive = false;
        self.recorded.clear();
        self.image_owners.iter_mut().for_each(|owner| *owner = None);
        self.stats.lock().teardowns += 1;
    }

    fn create_swap_resources(&mut self, desired: vk::Extent2D) -> Result<()> {
        if self.fences.contains(&FenceState::Pending) {
            return Err(RendererError::InvalidState(
                "swap resources rebuilt while frames are in flight".into(),
            ));
        }
        self.extent = vk::Extent2D {
            width: desired.width.max(1),
            height: desired.height.max(1),
        };
        self.swap_alive = true;
        self.swap_generation += 1;
        self.next_image = 0;
        self.image_owners = vec![None; self.image_count];
        self.stats.lock().rebuilds.push(self.extent);
        Ok(())
    }

    fn create_asset_resources(&mut self, asset: &AssetData) -> Result<()> {
        self.assets.insert(asset.uuid);
        self.stats.lock().assets_created += 1;
        Ok(())
    }

    fn destroy_asset_resources(&mut self, asset: Uuid) {
        if self.assets.remove(&asset) {
            self.recorded.retain(|(_, recorded)| *recorded != asset);
            self.stats.lock().assets_destroyed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(
            2,
            3,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        )
    }

    #[test]
    fn reset_requires_signaled_fence() {
        let mut b = backend();
        b.reset_frame(0).unwrap();
        b.record_frame(0, 0, &[]).unwrap();
        b.submit_frame(0, 0).unwrap();
        assert_eq!(b.fence_state(0), Some(FenceState::Pending));

        assert!(b.reset_frame(0).is_err());
        b.wait_for_frame(0).unwrap();
        assert!(b.reset_frame(0).is_ok());
    }

    #[test]
    fn images_rotate_round_robin() {
        let mut b = backend();
        let images: Vec<_> = (0..4)
            .map(|_| match b.acquire_next_image(0).unwrap() {
                AcquireOutcome::Acquired { image_index, .. } => image_index,
                AcquireOutcome::OutOfDate => unreachable!(),
            })
            .collect();
        assert_eq!(images, vec![0, 1, 2, 0]);
    }

    #[test]
    fn rerecording_in_flight_secondary_is_rejected() {
        let mut b = backend();
        let asset = AssetData {
            uuid: Uuid::new_v4(),
            ..Default::default()
        };
        b.create_asset_resources(&asset).unwrap();
        b.record_asset_commands(0, 1, asset.uuid).unwrap();

        b.reset_frame(0).unwrap();
        b.record_frame(0, 1, &[asset.uuid]).unwrap();
        b.submit_frame(0, 1).unwrap();

        assert!(b.record_asset_commands(1, 1, asset.uuid).is_err());
        b.wait_for_frame(0).unwrap();
        assert!(b.record_asset_commands(1, 1, asset.uuid).is_ok());
    }

    #[test]
    fn teardown_invalidates_secondaries() {
        let mut b = backend();
        let asset = AssetData {
            uuid: Uuid::new_v4(),
            ..Default::default()
        };
        b.create_asset_resources(&asset).unwrap();
        b.record_asset_commands(0, 0, asset.uuid).unwrap();

        b.destroy_swap_resources();
        assert!(b.acquire_next_image(0).is_err());

        b.create_swap_resources(vk::Extent2D {
            width: 800,
            height: 600,
        })
        .unwrap();
        b.reset_frame(0).unwrap();
        assert!(b.record_frame(0, 0, &[asset.uuid]).is_err());
        assert_eq!(b.swap_generation(), 1);
    }
}
