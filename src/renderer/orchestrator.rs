use std::collections::HashMap;

use ash::vk;
use glam::{Mat4, Vec3};
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{
    asset::{AssetData, Transform},
    backend::RenderBackend,
    camera::CameraData,
};
use crate::{
    config::RendererConfig,
    vulkan::{AcquireOutcome, PresentOutcome},
    RendererError, Result,
};

/// Progress through a swap chain rebuild.
///
/// A rebuild runs start to finish inside one call. If a step fails the
/// renderer stays parked in that state and refuses to draw again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreationState {
    Normal,
    WaitIdle,
    TearDown,
    Rebuild,
    ReRecord,
}

struct AssetEntry {
    uuid: Uuid,
    name: String,
    transform: Transform,
    should_draw: bool,
    index_count: u32,
    /// Bumped whenever `transform` actually changes.
    transform_generation: u64,
    /// Transform generation each frame slot's uniform holds.
    uploaded: Vec<u64>,
}

/// Slot and transform a secondary buffer was recorded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RecordStamp {
    slot: usize,
    transform_generation: u64,
}

struct CameraState {
    position: Vec3,
    view: Mat4,
    generation: u64,
}

/// Frame orchestrator.
///
/// Owns the asset table and per-frame bookkeeping and sequences a
/// [`RenderBackend`] through wait, acquire, record, submit and present. The
/// current frame slot advances modulo `frames_in_flight` after every draw.
pub struct Renderer<B: RenderBackend> {
    backend: B,
    config: RendererConfig,
    assets: Vec<AssetEntry>,
    asset_index: HashMap<Uuid, usize>,
    frame_index: usize,
    /// Slot that last submitted work for each swap image.
    images_in_flight: Vec<Option<usize>>,
    record_stamps: HashMap<(usize, Uuid), RecordStamp>,
    desired_extent: Option<vk::Extent2D>,
    reconciled_extent: vk::Extent2D,
    camera: CameraState,
    camera_uploaded: Vec<Option<u64>>,
    recreation: RecreationState,
    elapsed: f32,
}

impl<B: RenderBackend> Renderer<B> {
    /// Wraps an initialized backend whose swap resources already exist.
    pub fn with_backend(backend: B, config: RendererConfig) -> Result<Self> {
        config.validate()?;

        let frames = config.frames_in_flight;
        let images_in_flight = vec![None; backend.swap_image_count()];
        let reconciled_extent = backend.swap_extent();

        info!(
            "Renderer ready: {frames} frames in flight, {} swap images, {}x{}",
            images_in_flight.len(),
            reconciled_extent.width,
            reconciled_extent.height
        );

        Ok(Self {
            backend,
            config,
            assets: Vec::new(),
            asset_index: HashMap::new(),
            frame_index: 0,
            images_in_flight,
            record_stamps: HashMap::new(),
            desired_extent: None,
            reconciled_extent,
            camera: CameraState {
                position: Vec3::ZERO,
                view: Mat4::IDENTITY,
                generation: 0,
            },
            camera_uploaded: vec![None; frames],
            recreation: RecreationState::Normal,
            elapsed: 0.0,
        })
    }

    /// Reconciles a pending framebuffer size. Several size requests between
    /// updates collapse into one rebuild at the last requested size.
    pub fn update(&mut self, delta_time: f32) -> Result<()> {
        self.ensure_operational()?;
        self.elapsed += delta_time;

        let Some(desired) = self.desired_extent else {
            return Ok(());
        };
        if desired == self.reconciled_extent {
            return Ok(());
        }
        if desired.width == 0 || desired.height == 0 {
            trace!("Framebuffer is zero-sized, deferring swap chain rebuild");
            return Ok(());
        }

        info!(
            "Framebuffer resized {}x{} -> {}x{}",
            self.reconciled_extent.width,
            self.reconciled_extent.height,
            desired.width,
            desired.height
        );
        self.recreate_swap_resources(desired)
    }

    /// Renders and presents one frame, then clears every draw flag and moves
    /// on to the next frame slot.
    pub fn draw(&mut self) -> Result<()> {
        self.ensure_operational()?;

        let slot = self.frame_index;
        self.backend.wait_for_frame(slot)?;

        let image = match self.backend.acquire_next_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("Acquired suboptimal swap image {image_index}");
                }
                image_index as usize
            }
            AcquireOutcome::OutOfDate => {
                info!("Swap chain out of date on acquire");
                self.rebuild_for_surface_change()?;
                self.end_frame();
                return Ok(());
            }
        };

        let owner = self.images_in_flight.get(image).copied().ok_or_else(|| {
            RendererError::InvalidState(format!(
                "acquired image {image} but only {} swap images exist",
                self.images_in_flight.len()
            ))
        })?;
        if let Some(owner) = owner.filter(|owner| *owner != slot) {
            self.backend.wait_for_frame(owner)?;
        }
        self.images_in_flight[image] = Some(slot);

        self.backend.reset_frame(slot)?;
        self.upload_camera(slot)?;

        let visible: Vec<Uuid> = self
            .assets
            .iter()
            .filter(|entry| entry.should_draw)
            .map(|entry| entry.uuid)
            .collect();
        for &uuid in &visible {
            self.refresh_asset(slot, image, uuid)?;
        }

        self.backend.record_frame(slot, image, &visible)?;
        self.backend.submit_frame(slot, image)?;
        trace!(
            "Submitted frame: slot {slot}, image {image}, {} assets",
            visible.len()
        );

        match self.backend.present(slot, image)? {
            PresentOutcome::Presented => {}
            outcome => {
                info!("Present reported {outcome:?}");
                self.rebuild_for_surface_change()?;
            }
        }

        self.end_frame();
        Ok(())
    }

    /// Marks `uuid` to be drawn in the next frame only.
    ///
    /// # Panics
    ///
    /// Panics if no asset with that id exists.
    pub fn set_asset_draw_state(&mut self, uuid: Uuid) {
        let Some(&index) = self.asset_index.get(&uuid) else {
            panic!("set_asset_draw_state called with unknown asset {uuid}");
        };
        self.assets[index].should_draw = true;
    }

    pub fn set_asset_transform(&mut self, uuid: Uuid, transform: Transform) {
        self.modify_transform(uuid, "transform", |t| *t = transform);
    }

    pub fn set_asset_position(&mut self, uuid: Uuid, position: Vec3) {
        self.modify_transform(uuid, "position", |t| t.position = position);
    }

    /// Euler angles in radians.
    pub fn set_asset_rotation(&mut self, uuid: Uuid, rotation: Vec3) {
        self.modify_transform(uuid, "rotation", |t| t.rotation = rotation);
    }

    pub fn set_asset_scale(&mut self, uuid: Uuid, scale: Vec3) {
        self.modify_transform(uuid, "scale", |t| t.scale = scale);
    }

    /// Position and view matrix of the camera for the next frames. The
    /// projection follows the swap extent.
    pub fn update_camera_data(&mut self, position: Vec3, view: Mat4) {
        if self.camera.position == position && self.camera.view == view {
            return;
        }
        self.camera.position = position;
        self.camera.view = view;
        self.camera.generation += 1;
    }

    /// Uploads an asset and records its secondary buffer for every swap image.
    ///
    /// Creating an id that already exists leaves the existing resources alone.
    pub fn create_asset_resources(&mut self, asset: &AssetData) -> Result<()> {
        if !asset.is_valid() {
            return Err(RendererError::InvalidAsset(format!(
                "'{}' ({}) has no geometry or a nil id",
                asset.name, asset.uuid
            )));
        }
        if self.asset_index.contains_key(&asset.uuid) {
            warn!(
                "Asset '{}' ({}) already has GPU resources, ignoring",
                asset.name, asset.uuid
            );
            return Ok(());
        }
        if self.assets.len() >= self.config.max_asset_count as usize {
            return Err(RendererError::InvalidAsset(format!(
                "asset limit of {} reached",
                self.config.max_asset_count
            )));
        }

        self.backend.create_asset_resources(asset)?;

        self.asset_index.insert(asset.uuid, self.assets.len());
        self.assets.push(AssetEntry {
            uuid: asset.uuid,
            name: asset.name.clone(),
            transform: Transform::default(),
            should_draw: false,
            index_count: asset.index_count(),
            transform_generation: 0,
            uploaded: vec![0; self.config.frames_in_flight],
        });

        let slot = self.frame_index;
        for image in 0..self.images_in_flight.len() {
            self.record_asset(slot, image, asset.uuid)?;
        }

        info!(
            "Created resources for '{}' ({}), {} indices",
            asset.name,
            asset.uuid,
            asset.index_count()
        );
        Ok(())
    }

    /// Releases one asset's resources. Unknown ids are ignored.
    pub fn destroy_asset_resources(&mut self, uuid: Uuid) -> Result<()> {
        if !self.asset_index.contains_key(&uuid) {
            warn!("destroy_asset_resources: unknown asset {uuid}");
            return Ok(());
        }

        self.backend.wait_idle()?;
        self.remove_asset(uuid);
        Ok(())
    }

    pub fn destroy_all_asset_resources(&mut self) -> Result<()> {
        if self.assets.is_empty() {
            return Ok(());
        }

        self.backend.wait_idle()?;
        let ids: Vec<Uuid> = self.assets.iter().map(|entry| entry.uuid).collect();
        for uuid in ids {
            self.remove_asset(uuid);
        }
        Ok(())
    }

    /// Stores the size the next `update` rebuilds the swap chain at.
    pub fn set_next_framebuffer_size(&mut self, width: u32, height: u32) {
        self.desired_extent = Some(vk::Extent2D { width, height });
    }

    /// Waits for the GPU and releases every asset and swap resource. The
    /// backend's own objects are released when it drops.
    pub fn shutdown(mut self) -> Result<()> {
        info!("Shutting down renderer");
        self.backend.wait_idle()?;
        let ids: Vec<Uuid> = self.assets.iter().map(|entry| entry.uuid).collect();
        for uuid in ids {
            self.remove_asset(uuid);
        }
        self.backend.destroy_swap_resources();
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Current frame-in-flight slot.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn recreation_state(&self) -> RecreationState {
        self.recreation
    }

    pub fn swap_extent(&self) -> vk::Extent2D {
        self.backend.swap_extent()
    }

    /// Seconds accumulated through `update`.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn has_asset(&self, uuid: Uuid) -> bool {
        self.asset_index.contains_key(&uuid)
    }

    /// Draw flag of an asset; `None` if it does not exist.
    pub fn asset_draw_state(&self, uuid: Uuid) -> Option<bool> {
        self.entry(uuid).map(|entry| entry.should_draw)
    }

    pub fn asset_transform(&self, uuid: Uuid) -> Option<Transform> {
        self.entry(uuid).map(|entry| entry.transform)
    }

    pub fn asset_index_count(&self, uuid: Uuid) -> Option<u32> {
        self.entry(uuid).map(|entry| entry.index_count)
    }

    fn entry(&self, uuid: Uuid) -> Option<&AssetEntry> {
        self.asset_index.get(&uuid).map(|&index| &self.assets[index])
    }

    fn ensure_operational(&self) -> Result<()> {
        match self.recreation {
            RecreationState::Normal => Ok(()),
            state => Err(RendererError::InvalidState(format!(
                "swap chain rebuild previously failed during {state:?}"
            ))),
        }
    }

    fn enter(&mut self, state: RecreationState) {
        debug!("Swap chain recreation: {:?} -> {state:?}", self.recreation);
        self.recreation = state;
    }

    fn modify_transform(&mut self, uuid: Uuid, what: &str, change: impl FnOnce(&mut Transform)) {
        let Some(&index) = self.asset_index.get(&uuid) else {
            error!("Cannot set {what} of unknown asset {uuid}");
            return;
        };

        let entry = &mut self.assets[index];
        let before = entry.transform;
        change(&mut entry.transform);
        if entry.transform != before {
            entry.transform_generation += 1;
        }
    }

    fn upload_camera(&mut self, slot: usize) -> Result<()> {
        if self.camera_uploaded[slot] == Some(self.camera.generation) {
            return Ok(());
        }

        let data = CameraData::new(
            self.camera.position,
            self.camera.view,
            self.backend.swap_extent(),
            &self.config.camera,
        );
        self.backend.update_camera(slot, &data)?;
        self.camera_uploaded[slot] = Some(self.camera.generation);
        Ok(())
    }

    /// Brings the slot's transform uniform up to date, then re-records the
    /// asset's secondary for `image` if it was recorded with a different slot
    /// or an older transform.
    fn refresh_asset(&mut self, slot: usize, image: usize, uuid: Uuid) -> Result<()> {
        let index = self.asset_index[&uuid];
        let entry = &self.assets[index];
        if entry.uploaded[slot] != entry.transform_generation {
            let (transform, generation) = (entry.transform, entry.transform_generation);
            self.backend.update_asset_transform(slot, uuid, &transform)?;
            self.assets[index].uploaded[slot] = generation;
        }

        let current = RecordStamp {
            slot,
            transform_generation: self.assets[index].transform_generation,
        };
        if self.record_stamps.get(&(image, uuid)) != Some(&current) {
            self.record_asset(slot, image, uuid)?;
        }
        Ok(())
    }

    fn record_asset(&mut self, slot: usize, image: usize, uuid: Uuid) -> Result<()> {
        self.backend.record_asset_commands(slot, image, uuid)?;
        let transform_generation = self.assets[self.asset_index[&uuid]].transform_generation;
        self.record_stamps.insert(
            (image, uuid),
            RecordStamp {
                slot,
                transform_generation,
            },
        );
        Ok(())
    }

    fn remove_asset(&mut self, uuid: Uuid) {
        let Some(index) = self.asset_index.remove(&uuid) else {
            return;
        };

        self.backend.destroy_asset_resources(uuid);
        let entry = self.assets.remove(index);
        for moved in &self.assets[index..] {
            if let Some(i) = self.asset_index.get_mut(&moved.uuid) {
                *i -= 1;
            }
        }
        self.record_stamps.retain(|(_, recorded), _| *recorded != uuid);

        info!("Destroyed resources for '{}' ({uuid})", entry.name);
    }

    /// Rebuild after the surface reported out-of-date or suboptimal.
    fn rebuild_for_surface_change(&mut self) -> Result<()> {
        let target = self.desired_extent.unwrap_or(self.reconciled_extent);
        if target.width == 0 || target.height == 0 {
            debug!("Surface is zero-sized, skipping rebuild");
            return Ok(());
        }
        self.recreate_swap_resources(target)
    }

    fn recreate_swap_resources(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.enter(RecreationState::WaitIdle);
        self.backend.wait_idle()?;

        self.enter(RecreationState::TearDown);
        self.backend.destroy_swap_resources();
        self.images_in_flight.clear();
        self.record_stamps.clear();

        self.enter(RecreationState::Rebuild);
        self.backend.create_swap_resources(extent)?;
        self.images_in_flight = vec![None; self.backend.swap_image_count()];
        self.reconciled_extent = extent;
        // The projection depends on the new aspect ratio.
        self.camera.generation += 1;

        self.enter(RecreationState::ReRecord);
        let slot = self.frame_index;
        let ids: Vec<Uuid> = self.assets.iter().map(|entry| entry.uuid).collect();
        for image in 0..self.images_in_flight.len() {
            for &uuid in &ids {
                self.refresh_asset(slot, image, uuid)?;
            }
        }

        self.enter(RecreationState::Normal);
        let actual = self.backend.swap_extent();
        info!(
            "Swap chain rebuilt at {}x{} ({} secondaries re-recorded)",
            actual.width,
            actual.height,
            ids.len() * self.images_in_flight.len()
        );
        Ok(())
    }

    fn end_frame(&mut self) {
        for entry in &mut self.assets {
            entry.should_draw = false;
        }
        self.frame_index = (self.frame_index + 1) % self.config.frames_in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{
        asset::{MeshData, Vertex},
        headless::HeadlessBackend,
    };

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn renderer() -> Renderer<HeadlessBackend> {
        let config = RendererConfig::default();
        let backend = HeadlessBackend::new(config.frames_in_flight, 3, extent(800, 600));
        Renderer::with_backend(backend, config).unwrap()
    }

    fn asset(name: &str) -> AssetData {
        AssetData {
            uuid: Uuid::new_v4(),
            name: name.into(),
            meshes: vec![MeshData {
                vertices: vec![Vertex::default(); 3],
                indices: vec![0, 1, 2],
            }],
            materials: Vec::new(),
        }
    }

    #[test]
    fn frame_slots_cycle() {
        let mut r = renderer();
        let slots: Vec<_> = (0..4)
            .map(|_| {
                let slot = r.frame_index();
                r.draw().unwrap();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn draw_flags_last_one_frame() {
        let mut r = renderer();
        let a = asset("a");
        r.create_asset_resources(&a).unwrap();

        r.set_asset_draw_state(a.uuid);
        assert_eq!(r.asset_draw_state(a.uuid), Some(true));
        r.draw().unwrap();
        assert_eq!(r.asset_draw_state(a.uuid), Some(false));

        r.draw().unwrap();
        let submitted = r.backend().stats().submitted;
        assert_eq!(submitted[0].visible, vec![a.uuid]);
        assert!(submitted[1].visible.is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown asset")]
    fn draw_state_of_unknown_asset_panics() {
        renderer().set_asset_draw_state(Uuid::new_v4());
    }

    #[test]
    fn unknown_transform_target_is_ignored() {
        let mut r = renderer();
        r.set_asset_position(Uuid::new_v4(), Vec3::ONE);
        assert_eq!(r.asset_count(), 0);
    }

    #[test]
    fn invalid_asset_is_refused() {
        let mut r = renderer();
        let mut empty = asset("empty");
        empty.meshes.clear();
        assert!(matches!(
            r.create_asset_resources(&empty),
            Err(RendererError::InvalidAsset(_))
        ));
        assert_eq!(r.backend().stats().assets_created, 0);
    }

    #[test]
    fn double_create_keeps_existing_resources() {
        let mut r = renderer();
        let a = asset("a");
        r.create_asset_resources(&a).unwrap();
        r.set_asset_position(a.uuid, Vec3::X);
        r.create_asset_resources(&a).unwrap();

        assert_eq!(r.backend().stats().assets_created, 1);
        assert_eq!(r.asset_transform(a.uuid).unwrap().position, Vec3::X);
    }

    #[test]
    fn create_records_a_secondary_per_swap_image() {
        let mut r = renderer();
        let a = asset("a");
        r.create_asset_resources(&a).unwrap();

        let mut images: Vec<_> = r
            .backend()
            .stats()
            .asset_recordings
            .iter()
            .map(|rec| rec.image)
            .collect();
        images.sort_unstable();
        assert_eq!(images, vec![0, 1, 2]);
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut r = renderer();
        let a = asset("a");
        let b = asset("b");
        r.create_asset_resources(&a).unwrap();
        r.create_asset_resources(&b).unwrap();

        r.destroy_asset_resources(a.uuid).unwrap();
        r.destroy_asset_resources(a.uuid).unwrap();
        assert_eq!(r.asset_count(), 1);
        assert!(!r.backend().has_asset(a.uuid));

        // Indices of the remaining asset survive the removal.
        r.set_asset_draw_state(b.uuid);
        r.draw().unwrap();
        assert_eq!(r.backend().stats().submitted[0].visible, vec![b.uuid]);
    }

    #[test]
    fn transform_change_reuploads_and_rerecords() {
        let mut r = renderer();
        let a = asset("a");
        r.create_asset_resources(&a).unwrap();

        // Frame 0: slot 0, image 0 recorded at creation with slot 0.
        r.set_asset_draw_state(a.uuid);
        r.draw().unwrap();
        let before = r.backend().stats();
        assert!(before.transform_uploads.is_empty());
        assert_eq!(before.asset_recordings.len(), 3);

        // Frame 1 moves the asset: slot 1 uploads, image 1 re-records.
        r.set_asset_position(a.uuid, Vec3::new(0.0, 1.0, 0.0));
        r.set_asset_draw_state(a.uuid);
        r.draw().unwrap();
        let after = r.backend().stats();
        assert_eq!(after.transform_uploads, vec![(1, a.uuid)]);
        assert_eq!(after.asset_recordings.len(), 4);
    }

    #[test]
    fn setting_an_unchanged_transform_does_not_rerecord() {
        let mut r = renderer();
        let a = asset("a");
        r.create_asset_resources(&a).unwrap();

        r.set_asset_scale(a.uuid, Vec3::ONE);
        r.set_asset_draw_state(a.uuid);
        r.draw().unwrap();
        assert_eq!(r.backend().stats().asset_recordings.len(), 3);
    }

    #[test]
    fn zero_sized_framebuffer_defers_rebuild() {
        let mut r = renderer();
        r.set_next_framebuffer_size(0, 0);
        r.update(0.016).unwrap();
        assert!(r.backend().stats().rebuilds.is_empty());

        r.set_next_framebuffer_size(1024, 768);
        r.update(0.016).unwrap();
        assert_eq!(r.backend().stats().rebuilds, vec![extent(1024, 768)]);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_drawing() {
        let mut r = renderer();
        r.backend_mut().queue_acquire_out_of_date();
        r.draw().unwrap();

        let stats = r.backend().stats();
        assert_eq!(stats.rebuilds.len(), 1);
        assert!(stats.submitted.is_empty());
        assert_eq!(r.frame_index(), 1);
        assert_eq!(r.recreation_state(), RecreationState::Normal);
    }

    #[test]
    fn suboptimal_present_rebuilds_after_submitting() {
        let mut r = renderer();
        r.backend_mut()
            .queue_present_outcome(PresentOutcome::Suboptimal);
        r.draw().unwrap();

        let stats = r.backend().stats();
        assert_eq!(stats.submitted.len(), 1);
        assert_eq!(stats.rebuilds, vec![extent(800, 600)]);
    }

    #[test]
    fn camera_uploads_once_per_slot_and_after_rebuild() {
        let mut r = renderer();
        r.update_camera_data(Vec3::Z, Mat4::IDENTITY);
        for _ in 0..4 {
            r.draw().unwrap();
        }
        assert_eq!(r.backend().stats().camera_uploads, vec![0, 1]);

        r.set_next_framebuffer_size(320, 240);
        r.update(0.0).unwrap();
        r.draw().unwrap();
        assert_eq!(r.backend().stats().camera_uploads, vec![0, 1, 0]);
    }

    #[test]
    fn unchanged_camera_is_not_reuploaded() {
        let mut r = renderer();
        r.draw().unwrap();
        r.draw().unwrap();
        r.update_camera_data(Vec3::ZERO, Mat4::IDENTITY);
        r.draw().unwrap();
        assert_eq!(r.backend().stats().camera_uploads, vec![0, 1]);
    }

    #[test]
    fn asset_limit_is_enforced() {
        let config = RendererConfig {
            max_asset_count: 1,
            ..Default::default()
        };
        let backend = HeadlessBackend::new(2, 2, extent(64, 64));
        let mut r = Renderer::with_backend(backend, config).unwrap();

        r.create_asset_resources(&asset("a")).unwrap();
        assert!(r.create_asset_resources(&asset("b")).is_err());
    }
}
