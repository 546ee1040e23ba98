use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use log::{debug, info, warn};

use crate::{RendererError, Result};

/// Pipeline cache shared by every pass, optionally persisted between runs.
///
/// When a path is configured the cache is seeded from it at startup and
/// written back when dropped, so pass pipelines rebuilt after a resize or on
/// the next launch skip most of the driver's compilation.
pub struct PipelineCache {
    device: Arc<ash::Device>,
    cache: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    pub fn new(device: Arc<ash::Device>, path: Option<PathBuf>) -> Result<Self> {
        let initial_data = path.as_deref().map(read_cache_file).unwrap_or_default();

        let mut info = vk::PipelineCacheCreateInfo::default();
        if !initial_data.is_empty() {
            info = info.initial_data(&initial_data);
        }

        let cache = unsafe { device.create_pipeline_cache(&info, None) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to create pipeline cache: {e}"))
        })?;

        Ok(Self {
            device,
            cache,
            path,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Writes the driver's cache blob to the configured path, if any.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = unsafe { self.device.get_pipeline_cache_data(self.cache) }.map_err(|e| {
            RendererError::VulkanError(format!("Failed to read pipeline cache data: {e}"))
        })?;
        write_cache_file(path, &data)?;
        info!(
            "Saved pipeline cache ({} bytes) to {}",
            data.len(),
            path.display()
        );
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            warn!("Failed to save pipeline cache: {e}");
        }
        unsafe { self.device.destroy_pipeline_cache(self.cache, None) };
    }
}

/// Returns the cached blob at `path`, or nothing if it is missing or unreadable.
/// A stale or foreign blob is harmless; the driver validates its header.
fn read_cache_file(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => {
            info!("Loaded pipeline cache from {}", path.display());
            data
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No pipeline cache at {}", path.display());
            Vec::new()
        }
        Err(e) => {
            warn!("Ignoring unreadable pipeline cache {}: {e}", path.display());
            Vec::new()
        }
    }
}

fn write_cache_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_seed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_cache_file(&dir.path().join("absent.bin")).is_empty());
    }

    #[test]
    fn written_blob_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipelines.bin");

        write_cache_file(&path, &[1, 2, 3, 4]).unwrap();
        assert_eq!(read_cache_file(&path), vec![1, 2, 3, 4]);
    }
}
