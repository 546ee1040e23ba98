use std::io::ErrorKind;
use std::path::PathBuf;

use log::debug;

use crate::{RendererError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    /// Stage suffix of compiled files, as in `sky.frag.spv`.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderKind::Vertex => "vert",
            ShaderKind::Fragment => "frag",
        }
    }
}

/// Source of compiled SPIR-V for a named shader program.
///
/// Returning empty bytes is allowed here but fails pipeline creation with
/// [`RendererError::ShaderMissing`].
pub trait ShaderProvider {
    fn load(&self, program: &str, kind: ShaderKind) -> Result<Vec<u8>>;
}

/// Reads `<dir>/<program>.<kind>.spv`.
#[derive(Clone, Debug)]
pub struct DirectoryShaderProvider {
    dir: PathBuf,
}

impl DirectoryShaderProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, program: &str, kind: ShaderKind) -> PathBuf {
        self.dir
            .join(format!("{program}.{}.spv", kind.extension()))
    }
}

impl ShaderProvider for DirectoryShaderProvider {
    fn load(&self, program: &str, kind: ShaderKind) -> Result<Vec<u8>> {
        let path = self.path(program, kind);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RendererError::ShaderMissing(
                format!("{} does not exist", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_program_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sky.frag.spv"), [3u8, 2, 35, 7]).unwrap();

        let provider = DirectoryShaderProvider::new(dir.path());
        assert_eq!(
            provider.load("sky", ShaderKind::Fragment).unwrap(),
            vec![3, 2, 35, 7]
        );
    }

    #[test]
    fn missing_file_is_reported_as_missing_shader() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectoryShaderProvider::new(dir.path());

        let err = provider.load("sky", ShaderKind::Vertex).unwrap_err();
        assert!(matches!(err, RendererError::ShaderMissing(msg) if msg.contains("sky.vert.spv")));
    }

    #[test]
    fn empty_file_loads_as_empty_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pbr.vert.spv"), b"").unwrap();

        let provider = DirectoryShaderProvider::new(dir.path());
        assert!(provider.load("pbr", ShaderKind::Vertex).unwrap().is_empty());
    }
}
