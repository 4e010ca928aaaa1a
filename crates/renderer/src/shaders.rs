//! Where pipeline shader bytecode comes from.
//!
//! Pipelines name their shaders logically (`"mesh.vert.spv"`). A
//! [`ShaderSource`] turns such a name into SPIR-V bytes. The bytes are only
//! read while pipelines are built, which happens again after every
//! swapchain recreation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RenderError, RenderResult};

/// Supplies compiled shader bytecode by logical name.
pub trait ShaderSource {
    /// Returns the SPIR-V bytes for `name`.
    fn load(&self, name: &str) -> RenderResult<Vec<u8>>;
}

/// Reads `<root>/<name>` from disk on every load.
#[derive(Clone, Debug)]
pub struct SpirvDirectory {
    root: PathBuf,
}

impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ShaderSource for SpirvDirectory {
    fn load(&self, name: &str) -> RenderResult<Vec<u8>> {
        let path = self.root.join(name);
        let bytes = std::fs::read(&path).map_err(|e| {
            RenderError::ShaderSource(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Ok(bytes)
    }
}

/// Shader blobs registered up front, for embedded shaders and tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryShaders {
    blobs: HashMap<String, Vec<u8>>,
}

impl InMemoryShaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the blob for `name`.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(name.into(), bytes.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ShaderSource for InMemoryShaders {
    fn load(&self, name: &str) -> RenderResult<Vec<u8>> {
        self.blobs
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::ShaderSource(format!("No shader named '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_lookup() {
        let shaders = InMemoryShaders::new().with("a.spv", vec![1u8, 2, 3, 4]);
        assert_eq!(shaders.len(), 1);
        assert_eq!(shaders.load("a.spv").unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(
            shaders.load("b.spv"),
            Err(RenderError::ShaderSource(msg)) if msg.contains("b.spv")
        ));
    }

    #[test]
    fn test_directory_reads_files() {
        let dir = std::env::temp_dir().join(format!("vkframe-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x.spv"), [7u8; 8]).unwrap();

        let source = SpirvDirectory::new(&dir);
        assert_eq!(source.load("x.spv").unwrap(), vec![7u8; 8]);
        assert!(matches!(
            source.load("missing.spv"),
            Err(RenderError::ShaderSource(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
