//! Image source and sink collaborators.
//!
//! Images are raw row-major 8-bit samples with no header. Sources must yield
//! exactly the configured sample count; sinks persist a finished raster under
//! a name.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::{ComputeError, ComputeResult};

/// Supplies input samples.
pub trait ImageSource: Send + Sync {
    /// Read `name`, which must hold exactly `expected_len` bytes.
    fn read(&self, name: &str, expected_len: usize) -> ComputeResult<Vec<u8>>;
}

/// Receives output samples.
pub trait ImageSink: Send + Sync {
    /// Persist `data` under `name`, replacing any previous content.
    fn write(&self, name: &str, data: &[u8]) -> ComputeResult<()>;
}

fn check_len(name: &str, expected: usize, actual: usize) -> ComputeResult<()> {
    if actual != expected {
        return Err(ComputeError::SourceSize { name: name.to_string(), expected, actual });
    }
    Ok(())
}

/// Raw files read from a directory.
#[derive(Debug, Clone)]
pub struct RawFileSource {
    root: PathBuf,
}

impl RawFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageSource for RawFileSource {
    fn read(&self, name: &str, expected_len: usize) -> ComputeResult<Vec<u8>> {
        let path = self.root.join(name);
        let data = fs::read(&path)
            .map_err(|e| ComputeError::io(format!("read {}", path.display()), e))?;
        check_len(name, expected_len, data.len())?;
        debug!(path = %path.display(), bytes = data.len(), "read source");
        Ok(data)
    }
}

/// Raw files written into a directory.
///
/// Each file is written to a temporary sibling, synced, then renamed over the
/// target, so readers never see a partial image.
#[derive(Debug, Clone)]
pub struct RawFileSink {
    root: PathBuf,
}

impl RawFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageSink for RawFileSink {
    fn write(&self, name: &str, data: &[u8]) -> ComputeResult<()> {
        let path = self.root.join(name);
        let op = || format!("write {}", path.display());

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| ComputeError::io(op(), e))?;
        tmp.write_all(data).map_err(|e| ComputeError::io(op(), e))?;
        tmp.as_file().sync_all().map_err(|e| ComputeError::io(op(), e))?;
        tmp.persist(&path).map_err(|e| ComputeError::io(op(), e.error))?;

        debug!(path = %path.display(), bytes = data.len(), "wrote output");
        Ok(())
    }
}

/// In-memory source keyed by name.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    images: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.images.insert(name.into(), data);
        self
    }

    /// Source holding a single image.
    pub fn with(name: impl Into<String>, data: Vec<u8>) -> Self {
        let mut source = Self::new();
        source.insert(name, data);
        source
    }
}

impl ImageSource for MemorySource {
    fn read(&self, name: &str, expected_len: usize) -> ComputeResult<Vec<u8>> {
        let data = self.images.get(name).ok_or_else(|| {
            ComputeError::io(
                format!("read {name}"),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such image"),
            )
        })?;
        check_len(name, expected_len, data.len())?;
        Ok(data.clone())
    }
}

/// In-memory sink collecting written images.
#[derive(Debug, Default)]
pub struct MemorySink {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the image written under `name`.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.images.lock().ok()?.get(name).cloned()
    }

    /// Names written so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .images
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.images.lock().map(|m| m.is_empty()).unwrap_or(true)
    }
}

impl ImageSink for MemorySink {
    fn write(&self, name: &str, data: &[u8]) -> ComputeResult<()> {
        let mut images = self.images.lock().map_err(|_| {
            ComputeError::io(format!("write {name}"), std::io::Error::other("sink lock poisoned"))
        })?;
        images.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
