//! Named file slot holding the raw cached payload

use std::fs;
use std::path::{Path, PathBuf};

use super::{write_atomic, StoreError};

/// A single named slot for an opaque payload
pub trait PayloadSlot: Send + Sync {
    /// Returns `None` if nothing has been written yet
    fn read(&self) -> Result<Option<String>, StoreError>;

    /// Replaces the slot contents; readers see the old or the new payload, never a mix
    fn write(&self, payload: &str) -> Result<(), StoreError>;
}

/// Payload slot backed by one file
#[derive(Debug, Clone)]
pub struct FilePayloadSlot {
    path: PathBuf,
}

impl FilePayloadSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PayloadSlot for FilePayloadSlot {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, payload: &str) -> Result<(), StoreError> {
        write_atomic(&self.path, payload.as_bytes())?;
        Ok(())
    }
}
