//! Cache module for the single forecast slot
//!
//! The slot is split across two persistence surfaces: a key/value preference
//! store holding the fetch time and the coordinates the payload belongs to,
//! and a named file holding the raw response body. [`CacheStore`] combines them
//! and guarantees that a payload is only ever served together with its own
//! metadata.

mod preferences;
mod slot;
mod store;

pub use preferences::{
    FilePreferences, PreferenceEdit, PreferenceValue, Preferences, PreferencesEditor,
};
pub use slot::{FilePayloadSlot, PayloadSlot};
pub use store::{CacheEntry, CacheEvent, CacheKeys, CacheStore};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the local persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a cache file failed
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The preference file exists but is not a JSON object
    #[error("Corrupt preference file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No platform cache directory could be determined
    #[error("No cache directory available")]
    NoCacheDir,
}

/// Replaces `path` with `contents` so readers see either the old or the new file
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = fs::write(&tmp_path, contents).and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(())
}
