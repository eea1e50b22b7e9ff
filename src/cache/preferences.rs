//! Key/value preference store
//!
//! A small typed store in the spirit of a platform preference file. Edits are
//! collected by a [`PreferencesEditor`] and applied as one batch, so a reader
//! never observes half of an edit.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::{write_atomic, StoreError};

/// A typed preference value
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    Long(i64),
    Float(f32),
    Text(String),
}

impl From<PreferenceValue> for Value {
    fn from(value: PreferenceValue) -> Self {
        match value {
            PreferenceValue::Long(v) => Value::from(v),
            PreferenceValue::Float(v) => Value::from(f64::from(v)),
            PreferenceValue::Text(v) => Value::from(v),
        }
    }
}

/// A single pending change
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceEdit {
    Put(String, PreferenceValue),
    Remove(String),
}

/// Typed key/value persistence
pub trait Preferences: Send + Sync {
    fn get_i64(&self, key: &str) -> Option<i64>;

    fn get_f32(&self, key: &str) -> Option<f32>;

    fn get_string(&self, key: &str) -> Option<String>;

    /// Persists every edit or none of them
    fn apply(&self, edits: Vec<PreferenceEdit>) -> Result<(), StoreError>;
}

/// Collects edits and applies them in one batch
pub struct PreferencesEditor<'a> {
    prefs: &'a dyn Preferences,
    edits: Vec<PreferenceEdit>,
}

impl<'a> PreferencesEditor<'a> {
    pub fn new(prefs: &'a dyn Preferences) -> Self {
        Self {
            prefs,
            edits: Vec::new(),
        }
    }

    pub fn put_i64(mut self, key: &str, value: i64) -> Self {
        self.edits
            .push(PreferenceEdit::Put(key.to_string(), PreferenceValue::Long(value)));
        self
    }

    pub fn put_f32(mut self, key: &str, value: f32) -> Self {
        self.edits
            .push(PreferenceEdit::Put(key.to_string(), PreferenceValue::Float(value)));
        self
    }

    pub fn put_string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.edits.push(PreferenceEdit::Put(
            key.to_string(),
            PreferenceValue::Text(value.into()),
        ));
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.edits.push(PreferenceEdit::Remove(key.to_string()));
        self
    }

    pub fn apply(self) -> Result<(), StoreError> {
        self.prefs.apply(self.edits)
    }
}

/// Preferences persisted as a single JSON object on disk
///
/// Values are mirrored in memory; every batch rewrites the whole file through
/// a temporary file and a rename.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FilePreferences {
    /// Opens the store at `path`, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<Map<String, Value>>(&content).map_err(
                |source| StoreError::Corrupt {
                    path: path.clone(),
                    source,
                },
            )?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Preferences for FilePreferences {
    fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).and_then(Value::as_i64)
    }

    fn get_f32(&self, key: &str) -> Option<f32> {
        self.values
            .lock()
            .get(key)
            .and_then(Value::as_f64)
            .map(|v| v as f32)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn apply(&self, edits: Vec<PreferenceEdit>) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let mut updated = values.clone();

        for edit in edits {
            match edit {
                PreferenceEdit::Put(key, value) => {
                    updated.insert(key, value.into());
                }
                PreferenceEdit::Remove(key) => {
                    updated.remove(&key);
                }
            }
        }

        let json = serde_json::to_vec_pretty(&updated)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.path, &json)?;

        *values = updated;
        Ok(())
    }
}
