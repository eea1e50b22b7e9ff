//! Single-slot forecast cache
//!
//! Combines the preference store and the payload slot into one cache entry.
//! Only the most recent fetch is remembered: every commit supersedes the
//! previous entry regardless of where it was fetched.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{
    FilePayloadSlot, FilePreferences, PayloadSlot, Preferences, PreferencesEditor, StoreError,
};
use crate::data::Coordinates;

/// File name of the cached payload
const PAYLOAD_FILE: &str = "forecast.json";

/// File name of the preference store
const PREFERENCES_FILE: &str = "preferences.json";

/// Capacity of the cache event channel
const EVENT_CAPACITY: usize = 16;

/// Preference keys for the cache metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    pub fetch_time: String,
    pub fetch_latitude: String,
    pub fetch_longitude: String,
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self {
            fetch_time: "lastFetchTime".to_string(),
            fetch_latitude: "lastFetchLatitude".to_string(),
            fetch_longitude: "lastFetchLongitude".to_string(),
        }
    }
}

/// The remembered fetch
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Raw response body, never parsed here
    pub payload: String,
    /// When the payload was fetched, millisecond precision
    pub fetched_at: DateTime<Utc>,
    pub latitude: f32,
    pub longitude: f32,
}

impl CacheEntry {
    /// Creates an entry for `location`, reducing the coordinates to the cache key precision
    pub fn new(payload: String, fetched_at: DateTime<Utc>, location: &Coordinates) -> Self {
        let (latitude, longitude) = location.reduced();
        Self {
            payload,
            fetched_at,
            latitude,
            longitude,
        }
    }

    /// Whether this entry may answer a request for `location` at `now`
    pub fn is_valid_for(&self, location: &Coordinates, ttl: Duration, now: DateTime<Utc>) -> bool {
        CacheMetadata {
            fetched_at: self.fetched_at,
            latitude: self.latitude,
            longitude: self.longitude,
        }
        .matches(location, ttl, now)
    }
}

/// Notifications published by the store
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A new entry replaced the slot
    Stored {
        fetched_at: DateTime<Utc>,
        latitude: f32,
        longitude: f32,
    },
}

/// Metadata as read back from the preference store
struct CacheMetadata {
    fetched_at: DateTime<Utc>,
    latitude: f32,
    longitude: f32,
}

impl CacheMetadata {
    fn matches(&self, location: &Coordinates, ttl: Duration, now: DateTime<Utc>) -> bool {
        let (latitude, longitude) = location.reduced();
        now - self.fetched_at <= ttl && self.latitude == latitude && self.longitude == longitude
    }
}

/// The single-slot cache
///
/// Callers that need read-modify-write consistency across threads must
/// serialize access themselves; the fetch gate does this with one lock per store.
pub struct CacheStore {
    prefs: Arc<dyn Preferences>,
    slot: Arc<dyn PayloadSlot>,
    keys: CacheKeys,
    events: broadcast::Sender<CacheEvent>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates a store over injected persistence collaborators
    pub fn new(prefs: Arc<dyn Preferences>, slot: Arc<dyn PayloadSlot>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            prefs,
            slot,
            keys: CacheKeys::default(),
            events,
        }
    }

    /// Overrides the preference keys
    pub fn with_keys(mut self, keys: CacheKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Creates a file-backed store inside `dir`
    ///
    /// Useful for testing or when a specific cache location is needed.
    pub fn with_dir(dir: &Path) -> Result<Self, StoreError> {
        let prefs = FilePreferences::open(dir.join(PREFERENCES_FILE))?;
        let slot = FilePayloadSlot::new(dir.join(PAYLOAD_FILE));
        Ok(Self::new(Arc::new(prefs), Arc::new(slot)))
    }

    /// Creates a file-backed store in the platform directories for `app`
    ///
    /// The payload lives in the cache directory (`~/.cache/<app>/` on Linux),
    /// the metadata in the config directory.
    pub fn open_default(app: &str) -> Result<Self, StoreError> {
        let dirs = ProjectDirs::from("", "", app).ok_or(StoreError::NoCacheDir)?;
        let prefs = FilePreferences::open(dirs.config_dir().join(PREFERENCES_FILE))?;
        let slot = FilePayloadSlot::new(dirs.cache_dir().join(PAYLOAD_FILE));
        Ok(Self::new(Arc::new(prefs), Arc::new(slot)))
    }

    /// Receives an event after every successful commit
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn metadata(&self) -> Option<CacheMetadata> {
        let millis = self.prefs.get_i64(&self.keys.fetch_time)?;
        Some(CacheMetadata {
            fetched_at: DateTime::<Utc>::from_timestamp_millis(millis)?,
            latitude: self.prefs.get_f32(&self.keys.fetch_latitude)?,
            longitude: self.prefs.get_f32(&self.keys.fetch_longitude)?,
        })
    }

    /// Reads the whole entry, valid or not
    pub fn load(&self) -> Result<Option<CacheEntry>, StoreError> {
        let Some(meta) = self.metadata() else {
            return Ok(None);
        };
        Ok(self.slot.read()?.map(|payload| CacheEntry {
            payload,
            fetched_at: meta.fetched_at,
            latitude: meta.latitude,
            longitude: meta.longitude,
        }))
    }

    /// Returns the cached payload if it is fresh and belongs to `location`
    ///
    /// The payload file is only read once the metadata has passed the check.
    pub fn lookup(
        &self,
        location: &Coordinates,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let Some(meta) = self.metadata() else {
            tracing::debug!("forecast cache empty");
            return Ok(None);
        };

        if !meta.matches(location, ttl, now) {
            tracing::debug!(
                age_secs = (now - meta.fetched_at).num_seconds(),
                cached_lat = meta.latitude,
                cached_lon = meta.longitude,
                "forecast cache not usable"
            );
            return Ok(None);
        }

        self.slot.read()
    }

    /// Overwrites the slot with `entry`
    ///
    /// The metadata is invalidated before the payload is replaced and restored
    /// only afterwards, so a failure part-way leaves an empty slot rather than a
    /// payload paired with someone else's coordinates.
    pub fn commit(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        PreferencesEditor::new(self.prefs.as_ref())
            .remove(&self.keys.fetch_time)
            .apply()?;

        self.slot.write(&entry.payload)?;

        PreferencesEditor::new(self.prefs.as_ref())
            .put_i64(&self.keys.fetch_time, entry.fetched_at.timestamp_millis())
            .put_f32(&self.keys.fetch_latitude, entry.latitude)
            .put_f32(&self.keys.fetch_longitude, entry.longitude)
            .apply()?;

        tracing::info!(
            lat = entry.latitude,
            lon = entry.longitude,
            bytes = entry.payload.len(),
            "forecast cache written"
        );

        // No subscribers is fine
        let _ = self.events.send(CacheEvent::Stored {
            fetched_at: entry.fetched_at,
            latitude: entry.latitude,
            longitude: entry.longitude,
        });
        Ok(())
    }
}
