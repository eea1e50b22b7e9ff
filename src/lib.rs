//! Trailcast
//!
//! Weather lookups for tracked positions, guarded by a single-slot disk cache
//! keyed on the last fetched coordinates and a time-to-live.
//!
//! ```no_run
//! use trailcast::{CacheStore, Coordinates, FetchGate, ForecastConfig, ForecastRequest, RequestKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CacheStore::open_default("trailcast")?;
//! let gate = FetchGate::new(ForecastConfig::new("api-key"), store)?;
//! let request = ForecastRequest::new(Coordinates::new(52.37, 4.89), RequestKind::Hourly);
//! for record in gate.resolve(&request).await? {
//!     println!("{} {:?}", record.observed_at, record.temperature);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod data;
pub mod fetch;
pub mod refresh;

pub use cache::{CacheEntry, CacheEvent, CacheStore, StoreError};
pub use config::{ConfigError, ForecastConfig, ForecastSettings};
pub use data::{
    decode, Coordinates, DecodeError, ForecastRequest, RequestKind, WeatherIcon, WeatherRecord,
};
pub use fetch::{Clock, FetchGate, ForecastError, SystemClock};
pub use refresh::{RefreshConfig, RefreshHandle, RefreshMessage};
