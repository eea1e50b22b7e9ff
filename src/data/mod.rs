//! Core data models for location-keyed weather lookups
//!
//! This module contains the types shared by the fetch gate, the cache and the
//! response decoder: coordinates, request kinds and decoded weather records.

pub mod weather;

pub use weather::{decode, DecodeError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider tag stamped on every decoded record
pub const PROVIDER: &str = "fio";

/// A geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns the single-precision key used to match cached payloads
    ///
    /// Positions that only differ beyond `f32` resolution collapse onto the
    /// same key, which roughly matches GPS jitter.
    pub fn reduced(&self) -> (f32, f32) {
        (self.latitude as f32, self.longitude as f32)
    }
}

/// Which section of the forecast a caller wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Current conditions only
    Current,
    /// Hour-by-hour periods
    Hourly,
    /// Day-by-day periods
    Daily,
}

/// All sections the provider can return
const ALL_SECTIONS: [&str; 6] = ["currently", "minutely", "hourly", "daily", "alerts", "flags"];

impl RequestKind {
    /// Sections the provider should leave out of the response
    ///
    /// Hourly and daily requests share one query; only the decoded section differs.
    pub fn excluded_sections(&self) -> String {
        let wanted: &[&str] = match self {
            RequestKind::Current => &["currently"],
            RequestKind::Hourly | RequestKind::Daily => &["hourly", "daily"],
        };
        ALL_SECTIONS
            .iter()
            .filter(|section| !wanted.contains(*section))
            .copied()
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether the query asks for the extended hourly range
    ///
    /// Daily requests set this too; the provider has always been queried this way.
    pub fn extends_hourly(&self) -> bool {
        !matches!(self, RequestKind::Current)
    }
}

/// A single weather lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastRequest {
    /// Where the weather is wanted
    pub location: Coordinates,
    /// Which section to decode
    pub kind: RequestKind,
    /// Whether the single cache slot may answer and be refreshed
    pub use_cache: bool,
}

impl ForecastRequest {
    pub fn new(location: Coordinates, kind: RequestKind) -> Self {
        Self {
            location,
            kind,
            use_cache: true,
        }
    }

    /// Bypasses the cache for both lookup and storage
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Station identity; unknown for gridded forecast providers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: Option<i64>,
    pub kind: Option<i64>,
    pub name: Option<String>,
}

/// Icon classifier reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherIcon {
    ClearDay,
    ClearNight,
    Rain,
    Snow,
    Sleet,
    Wind,
    Fog,
    Cloudy,
    PartlyCloudyDay,
    PartlyCloudyNight,
    /// Any tag this crate does not know about
    Other,
}

impl WeatherIcon {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "clear-day" => WeatherIcon::ClearDay,
            "clear-night" => WeatherIcon::ClearNight,
            "rain" => WeatherIcon::Rain,
            "snow" => WeatherIcon::Snow,
            "sleet" => WeatherIcon::Sleet,
            "wind" => WeatherIcon::Wind,
            "fog" => WeatherIcon::Fog,
            "cloudy" => WeatherIcon::Cloudy,
            "partly-cloudy-day" => WeatherIcon::PartlyCloudyDay,
            "partly-cloudy-night" => WeatherIcon::PartlyCloudyNight,
            _ => WeatherIcon::Other,
        }
    }
}

/// Weather observed or forecast for one instant or period
///
/// Every measurement is independently optional. `None` means the provider did
/// not report the value; it is never substituted with zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Instant the observation or forecast period refers to
    pub observed_at: DateTime<Utc>,
    /// Provider tag
    pub provider: String,
    /// Station identity
    pub station: StationInfo,
    /// Where the provider located the forecast
    pub station_location: Coordinates,
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Daily minimum temperature in Celsius
    pub temperature_min: Option<f64>,
    /// Daily maximum temperature in Celsius
    pub temperature_max: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Sea-level pressure in hPa
    pub pressure: Option<f64>,
    /// Wind speed in m/s
    pub wind_speed: Option<f64>,
    /// Wind gust speed in m/s
    pub wind_gust: Option<f64>,
    /// Wind bearing in degrees
    pub wind_direction: Option<f64>,
    /// Visibility in meters
    pub visibility: Option<f64>,
    /// Precipitation intensity in mm/h
    pub precipitation_rate: Option<f64>,
    /// Accumulated precipitation in mm
    pub precipitation_accumulation: Option<f64>,
    /// Precipitation probability in percent
    pub precipitation_probability: Option<f64>,
    /// Cloud cover in percent
    pub cloud_cover: Option<f64>,
    /// Ozone column in Dobson units
    pub ozone: Option<f64>,
    /// Raw icon tag
    pub icon: Option<String>,
    /// Short human readable summary
    pub summary: Option<String>,
    /// The serialized source object this record was built from
    pub raw_source: String,
}

impl WeatherRecord {
    /// Observation time as milliseconds since the Unix epoch
    pub fn epoch_millis(&self) -> i64 {
        self.observed_at.timestamp_millis()
    }

    /// Parsed icon classifier, if an icon was reported
    pub fn icon_kind(&self) -> Option<WeatherIcon> {
        self.icon.as_deref().map(WeatherIcon::from_tag)
    }
}
