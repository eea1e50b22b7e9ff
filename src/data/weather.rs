//! Forecast response decoder
//!
//! Turns the provider's JSON body into [`WeatherRecord`]s. Decoding is pure: it
//! never touches the cache or the network, so the same function serves both
//! fresh and cached payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use super::{Coordinates, RequestKind, StationInfo, WeatherRecord, PROVIDER};

/// Errors that can occur when decoding a forecast payload
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not JSON or its top level has the wrong shape
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A period inside a section is not an object
    #[error("Invalid period {section}.data[{index}]: {source}")]
    InvalidPeriod {
        section: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Provider response; sections not asked for are left out by the query
#[derive(Debug, Deserialize)]
struct DarkSkyResponse {
    #[serde(default, deserialize_with = "coordinate")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "coordinate")]
    longitude: Option<f64>,
    #[serde(default)]
    currently: Option<Value>,
    #[serde(default)]
    hourly: Option<DarkSkySection>,
    #[serde(default)]
    daily: Option<DarkSkySection>,
}

/// Hourly or daily block
#[derive(Debug, Deserialize)]
struct DarkSkySection {
    #[serde(default)]
    data: Option<Vec<Value>>,
}

/// One data point; every field is optional and unreadable values read as missing
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DarkSkyPeriod {
    #[serde(default, deserialize_with = "epoch_seconds")]
    time: Option<i64>,
    #[serde(default, deserialize_with = "number")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    temperature_min: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    temperature_max: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    humidity: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pressure: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    wind_speed: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    wind_gust: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    wind_bearing: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    visibility: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    precip_intensity: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    precip_accumulation: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    precip_probability: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    cloud_cover: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    ozone: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    icon: Option<String>,
    #[serde(default, deserialize_with = "text")]
    summary: Option<String>,
}

impl DarkSkyPeriod {
    /// Maps provider units onto record units
    fn into_record(
        self,
        observed_at: DateTime<Utc>,
        station_location: Coordinates,
        raw_source: String,
    ) -> WeatherRecord {
        let percent = |fraction: Option<f64>| fraction.map(|v| v * 100.0);

        WeatherRecord {
            observed_at,
            provider: PROVIDER.to_string(),
            station: StationInfo::default(),
            station_location,
            temperature: self.temperature,
            temperature_min: self.temperature_min,
            temperature_max: self.temperature_max,
            humidity: percent(self.humidity),
            pressure: self.pressure,
            wind_speed: self.wind_speed,
            wind_gust: self.wind_gust,
            wind_direction: self.wind_bearing,
            // km -> m
            visibility: self.visibility.map(|v| v * 1000.0),
            precipitation_rate: self.precip_intensity,
            // cm -> mm
            precipitation_accumulation: self.precip_accumulation.map(|v| v * 10.0),
            precipitation_probability: percent(self.precip_probability),
            cloud_cover: percent(self.cloud_cover),
            ozone: self.ozone,
            icon: self.icon,
            summary: self.summary,
            raw_source,
        }
    }
}

/// Decodes a provider payload into records for the requested section
///
/// # Arguments
/// * `kind` - Which section to read back
/// * `payload` - Raw response body
///
/// # Returns
/// * `Ok(Vec<WeatherRecord>)` - Records in source order; empty when the payload
///   carries no top-level coordinates
/// * `Err(DecodeError)` - If the payload is not JSON or is structurally invalid
pub fn decode(kind: RequestKind, payload: &str) -> Result<Vec<WeatherRecord>, DecodeError> {
    let root: Value = serde_json::from_str(payload)?;
    let response = DarkSkyResponse::deserialize(object(&root, "response")?)?;

    let (Some(latitude), Some(longitude)) = (response.latitude, response.longitude) else {
        return Ok(Vec::new());
    };
    let station_location = Coordinates::new(latitude, longitude);

    let records: Vec<WeatherRecord> = match kind {
        RequestKind::Current => match response.currently {
            Some(current) => {
                let period = DarkSkyPeriod::deserialize(object(&current, "period")?)?;
                to_record(period, &current, station_location)
                    .into_iter()
                    .collect()
            }
            None => Vec::new(),
        },
        RequestKind::Hourly => decode_section("hourly", response.hourly, station_location)?,
        RequestKind::Daily => decode_section("daily", response.daily, station_location)?,
    };

    tracing::debug!(?kind, count = records.len(), "decoded forecast payload");
    Ok(records)
}

/// Decodes the periods of an hourly or daily block in source order
fn decode_section(
    section: &'static str,
    block: Option<DarkSkySection>,
    station_location: Coordinates,
) -> Result<Vec<WeatherRecord>, DecodeError> {
    let periods = block.and_then(|block| block.data).unwrap_or_default();

    let mut records = Vec::with_capacity(periods.len());
    for (index, value) in periods.iter().enumerate() {
        let period = object(value, "period")
            .and_then(DarkSkyPeriod::deserialize)
            .map_err(|source| DecodeError::InvalidPeriod {
                section,
                index,
                source,
            })?;
        records.extend(to_record(period, value, station_location));
    }
    Ok(records)
}

/// Builds a record, or `None` if the period has no usable time
fn to_record(
    period: DarkSkyPeriod,
    source: &Value,
    station_location: Coordinates,
) -> Option<WeatherRecord> {
    let Some(observed_at) = period
        .time
        .and_then(|seconds| seconds.checked_mul(1000))
        .and_then(DateTime::<Utc>::from_timestamp_millis)
    else {
        tracing::debug!(time = ?period.time, "skipping period without a usable time");
        return None;
    };

    Some(period.into_record(observed_at, station_location, source.to_string()))
}

/// Rejects non-objects, which derived structs would otherwise read positionally
fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Value, serde_json::Error> {
    use serde::de::Error;

    if value.is_object() {
        Ok(value)
    } else {
        Err(serde_json::Error::custom(format!("expected a {} object, got {}", what, value)))
    }
}

/// Reads a number, accepting numeric strings
fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(as_number(&Value::deserialize(deserializer)?))
}

fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

/// Reads whole seconds; fractional values are truncated
fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(seconds) = value.as_i64() {
        return Ok(Some(seconds));
    }
    Ok(as_number(&value)
        .map(f64::trunc)
        .filter(|seconds| seconds.abs() < i64::MAX as f64)
        .map(|seconds| seconds as i64))
}

/// Top-level coordinate; present values must be readable as a number
fn coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => as_number(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid coordinate {}", value))),
    }
}
