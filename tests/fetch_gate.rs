//! Integration tests for the fetch gate
//!
//! A wiremock server stands in for the forecast provider; a manual clock drives
//! cache freshness.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tempfile::TempDir;
use trailcast::{
    CacheEvent, CacheStore, Clock, Coordinates, FetchGate, ForecastConfig, ForecastError,
    ForecastRequest, RequestKind,
};
use wiremock::matchers::{header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key";

#[derive(Debug)]
struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
}

fn ttl() -> Duration {
    Duration::minutes(30)
}

fn amsterdam() -> Coordinates {
    Coordinates::new(52.370216, 4.895168)
}

fn paris() -> Coordinates {
    Coordinates::new(48.8566, 2.3522)
}

fn forecast_path(location: &Coordinates) -> String {
    format!(
        "/forecast/{}/{},{}",
        API_KEY, location.latitude, location.longitude
    )
}

/// Helper to create a provider response for a location
fn forecast_body(location: &Coordinates, temperature: f64) -> serde_json::Value {
    serde_json::json!({
        "latitude": location.latitude,
        "longitude": location.longitude,
        "timezone": "Europe/Amsterdam",
        "currently": {
            "time": 1_777_636_800,
            "temperature": temperature,
            "humidity": 0.42
        },
        "hourly": {
            "data": [
                { "time": 1_777_636_800, "temperature": temperature },
                { "time": 1_777_640_400, "temperature": temperature - 1.0 },
                { "summary": "no time" }
            ]
        },
        "daily": {
            "data": [
                { "time": 1_777_593_600, "temperatureMin": 4.0, "temperatureMax": 14.0 }
            ]
        }
    })
}

struct Harness {
    server: MockServer,
    gate: FetchGate,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

async fn harness() -> Harness {
    harness_with_client(None).await
}

async fn harness_with_client(client: Option<reqwest::Client>) -> Harness {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = CacheStore::with_dir(dir.path()).expect("Should open store");
    let config = ForecastConfig::new(API_KEY)
        .with_base_url(format!("{}/forecast", server.uri()))
        .with_language("en")
        .with_cache_ttl(ttl());
    let clock = ManualClock::new(t0());
    let mut gate = FetchGate::new(config, store)
        .expect("Should build gate")
        .with_clock(clock.clone());
    if let Some(client) = client {
        gate = gate.with_client(client);
    }

    Harness {
        server,
        gate,
        clock,
        _dir: dir,
    }
}

async fn mount_forecast(server: &MockServer, location: &Coordinates, temperature: f64) {
    Mock::given(method("GET"))
        .and(path(forecast_path(location)))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(location, temperature)))
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .map(|requests| requests.len())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_miss_fetches_then_hit_serves_cache() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&amsterdam())))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&amsterdam(), 12.5)))
        .expect(1)
        .mount(&h.server)
        .await;
    let request = ForecastRequest::new(amsterdam(), RequestKind::Current);

    let first = h.gate.resolve(&request).await.expect("Fetch should succeed");
    let second = h.gate.resolve(&request).await.expect("Cache should answer");

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(first[0].temperature, Some(12.5));
    assert_eq!(first[0].epoch_millis(), 1_777_636_800_000);

    let entry = h.gate.store().load().expect("Load should succeed").expect("Entry stored");
    assert_eq!(entry.fetched_at, t0());
    assert_eq!((entry.latitude, entry.longitude), amsterdam().reduced());
}

#[tokio::test]
async fn test_ttl_boundary() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    let request = ForecastRequest::new(amsterdam(), RequestKind::Current);

    h.gate.resolve(&request).await.expect("Fetch should succeed");
    assert_eq!(request_count(&h.server).await, 1);

    h.clock.set(t0() + ttl() - Duration::milliseconds(1));
    h.gate.resolve(&request).await.expect("Cache should answer");
    assert_eq!(request_count(&h.server).await, 1, "Fresh cache must not fetch");

    h.clock.set(t0() + ttl() + Duration::milliseconds(1));
    h.gate.resolve(&request).await.expect("Fetch should succeed");
    assert_eq!(request_count(&h.server).await, 2, "Stale cache must fetch");

    let entry = h.gate.store().load().expect("Load should succeed").expect("Entry stored");
    assert_eq!(entry.fetched_at, t0() + ttl() + Duration::milliseconds(1));
}

#[tokio::test]
async fn test_jitter_below_f32_resolution_hits_cache() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");

    let jittered = Coordinates::new(amsterdam().latitude + 1e-9, amsterdam().longitude - 1e-9);
    let records = h
        .gate
        .resolve(&ForecastRequest::new(jittered, RequestKind::Current))
        .await
        .expect("Cache should answer");

    assert_eq!(records.len(), 1);
    assert_eq!(request_count(&h.server).await, 1);
}

#[tokio::test]
async fn test_new_location_supersedes_slot() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    mount_forecast(&h.server, &paris(), 20.0).await;

    for location in [amsterdam(), paris(), amsterdam()] {
        h.gate
            .resolve(&ForecastRequest::new(location, RequestKind::Current))
            .await
            .expect("Fetch should succeed");
    }

    // One slot only: returning to the first location fetches again
    assert_eq!(request_count(&h.server).await, 3);
}

#[tokio::test]
async fn test_without_cache_always_fetches_and_never_stores() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    let request = ForecastRequest::new(amsterdam(), RequestKind::Current).without_cache();

    h.gate.resolve(&request).await.expect("Fetch should succeed");
    h.gate.resolve(&request).await.expect("Fetch should succeed");

    assert_eq!(request_count(&h.server).await, 2);
    assert!(h.gate.store().load().expect("Load should succeed").is_none());
}

#[tokio::test]
async fn test_query_parameters_per_kind() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/forecast/test-key/"))
        .and(query_param("units", "si"))
        .and(query_param("lang", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(&amsterdam(), 1.0)))
        .mount(&h.server)
        .await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current).without_cache())
        .await
        .expect("Fetch should succeed");
    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Daily).without_cache())
        .await
        .expect("Fetch should succeed");

    let requests = h.server.received_requests().await.expect("Recording enabled");
    let current_query = requests[0].url.query().unwrap_or_default().to_string();
    let daily_query = requests[1].url.query().unwrap_or_default().to_string();

    assert!(current_query.contains("exclude=minutely,hourly,daily,alerts,flags"));
    assert!(!current_query.contains("extend"));
    assert!(daily_query.contains("exclude=currently,minutely,alerts,flags"));
    assert!(daily_query.contains("extend=hourly"));
}

#[tokio::test]
async fn test_sections_stay_exclusive() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;

    let current = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current).without_cache())
        .await
        .expect("Fetch should succeed");
    let hourly = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Hourly).without_cache())
        .await
        .expect("Fetch should succeed");
    let daily = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Daily).without_cache())
        .await
        .expect("Fetch should succeed");

    assert_eq!(current.len(), 1);
    assert_eq!(hourly.len(), 2, "The period without time is dropped");
    assert_eq!(daily.len(), 1);
    assert!(current[0].temperature_max.is_none());
    assert_eq!(daily[0].temperature_max, Some(14.0));
}

#[tokio::test]
async fn test_hourly_payload_answers_daily_from_cache() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Hourly))
        .await
        .expect("Fetch should succeed");
    let daily = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Daily))
        .await
        .expect("Cache should answer");

    assert_eq!(request_count(&h.server).await, 1);
    assert_eq!(daily.len(), 1);
}

#[tokio::test]
async fn test_http_error_leaves_cache_intact() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&paris())))
        .respond_with(ResponseTemplate::new(403))
        .mount(&h.server)
        .await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");
    let before = h.gate.store().load().expect("Load should succeed");

    let result = h
        .gate
        .resolve(&ForecastRequest::new(paris(), RequestKind::Current))
        .await;

    assert!(matches!(result, Err(ForecastError::Status(status)) if status.as_u16() == 403));
    assert_eq!(h.gate.store().load().expect("Load should succeed"), before);
}

#[tokio::test]
async fn test_only_200_is_accepted() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&paris())))
        .respond_with(ResponseTemplate::new(203).set_body_json(forecast_body(&paris(), 18.0)))
        .mount(&h.server)
        .await;

    let result = h
        .gate
        .resolve(&ForecastRequest::new(paris(), RequestKind::Current))
        .await;

    assert!(matches!(result, Err(ForecastError::Status(status)) if status.as_u16() == 203));
    assert!(h.gate.store().load().expect("Load should succeed").is_none());
}

#[tokio::test]
async fn test_malformed_payload_is_not_cached() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&paris())))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .mount(&h.server)
        .await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");
    let before = h.gate.store().load().expect("Load should succeed");

    let result = h
        .gate
        .resolve(&ForecastRequest::new(paris(), RequestKind::Current))
        .await;

    assert!(matches!(result, Err(ForecastError::Decode(_))));
    assert_eq!(h.gate.store().load().expect("Load should succeed"), before);
}

#[tokio::test]
async fn test_payload_without_coordinates_is_empty_not_error() {
    let h = harness().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "currently": { "time": 1_777_636_800 }
        })))
        .mount(&h.server)
        .await;

    let records = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Should not fail");

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_timeout_is_reported_and_cache_kept() {
    let client = reqwest::Client::builder()
        .timeout(StdDuration::from_millis(200))
        .build()
        .expect("Should build client");
    let h = harness_with_client(Some(client)).await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&paris())))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_body(&paris(), 20.0))
                .set_delay(StdDuration::from_secs(2)),
        )
        .mount(&h.server)
        .await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");
    let before = h.gate.store().load().expect("Load should succeed");

    let result = h
        .gate
        .resolve(&ForecastRequest::new(paris(), RequestKind::Current))
        .await;

    assert!(matches!(result, Err(ForecastError::Timeout(_))));
    assert_eq!(h.gate.store().load().expect("Load should succeed"), before);
}

#[tokio::test]
async fn test_cancelled_fetch_leaves_cache_intact() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&paris())))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_body(&paris(), 20.0))
                .set_delay(StdDuration::from_secs(2)),
        )
        .mount(&h.server)
        .await;

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");
    let before = h.gate.store().load().expect("Load should succeed");

    let request = ForecastRequest::new(paris(), RequestKind::Current);
    let cancelled =
        tokio::time::timeout(StdDuration::from_millis(200), h.gate.resolve(&request)).await;

    assert!(cancelled.is_err(), "Resolve should have been abandoned");
    assert_eq!(h.gate.store().load().expect("Load should succeed"), before);

    // The slot lock was released with the dropped future
    let records = h
        .gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Cache should answer");
    assert_eq!(records[0].temperature, Some(10.0));
}

#[tokio::test]
async fn test_concurrent_same_location_fetches_once() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path(forecast_path(&amsterdam())))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_body(&amsterdam(), 10.0))
                .set_delay(StdDuration::from_millis(100)),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    let request = ForecastRequest::new(amsterdam(), RequestKind::Current);

    let (a, b) = futures::future::join(h.gate.resolve(&request), h.gate.resolve(&request)).await;

    assert_eq!(a.expect("First should succeed"), b.expect("Second should succeed"));
}

#[tokio::test]
async fn test_concurrent_resolves_never_tear_the_slot() {
    let h = harness().await;
    for (i, location) in [amsterdam(), paris()].iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(forecast_path(location)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(forecast_body(location, i as f64))
                    .set_delay(StdDuration::from_millis(20 * (i as u64 + 1))),
            )
            .mount(&h.server)
            .await;
    }

    let requests: Vec<_> = (0..8)
        .map(|i| {
            let location = if i % 2 == 0 { amsterdam() } else { paris() };
            ForecastRequest::new(location, RequestKind::Current)
        })
        .collect();
    let results = futures::future::join_all(requests.iter().map(|r| h.gate.resolve(r))).await;

    for result in results {
        result.expect("Resolve should succeed");
    }

    let entry = h.gate.store().load().expect("Load should succeed").expect("Entry stored");
    let payload: serde_json::Value = serde_json::from_str(&entry.payload).expect("Payload is JSON");
    let payload_lat = payload["latitude"].as_f64().expect("Latitude present") as f32;
    let payload_lon = payload["longitude"].as_f64().expect("Longitude present") as f32;
    assert_eq!((payload_lat, payload_lon), (entry.latitude, entry.longitude));
}

#[tokio::test]
async fn test_commit_is_announced() {
    let h = harness().await;
    mount_forecast(&h.server, &amsterdam(), 10.0).await;
    let mut events = h.gate.store().subscribe();

    h.gate
        .resolve(&ForecastRequest::new(amsterdam(), RequestKind::Current))
        .await
        .expect("Fetch should succeed");

    let (latitude, longitude) = amsterdam().reduced();
    assert_eq!(
        events.try_recv().expect("Event should be queued"),
        CacheEvent::Stored {
            fetched_at: t0(),
            latitude,
            longitude,
        }
    );
}
