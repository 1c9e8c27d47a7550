/// Weather proxy
///
/// Fetches current conditions and an hourly forecast from Open-Meteo and
/// caches the snapshot for a fixed TTL so dashboard polling never reaches
/// the upstream API more than once per window.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DashboardError, Result};

const FORECAST_API: &str = "https://api.open-meteo.com/v1/forecast";
const GEOCODING_API: &str = "https://geocoding-api.open-meteo.com/v1/search";
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);
const HIGH_LOW_HOURS: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastHour {
    pub time_label: String,
    pub temperature: f64,
    pub weather_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location_name: String,
    pub temperature: f64,
    pub weather_code: i32,
    pub high: f64,
    pub low: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub forecast: Vec<ForecastHour>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Upstream weather data source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Resolve a place name to (latitude, longitude); `None` when unknown
    async fn geocode(&self, name: &str) -> Result<Option<(f64, f64)>>;

    async fn fetch(&self, location: &Location, forecast_hours: usize) -> Result<WeatherSnapshot>;
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: f64,
    relative_humidity_2m: f64,
    weather_code: i32,
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
    weather_code: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    latitude: f64,
    longitude: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn parse_local_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").map_err(|e| {
        DashboardError::UpstreamUnavailable(format!("malformed time '{}' in forecast: {}", value, e))
    })
}

/// "15:00" → "3PM", "09:00" → "9AM"
pub fn hour_label(time: &NaiveDateTime) -> String {
    let label = time.format("%I%p").to_string();
    label.trim_start_matches('0').to_string()
}

/// Turn an Open-Meteo forecast body into a snapshot
fn build_snapshot(
    location_name: &str,
    body: ForecastResponse,
    forecast_hours: usize,
) -> Result<WeatherSnapshot> {
    let hourly = body.hourly;
    if hourly.time.len() != hourly.temperature_2m.len() || hourly.time.len() != hourly.weather_code.len() {
        return Err(DashboardError::UpstreamUnavailable(
            "hourly forecast arrays have mismatched lengths".to_string(),
        ));
    }
    if hourly.temperature_2m.is_empty() {
        return Err(DashboardError::UpstreamUnavailable(
            "forecast contains no hourly data".to_string(),
        ));
    }

    let now = parse_local_time(&body.current.time)?;
    let current_hour = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(now);

    let mut forecast = Vec::with_capacity(forecast_hours);
    for ((time, temperature), code) in hourly
        .time
        .iter()
        .zip(&hourly.temperature_2m)
        .zip(&hourly.weather_code)
    {
        if forecast.len() >= forecast_hours {
            break;
        }
        let at = parse_local_time(time)?;
        if at >= current_hour {
            forecast.push(ForecastHour {
                time_label: hour_label(&at),
                temperature: round1(*temperature),
                weather_code: *code,
            });
        }
    }

    let day = &hourly.temperature_2m[..hourly.temperature_2m.len().min(HIGH_LOW_HOURS)];
    let high = day.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let low = day.iter().copied().fold(f64::INFINITY, f64::min);

    debug!(hours = forecast.len(), "built forecast");

    Ok(WeatherSnapshot {
        location_name: location_name.to_string(),
        temperature: round1(body.current.temperature_2m),
        weather_code: body.current.weather_code,
        high: round1(high),
        low: round1(low),
        humidity: body.current.relative_humidity_2m,
        wind_speed: round1(body.current.wind_speed_10m),
        forecast,
    })
}

/// Open-Meteo HTTP client
pub struct OpenMeteoClient {
    client: Client,
}

impl OpenMeteoClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DashboardError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn geocode(&self, name: &str) -> Result<Option<(f64, f64)>> {
        let response = self
            .client
            .get(GEOCODING_API)
            .timeout(GEOCODE_TIMEOUT)
            .query(&[("name", name), ("count", "1"), ("language", "en"), ("format", "json")])
            .send()
            .await?
            .error_for_status()?;

        let body: GeocodeResponse = response.json().await?;
        let found = body.results.first().map(|r| (r.latitude, r.longitude));
        match found {
            Some((lat, lon)) => info!(location = %name, lat, lon, "geocoded location"),
            None => warn!(location = %name, "no geocoding results"),
        }
        Ok(found)
    }

    async fn fetch(&self, location: &Location, forecast_hours: usize) -> Result<WeatherSnapshot> {
        let latitude = location.latitude.to_string();
        let longitude = location.longitude.to_string();
        let response = self
            .client
            .get(FORECAST_API)
            .query(&[
                ("latitude", latitude.as_str()),
                ("longitude", longitude.as_str()),
                ("current", "temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m"),
                ("hourly", "temperature_2m,weather_code"),
                ("timezone", "auto"),
                ("forecast_days", "2"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: ForecastResponse = response.json().await?;
        build_snapshot(&location.location_name, body, forecast_hours)
    }
}

struct CachedSnapshot {
    snapshot: WeatherSnapshot,
    fetched: Instant,
}

struct WeatherState {
    location: Location,
    cache: Option<CachedSnapshot>,
    last_success: Option<(String, DateTime<Utc>)>,
}

/// TTL cache in front of a `WeatherProvider`
///
/// The state lock is held across the upstream call, so concurrent cache
/// misses collapse into a single fetch.
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    state: Mutex<WeatherState>,
    ttl: Duration,
    forecast_hours: usize,
}

impl WeatherService {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        location: Location,
        ttl: Duration,
        forecast_hours: usize,
    ) -> Self {
        Self {
            provider,
            state: Mutex::new(WeatherState {
                location,
                cache: None,
                last_success: None,
            }),
            ttl,
            forecast_hours,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot if younger than the TTL, otherwise a fresh fetch
    pub async fn get_weather(&self) -> Result<WeatherSnapshot> {
        let mut state = self.state.lock().await;

        if let Some(cached) = &state.cache {
            if cached.fetched.elapsed() < self.ttl {
                debug!(location = %state.location.location_name, "weather cache hit");
                return Ok(cached.snapshot.clone());
            }
        }

        // Expired entries are never served, even if the refresh fails
        state.cache = None;

        let fetched = self.provider.fetch(&state.location, self.forecast_hours).await;
        match fetched {
            Ok(snapshot) => {
                info!(location = %state.location.location_name, "weather refreshed");
                state.last_success = Some((state.location.location_name.clone(), Utc::now()));
                state.cache = Some(CachedSnapshot {
                    snapshot: snapshot.clone(),
                    fetched: Instant::now(),
                });
                Ok(snapshot)
            }
            Err(e) => {
                match &state.last_success {
                    Some((name, at)) => warn!(
                        error = %e,
                        last_location = %name,
                        last_success = %at.to_rfc3339(),
                        "weather fetch failed"
                    ),
                    None => warn!(error = %e, "weather fetch failed, no successful fetch yet"),
                }
                Err(e)
            }
        }
    }

    pub async fn location(&self) -> Location {
        self.state.lock().await.location.clone()
    }

    /// Geocode `name`, switch to it and drop the cached snapshot
    pub async fn set_location(&self, name: &str) -> Result<Location> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DashboardError::InvalidArgument("location must not be empty".to_string()));
        }

        let (latitude, longitude) = self
            .provider
            .geocode(name)
            .await?
            .ok_or_else(|| DashboardError::NotFound(format!("location '{}'", name)))?;

        let location = Location {
            location_name: name.to_string(),
            latitude,
            longitude,
        };

        let mut state = self.state.lock().await;
        state.location = location.clone();
        state.cache = None;
        info!(location = %name, latitude, longitude, "weather location changed");
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn london() -> Location {
        Location {
            location_name: "London".to_string(),
            latitude: 51.5074,
            longitude: -0.1278,
        }
    }

    fn snapshot(name: &str) -> WeatherSnapshot {
        WeatherSnapshot {
            location_name: name.to_string(),
            temperature: 12.3,
            weather_code: 3,
            high: 15.0,
            low: 8.1,
            humidity: 70.0,
            wind_speed: 11.2,
            forecast: vec![],
        }
    }

    fn forecast_body() -> ForecastResponse {
        let time: Vec<String> = (0..48)
            .map(|h| format!("2024-01-{:02}T{:02}:00", 15 + h / 24, h % 24))
            .collect();
        let temperature_2m: Vec<f64> = (0..48).map(|h| h as f64 + 0.04).collect();
        let weather_code: Vec<i32> = (0..48).map(|h| h % 4).collect();
        ForecastResponse {
            current: CurrentBlock {
                time: "2024-01-15T15:15".to_string(),
                temperature_2m: 9.87,
                relative_humidity_2m: 81.0,
                weather_code: 2,
                wind_speed_10m: 14.44,
            },
            hourly: HourlyBlock {
                time,
                temperature_2m,
                weather_code,
            },
        }
    }

    #[test]
    fn test_build_snapshot() {
        let snap = build_snapshot("London", forecast_body(), 12).unwrap();
        assert_eq!(snap.location_name, "London");
        assert_eq!(snap.temperature, 9.9);
        assert_eq!(snap.wind_speed, 14.4);
        assert_eq!(snap.humidity, 81.0);
        assert_eq!(snap.forecast.len(), 12);
        assert_eq!(snap.forecast[0].time_label, "3PM");
        assert_eq!(snap.forecast[0].temperature, 15.0);
        assert_eq!(snap.forecast[9].time_label, "12AM");
        assert_eq!(snap.forecast[11].time_label, "2AM");
        assert_eq!(snap.high, 23.0);
        assert_eq!(snap.low, 0.0);
    }

    #[test]
    fn test_build_snapshot_rejects_mismatched_arrays() {
        let mut body = forecast_body();
        body.hourly.weather_code.pop();
        assert!(matches!(
            build_snapshot("London", body, 12),
            Err(DashboardError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_forecast_body_parses() {
        let json = r#"{
            "current": {"time": "2024-01-15T09:00", "temperature_2m": 4.2,
                        "relative_humidity_2m": 90, "weather_code": 61, "wind_speed_10m": 7.0},
            "hourly": {"time": ["2024-01-15T08:00", "2024-01-15T09:00"],
                       "temperature_2m": [3.9, 4.2], "weather_code": [61, 61]}
        }"#;
        let body: ForecastResponse = serde_json::from_str(json).unwrap();
        let snap = build_snapshot("Leeds", body, 12).unwrap();
        assert_eq!(snap.forecast.len(), 1);
        assert_eq!(snap.forecast[0].time_label, "9AM");
        assert_eq!(snap.high, 4.2);
        assert_eq!(snap.low, 3.9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_within_ttl_fetches_once() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_fetch()
            .times(1)
            .returning(|loc, _| Ok(snapshot(&loc.location_name)));

        let service = WeatherService::new(Arc::new(provider), london(), Duration::from_secs(1800), 12);
        let first = service.get_weather().await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        let second = service.get_weather().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_fetches_again() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_fetch()
            .times(2)
            .returning(|loc, _| Ok(snapshot(&loc.location_name)));

        let service = WeatherService::new(Arc::new(provider), london(), Duration::from_secs(1800), 12);
        service.get_weather().await.unwrap();
        tokio::time::advance(Duration::from_secs(1801)).await;
        service.get_weather().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cache_not_served_on_failure() {
        let mut provider = MockWeatherProvider::new();
        let mut seq = mockall::Sequence::new();
        provider
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|loc, _| Ok(snapshot(&loc.location_name)));
        provider
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DashboardError::UpstreamUnavailable("connection refused".into())));

        let service = WeatherService::new(Arc::new(provider), london(), Duration::from_secs(60), 12);
        service.get_weather().await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(
            service.get_weather().await,
            Err(DashboardError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_location_invalidates_cache() {
        let mut provider = MockWeatherProvider::new();
        provider
            .expect_geocode()
            .times(1)
            .returning(|_| Ok(Some((48.8566, 2.3522))));
        provider
            .expect_fetch()
            .times(2)
            .returning(|loc, _| Ok(snapshot(&loc.location_name)));

        let service = WeatherService::new(Arc::new(provider), london(), Duration::from_secs(1800), 12);
        assert_eq!(service.get_weather().await.unwrap().location_name, "London");

        let loc = service.set_location("Paris").await.unwrap();
        assert_eq!(loc.latitude, 48.8566);
        assert_eq!(service.location().await, loc);
        assert_eq!(service.get_weather().await.unwrap().location_name, "Paris");
    }

    #[tokio::test]
    async fn test_set_unknown_location() {
        let mut provider = MockWeatherProvider::new();
        provider.expect_geocode().returning(|_| Ok(None));
        provider.expect_fetch().never();

        let service = WeatherService::new(Arc::new(provider), london(), Duration::from_secs(1800), 12);
        assert!(matches!(
            service.set_location("Atlantis").await,
            Err(DashboardError::NotFound(_))
        ));
        assert_eq!(service.location().await, london());
        assert!(matches!(
            service.set_location("   ").await,
            Err(DashboardError::InvalidArgument(_))
        ));
    }
}
