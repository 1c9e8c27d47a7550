#![cfg(feature = "server")]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use homedash::core::docker::{
    ContainerManager, ContainerRecord, ContainerRuntime, ContainerSettings, ContainerSpec,
    ContainerStatus, PortMapping,
};
use homedash::core::history::MetricsHistory;
use homedash::core::metrics::{MetricSample, MetricsSource, SystemInfo};
use homedash::core::notes::NotesStore;
use homedash::core::weather::{Location, WeatherProvider, WeatherService, WeatherSnapshot};
use homedash::server::auth::ApiKey;
use homedash::server::{create_router, AppState};
use homedash::{DashboardError, Result};

const KEY: &str = "test-key";
const NEW_ID: &str = "0123456789abcdef0123";

struct FixedSource;

impl MetricsSource for FixedSource {
    fn sample(&self) -> Result<MetricSample> {
        Ok(MetricSample {
            cpu_usage: 12.5,
            memory_usage: 48.0,
            disk_usage: 61.2,
            uptime: 3600,
            temperature: 47.5,
            timestamp: Utc::now().timestamp(),
        })
    }

    fn system_info(&self) -> Result<SystemInfo> {
        Ok(SystemInfo {
            hostname: "pi".into(),
            system: "Linux".into(),
            release: "6.1.0".into(),
            version: "Debian 12".into(),
            machine: "aarch64".into(),
            memory_total: 7.6,
            disk_total: 58.2,
        })
    }
}

struct FakeRuntime {
    containers: Vec<ContainerRecord>,
}

impl FakeRuntime {
    fn known(&self, id: &str) -> Result<()> {
        if self.containers.iter().any(|c| c.container_id == id || c.name == id) {
            Ok(())
        } else {
            Err(DashboardError::NotFound(format!("container {}", id)))
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.containers.clone())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerSpec> {
        self.known(id)?;
        Ok(ContainerSpec {
            id: id.to_string(),
            name: id.to_string(),
            image: "nginx:latest".to_string(),
            ..Default::default()
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        if id == NEW_ID {
            return Ok(());
        }
        self.known(id)
    }

    async fn stop(&self, id: &str, _grace_secs: u64) -> Result<()> {
        self.known(id)
    }

    async fn restart(&self, id: &str, _grace_secs: u64) -> Result<()> {
        self.known(id)
    }

    async fn pull_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.known(id)
    }

    async fn create(&self, _spec: &ContainerSpec) -> Result<String> {
        Ok(NEW_ID.to_string())
    }
}

struct FakeWeather;

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn geocode(&self, name: &str) -> Result<Option<(f64, f64)>> {
        Ok((name == "Paris").then_some((48.8566, 2.3522)))
    }

    async fn fetch(&self, location: &Location, _forecast_hours: usize) -> Result<WeatherSnapshot> {
        Ok(WeatherSnapshot {
            location_name: location.location_name.clone(),
            temperature: 11.2,
            weather_code: 3,
            high: 14.0,
            low: 6.5,
            humidity: 77.0,
            wind_speed: 9.4,
            forecast: vec![],
        })
    }
}

fn container(id: &str, status: ContainerStatus, port: Option<u16>) -> ContainerRecord {
    ContainerRecord {
        container_id: id.to_string(),
        name: id.to_string(),
        image: "nginx:latest".to_string(),
        status,
        ports: port
            .map(|p| {
                vec![PortMapping {
                    host_port: p,
                    container_port: 80,
                    protocol: "tcp".to_string(),
                }]
            })
            .unwrap_or_default(),
        created: Utc::now(),
    }
}

struct TestApp {
    router: Router,
    history: Arc<MetricsHistory>,
    _dir: TempDir,
}

fn app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let history = Arc::new(MetricsHistory::new(3600));

    let runtime = FakeRuntime {
        containers: vec![
            container("c", ContainerStatus::Exited, Some(8080)),
            container("d", ContainerStatus::Running, None),
            container("b", ContainerStatus::Running, Some(9000)),
            container("a", ContainerStatus::Running, Some(443)),
        ],
    };

    let weather = WeatherService::new(
        Arc::new(FakeWeather),
        Location {
            location_name: "London".into(),
            latitude: 51.5074,
            longitude: -0.1278,
        },
        std::time::Duration::from_secs(1800),
        12,
    );

    let state = AppState {
        metrics: Arc::new(FixedSource),
        history: Arc::clone(&history),
        metrics_interval: std::time::Duration::from_secs(5),
        containers: ContainerManager::new(Arc::new(runtime), ContainerSettings::default()),
        notes: Arc::new(NotesStore::open(dir.path()).unwrap()),
        weather: Arc::new(weather),
        config_path: Some(dir.path().join("config.toml")),
    };

    TestApp {
        router: create_router(state, ApiKey::new(Some(KEY.to_string())), false),
        history,
        _dir: dir,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", KEY);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 200);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn protected_routes_require_key() {
    let app = app();

    let request = Request::builder().uri("/system/metrics").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/system/metrics")
        .header("Authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/system/metrics")
        .header("Authorization", format!("Bearer {}", KEY))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn current_metrics_and_info() {
    let app = app();

    let (status, body) = send(&app.router, "GET", "/system/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"]["cpu_usage"], 12.5);
    assert_eq!(body["metrics"]["uptime"], 3600);

    let (status, body) = send(&app.router, "GET", "/system/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["hostname"], "pi");
}

#[tokio::test]
async fn current_metrics_prefer_fresh_history_sample() {
    let app = app();
    let sample = |timestamp| MetricSample {
        cpu_usage: 87.0,
        memory_usage: 50.0,
        disk_usage: 60.0,
        uptime: 100,
        temperature: 45.0,
        timestamp,
    };

    app.history.record(sample(Utc::now().timestamp() - 600));
    let (_, body) = send(&app.router, "GET", "/system/metrics", None).await;
    assert_eq!(body["metrics"]["cpu_usage"], 12.5);

    app.history.record(sample(Utc::now().timestamp()));
    let (status, body) = send(&app.router, "GET", "/system/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"]["cpu_usage"], 87.0);
}

#[tokio::test]
async fn metrics_history_window() {
    let app = app();
    let now = Utc::now().timestamp();
    for offset in [300, 120, 30, 0] {
        app.history.record(MetricSample {
            cpu_usage: 1.0,
            memory_usage: 2.0,
            disk_usage: 3.0,
            uptime: 10,
            temperature: 40.0,
            timestamp: now - offset,
        });
    }

    let (status, body) = send(
        &app.router,
        "POST",
        "/system/metrics/history",
        Some(json!({ "last_n_seconds": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let samples = body["history"]["history"].as_array().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1]["timestamp"], now);
}

#[tokio::test]
async fn metrics_history_rejects_bad_window() {
    let app = app();

    let (status, body) = send(
        &app.router,
        "POST",
        "/system/metrics/history",
        Some(json!({ "last_n_seconds": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
    assert_eq!(body["code"], 400);

    let (status, body) = send(
        &app.router,
        "POST",
        "/system/metrics/history",
        Some(json!({ "window": "all" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn containers_sorted_for_display() {
    let app = app();

    let (status, body) = send(&app.router, "GET", "/containers", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["containers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b", "d", "c"]);

    let (status, body) = send(&app.router, "POST", "/containers/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["containers"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn container_commands() {
    let app = app();

    let (status, body) = send(&app.router, "POST", "/containers/a/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["container_id"], "a");

    let (status, body) = send(&app.router, "POST", "/containers/ghost/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(&app.router, "POST", "/containers/b/update", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["container_id"], "0123456789ab");
    assert_eq!(body["completed"].as_array().unwrap().last().unwrap(), "started");
}

#[tokio::test]
async fn notes_crud() {
    let app = app();

    let (status, body) = send(
        &app.router,
        "POST",
        "/notes",
        Some(json!({ "title": "T", "content": "C" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["note"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    let (_, body) = send(&app.router, "GET", "/notes", None).await;
    assert!(body["notes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n["id"] == id.as_str() && n["title"] == "T" && n["content"] == "C"));

    let uri = format!("/notes/{}", id);
    let (status, body) = send(&app.router, "PUT", &uri, Some(json!({ "content": "changed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["note"]["title"], "T");
    assert_eq!(body["note"]["content"], "changed");

    let (status, _) = send(&app.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, "PUT", &uri, Some(json!({ "title": "again" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(&app.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn note_title_validated() {
    let app = app();
    let (status, body) = send(&app.router, "POST", "/notes", Some(json!({ "title": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn weather_and_location() {
    let app = app();

    let (status, body) = send(&app.router, "GET", "/weather", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["weather"]["location_name"], "London");

    let (status, body) = send(
        &app.router,
        "PUT",
        "/weather/location",
        Some(json!({ "location": "Paris" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location_name"], "Paris");
    assert_eq!(body["latitude"], 48.8566);

    let (_, body) = send(&app.router, "GET", "/weather/location", None).await;
    assert_eq!(body["location_name"], "Paris");

    let (_, body) = send(&app.router, "GET", "/weather", None).await;
    assert_eq!(body["weather"]["location_name"], "Paris");

    let (status, body) = send(
        &app.router,
        "PUT",
        "/weather/location",
        Some(json!({ "location": "Atlantis" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn unknown_route_uses_envelope() {
    let app = app();
    let (status, body) = send(&app.router, "GET", "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}
