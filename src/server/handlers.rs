/// API request handlers
///
/// Thin adapters from HTTP to the core services; every body goes through
/// the shared envelope in `response`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::response::ApiResponse;
use super::AppState;
use crate::core::config::DashboardConfig;
use crate::core::docker::ContainerRecord;
use crate::core::history::HistoryWindow;
use crate::core::metrics::{MetricSample, SystemInfo};
use crate::core::notes::{Note, NotePatch};
use crate::core::update::UpdateReport;
use crate::core::weather::{Location, WeatherSnapshot};
use crate::error::{DashboardError, Result};

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct HistoryRequest {
    last_n_seconds: i64,
}

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    location: String,
}

#[derive(Serialize)]
pub struct HealthPayload {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct MetricsPayload {
    metrics: MetricSample,
}

#[derive(Serialize)]
pub struct HistoryPayload {
    history: HistoryWindow,
}

#[derive(Serialize)]
pub struct InfoPayload {
    info: SystemInfo,
}

#[derive(Serialize)]
pub struct ContainersPayload {
    containers: Vec<ContainerRecord>,
}

#[derive(Serialize)]
pub struct ContainerIdPayload {
    container_id: String,
}

#[derive(Serialize)]
pub struct NotePayload {
    note: Note,
}

#[derive(Serialize)]
pub struct NotesPayload {
    notes: Vec<Note>,
}

#[derive(Serialize)]
pub struct DeletedPayload {
    id: String,
}

#[derive(Serialize)]
pub struct WeatherPayload {
    weather: WeatherSnapshot,
}

type ApiResult<T> = Result<ApiResponse<T>>;

/// Unwrap a JSON body, turning extractor rejections into InvalidArgument
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| DashboardError::InvalidArgument(e.body_text()))
}

/// Run filesystem or sysinfo work off the async workers
async fn blocking<T, F>(what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DashboardError::Storage(format!("{} task failed: {}", what, e)))?
}

// ============================================================================
// Health
// ============================================================================

pub async fn health_check() -> ApiResponse<HealthPayload> {
    ApiResponse::ok(
        "Server is healthy",
        HealthPayload {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

pub async fn not_found() -> ApiResponse<serde_json::Value> {
    ApiResponse::with_status(
        StatusCode::NOT_FOUND,
        "No such endpoint",
        serde_json::json!({ "error": "not_found" }),
    )
}

// ============================================================================
// System Metrics Handlers
// ============================================================================

pub async fn get_metrics(State(state): State<AppState>) -> ApiResult<MetricsPayload> {
    // Serve the sampler's reading while it is current
    if let Some(metrics) = state.history.latest() {
        let age = Utc::now().timestamp() - metrics.timestamp;
        if age >= 0 && age <= state.metrics_interval.as_secs() as i64 {
            return Ok(ApiResponse::ok("Retrieved system metrics", MetricsPayload { metrics }));
        }
    }

    let source = state.metrics.clone();
    let metrics = blocking("metrics", move || source.sample()).await?;

    Ok(ApiResponse::ok("Retrieved system metrics", MetricsPayload { metrics }))
}

pub async fn get_metrics_history(
    State(state): State<AppState>,
    payload: std::result::Result<Json<HistoryRequest>, JsonRejection>,
) -> ApiResult<HistoryPayload> {
    let request = json_body(payload)?;
    let history = state.history.query(request.last_n_seconds)?;

    Ok(ApiResponse::ok(
        format!("Retrieved {} samples", history.len()),
        HistoryPayload {
            history: HistoryWindow { history },
        },
    ))
}

pub async fn get_system_info(State(state): State<AppState>) -> ApiResult<InfoPayload> {
    let source = state.metrics.clone();
    let info = blocking("system info", move || source.system_info()).await?;

    Ok(ApiResponse::ok("Retrieved system info", InfoPayload { info }))
}

// ============================================================================
// Container Handlers
// ============================================================================

pub async fn list_containers(State(state): State<AppState>) -> ApiResult<ContainersPayload> {
    let containers = state.containers.list().await?;
    Ok(ApiResponse::ok(
        format!("Retrieved {} containers", containers.len()),
        ContainersPayload { containers },
    ))
}

pub async fn refresh_containers(State(state): State<AppState>) -> ApiResult<ContainersPayload> {
    let containers = state.containers.refresh().await?;
    Ok(ApiResponse::ok(
        format!("Refreshed {} containers", containers.len()),
        ContainersPayload { containers },
    ))
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ContainerIdPayload> {
    let container_id = state.containers.start(&id).await?;
    Ok(ApiResponse::ok(format!("Container {} started", id), ContainerIdPayload { container_id }))
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ContainerIdPayload> {
    let container_id = state.containers.stop(&id).await?;
    Ok(ApiResponse::ok(format!("Container {} stopped", id), ContainerIdPayload { container_id }))
}

pub async fn restart_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ContainerIdPayload> {
    let container_id = state.containers.restart(&id).await?;
    Ok(ApiResponse::ok(format!("Container {} restarted", id), ContainerIdPayload { container_id }))
}

pub async fn update_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<UpdateReport> {
    let report = state.containers.update(&id).await?;
    Ok(ApiResponse::ok(format!("Container {} updated", report.name), report))
}

// ============================================================================
// Notes Handlers
// ============================================================================

pub async fn list_notes(State(state): State<AppState>) -> ApiResult<NotesPayload> {
    let store = state.notes.clone();
    let notes = blocking("notes", move || Ok(store.list())).await?;
    Ok(ApiResponse::ok(format!("Retrieved {} notes", notes.len()), NotesPayload { notes }))
}

pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<NotePayload> {
    let store = state.notes.clone();
    let note = blocking("notes", move || store.get(&id)).await?;
    Ok(ApiResponse::ok("Retrieved note", NotePayload { note }))
}

pub async fn create_note(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateNoteRequest>, JsonRejection>,
) -> ApiResult<NotePayload> {
    let request = json_body(payload)?;
    let store = state.notes.clone();
    let note = blocking("notes", move || store.create(&request.title, &request.content)).await?;
    Ok(ApiResponse::with_status(StatusCode::CREATED, "Note created", NotePayload { note }))
}

pub async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<NotePatch>, JsonRejection>,
) -> ApiResult<NotePayload> {
    let patch = json_body(payload)?;
    let store = state.notes.clone();
    let note = blocking("notes", move || store.update(&id, patch)).await?;
    Ok(ApiResponse::ok("Note updated", NotePayload { note }))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeletedPayload> {
    let store = state.notes.clone();
    let id = blocking("notes", move || store.delete(&id).map(|()| id)).await?;
    Ok(ApiResponse::ok("Note deleted", DeletedPayload { id }))
}

// ============================================================================
// Weather Handlers
// ============================================================================

pub async fn get_weather(State(state): State<AppState>) -> ApiResult<WeatherPayload> {
    let weather = state.weather.get_weather().await?;
    Ok(ApiResponse::ok("Retrieved weather", WeatherPayload { weather }))
}

pub async fn get_location(State(state): State<AppState>) -> ApiResult<Location> {
    let location = state.weather.location().await;
    Ok(ApiResponse::ok("Retrieved weather location", location))
}

pub async fn set_location(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LocationRequest>, JsonRejection>,
) -> ApiResult<Location> {
    let request = json_body(payload)?;
    let location = state.weather.set_location(&request.location).await?;

    if let Some(path) = state.config_path.clone() {
        let saving = location.clone();
        let target = path.clone();
        let saved = tokio::task::spawn_blocking(move || {
            DashboardConfig::load(&target).and_then(|mut config| config.set_weather_location(&saving, &target))
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
        match saved {
            Ok(()) => info!(path = %path.display(), location = %location.location_name, "saved weather location"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to persist weather location"),
        }
    }

    Ok(ApiResponse::ok(
        format!("Weather location set to {}", location.location_name),
        location,
    ))
}
