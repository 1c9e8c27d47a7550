/// API Routes definition

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{self, ApiKey};
use super::handlers;
use super::AppState;

pub fn create_router(state: AppState, api_key: ApiKey, enable_cors: bool) -> Router {
    // Protected routes (require the API key when one is configured)
    let protected_routes = Router::new()
        .route("/system/metrics", get(handlers::get_metrics))
        .route("/system/metrics/history", post(handlers::get_metrics_history))
        .route("/system/info", get(handlers::get_system_info))
        .route("/containers", get(handlers::list_containers))
        .route("/containers/refresh", post(handlers::refresh_containers))
        .route("/containers/:id/start", post(handlers::start_container))
        .route("/containers/:id/stop", post(handlers::stop_container))
        .route("/containers/:id/restart", post(handlers::restart_container))
        .route("/containers/:id/update", post(handlers::update_container))
        .route("/notes", get(handlers::list_notes).post(handlers::create_note))
        .route(
            "/notes/:id",
            get(handlers::get_note)
                .put(handlers::update_note)
                .delete(handlers::delete_note),
        )
        .route("/weather", get(handlers::get_weather))
        .route(
            "/weather/location",
            get(handlers::get_location).put(handlers::set_location),
        )
        .route_layer(middleware::from_fn_with_state(api_key, auth::auth_middleware));

    // Public routes
    let public_routes = Router::new().route("/health", get(handlers::health_check));

    let mut app = Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
