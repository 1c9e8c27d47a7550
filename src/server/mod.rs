/// HTTP API server
/// Exposes the core services as a small REST API

#[cfg(feature = "server")]
pub mod routes;

#[cfg(feature = "server")]
pub mod handlers;

#[cfg(feature = "server")]
pub mod auth;

#[cfg(feature = "server")]
pub mod response;

#[cfg(feature = "server")]
pub mod state;

#[cfg(feature = "server")]
pub use routes::create_router;

#[cfg(feature = "server")]
pub use state::AppState;

#[cfg(feature = "server")]
pub async fn run(config: crate::core::DashboardConfig, config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    use anyhow::Context;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    use crate::core::{
        sampler, ContainerManager, HostPaths, MetricsCollector, MetricsHistory, MetricsSource,
        NotesStore, OpenMeteoClient, WeatherService,
    };

    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", problems.join("\n  "));
    }

    let host = HostPaths::from_env();
    info!(root = %host.root().display(), "reading host metrics");
    let metrics: Arc<dyn MetricsSource> = Arc::new(MetricsCollector::new(host));
    let history = Arc::new(MetricsHistory::new(config.metrics.max_history_duration));

    let containers = ContainerManager::connect(config.containers.settings())
        .context("Failed to connect to Docker")?;

    let notes = Arc::new(
        NotesStore::open(&config.notes.data_dir)
            .with_context(|| format!("Failed to open notes in {}", config.notes.data_dir.display()))?,
    );

    let client = OpenMeteoClient::new(config.weather.request_timeout())?;
    let weather = Arc::new(WeatherService::new(
        Arc::new(client),
        config.weather.location(),
        config.weather.cache_ttl(),
        config.weather.forecast_hours,
    ));

    let shutdown = CancellationToken::new();
    let sampling = sampler::spawn_sampling_loop(
        Arc::clone(&metrics),
        Arc::clone(&history),
        config.metrics.interval(),
        shutdown.clone(),
    );

    let api_key = auth::ApiKey::new(config.server.api_key.clone());
    if !api_key.is_enabled() {
        warn!("no API key configured, authentication disabled");
    }

    let state = AppState {
        metrics,
        history,
        metrics_interval: config.metrics.interval(),
        containers,
        notes,
        weather,
        config_path,
    };
    let app = create_router(state, api_key.clone(), config.server.enable_cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    println!("🚀 homedash {}", env!("CARGO_PKG_VERSION"));
    println!("   📍 API:  http://{}", addr);
    if api_key.is_enabled() {
        println!("   🔒 Auth: Enabled (X-API-Key required)");
    } else {
        println!("   ⚠️  Auth: Disabled (no API key)");
    }
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = signal.cancelled() => {}
            }
        })
        .await?;

    shutdown.cancel();
    sampling.await.context("Sampling task failed")?;
    info!("server stopped");

    Ok(())
}
