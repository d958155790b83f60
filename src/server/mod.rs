use crate::config::Config;
use crate::conversion::{JobOrchestrator, OrchestratorSettings};
use crate::engine::{FfmpegEngine, TranscodingEngine};
use crate::state::{spawn_retention_sweeper, JobStore};
use crate::storage::LocalStorage;
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_api;
pub mod routes_sse;

/// Room for multipart framing on top of the raw upload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub orchestrator: Arc<JobOrchestrator>,
    pub store: Arc<JobStore>,
    pub config: Arc<Config>,
}

impl AppContext {
    /// Wire storage and the orchestrator for `config` around `engine`.
    pub fn build(config: Config, engine: Arc<dyn TranscodingEngine>) -> Result<Self> {
        let inputs = LocalStorage::open(&config.storage.upload_dir).with_context(|| {
            format!("Failed to open upload dir {:?}", config.storage.upload_dir)
        })?;
        let outputs = LocalStorage::open(&config.storage.output_dir).with_context(|| {
            format!("Failed to open output dir {:?}", config.storage.output_dir)
        })?;

        let store = JobStore::new();
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            engine,
            Arc::new(inputs),
            Arc::new(outputs),
            OrchestratorSettings::from_config(&config),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            store,
            config: Arc::new(config),
        })
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let body_limit = usize::try_from(ctx.config.upload.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let mut app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // SPA fallback: index.html for any route that doesn't match a file
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(ServeFile::new(index_path)),
            );
        }
    }

    app
}

fn api_routes() -> Router<AppContext> {
    routes_api::api_routes().merge(routes_sse::sse_routes())
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server with the ffmpeg engine
pub async fn start_server(config: Config) -> Result<()> {
    let engine = FfmpegEngine::discover(&config.tools).context("ffmpeg is required to serve")?;
    start_server_with_engine(config, Arc::new(engine)).await
}

/// Start the HTTP server around an arbitrary engine
pub async fn start_server_with_engine(
    config: Config,
    engine: Arc<dyn TranscodingEngine>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let static_dir = config.server.static_dir.clone();
    let retention = Duration::from_secs(config.conversion.retention_secs);
    let sweep_interval = Duration::from_secs(config.conversion.sweep_interval_secs.max(1));

    let ctx = AppContext::build(config, engine)?;

    let cancel = CancellationToken::new();
    let sweeper = (!retention.is_zero()).then(|| {
        spawn_retention_sweeper(ctx.store.clone(), retention, sweep_interval, cancel.clone())
    });

    let app = create_router(ctx, static_dir);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
