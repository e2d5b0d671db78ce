//! Service assembly: store, pipeline workers, router, and the shutdown
//! sequence (stop accepting, drain workers, close the pool).

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::pipeline::{CapturePipeline, PipelineHandle};
use crate::shared_state::SharedState;
use crate::store::ContextStore;

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    config.print_config();

    let store = ContextStore::connect(
        &config.database_url,
        Duration::from_secs(config.db_acquire_timeout_seconds),
    )
    .await?;

    let config = Arc::new(config);
    let pipeline = Arc::new(CapturePipeline::new(&config, store.clone()));
    let handle = PipelineHandle::spawn(
        pipeline.clone(),
        config.capture_queue_size,
        config.pipeline_workers,
    );

    let state = SharedState::new(config.clone(), store.clone(), pipeline, handle.sender());

    let addr = config.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Ingress stopped, draining capture workers");
    handle
        .shutdown(Duration::from_secs(config.shutdown_grace_seconds))
        .await;
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

fn build_router(state: SharedState) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::timeout::TimeoutLayer;
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    axum::Router::new()
        // Ingestion
        .route("/capture", post(api::capture_api::capture))
        .route("/embed", post(api::embed_api::embed))
        .route("/api/agents/capture", post(api::agents_api::capture_agent_work))
        // Retrieval dispatch
        .route("/api/tools", post(api::tools_api::call_tool))
        // Dashboards
        .route("/api/stats", get(api::stats_api::stats))
        .route("/api/recent", get(api::stats_api::recent))
        .route("/api/quality", get(api::stats_api::quality))
        .route("/api/projects", get(api::stats_api::projects))
        .route("/api/bugs", get(api::stats_api::bugs))
        .route("/api/files", get(api::stats_api::files))
        .route("/api/decisions", get(api::stats_api::decisions))
        .route("/api/agents/stats", get(api::agents_api::agent_stats))
        .route("/api/agents/performance", get(api::agents_api::agent_performance))
        .route("/api/agents/tools", get(api::agents_api::agent_tools))
        .route("/api/agents/recent", get(api::agents_api::agent_recent))
        // Maintenance
        .route("/api/snapshots/:id/summary", post(api::stats_api::rewrite_summary))
        .route("/health", get(api::stats_api::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
