//! HTTP surface of the review engine.
//!
//! Route map:
//! - `POST /webhook/{platform}`: platform event ingestion
//! - `POST /polling/start|stop`, `GET /polling/status`: ticker control
//! - `GET|POST /polling/repos`, `PUT|DELETE /polling/repos/{id}`: repo CRUD
//! - `POST /polling/repos/{id}/trigger|test|clone`: operator actions
//! - `GET /stats/...`: dashboard queries; `.../export` renders md/html
//! - `GET|POST /settings...`: runtime settings
//! - `GET /health`

pub mod core;
pub mod error_handler;
pub mod routes;

use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use tokio::signal;
use tracing::info;

pub use crate::core::app_state::{AppConfig, AppState, ConfigError};
use crate::error_handler::AppError;
use crate::routes::{health, polling, settings, stats, webhook};

/// Builds the router; separated from [`start`] so tests can drive it
/// without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhook/{platform}", post(webhook::handle_webhook))
        .route("/polling/status", get(polling::polling_status))
        .route("/polling/start", post(polling::polling_start))
        .route("/polling/stop", post(polling::polling_stop))
        .route("/polling/repos", get(polling::list_repos))
        .route("/polling/repos", post(polling::add_repo))
        .route("/polling/repos/{repo_id}", put(polling::update_repo))
        .route("/polling/repos/{repo_id}", delete(polling::delete_repo))
        .route("/polling/repos/{repo_id}/test", post(polling::test_repo))
        .route("/polling/repos/{repo_id}/clone", post(polling::clone_repo))
        .route(
            "/polling/repos/{repo_id}/trigger",
            post(polling::trigger_repo),
        )
        .route("/stats/overview", get(stats::overview))
        .route("/stats/daily-trend", get(stats::daily_trend))
        .route("/stats/authors", get(stats::authors))
        .route("/stats/hotspots", get(stats::hotspots))
        .route("/stats/categories", get(stats::categories))
        .route("/stats/reviews", get(stats::list_reviews))
        .route("/stats/review/{task_id}/full", get(stats::review_full))
        .route("/stats/review/{task_id}/export", get(stats::export_review))
        .route("/stats/review/{task_id}/cancel", post(stats::cancel_review))
        .route("/stats/review/{task_id}", delete(stats::delete_review))
        .route("/settings", get(settings::list_settings))
        .route("/settings", post(settings::set_settings))
        .route("/settings/{key}", get(settings::get_setting))
        .route("/settings/{key}", post(settings::set_setting))
        .fallback(handler_404)
        .with_state(state)
}

/// Binds and serves until SIGTERM/ctrl-c, then drains the engine.
pub async fn start(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let bind = state.config.bind_address.clone();
    let engine = state.engine.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP is down; give in-flight reviews their grace, then stop.
    engine.shutdown().await;
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            eprintln!("failed to listen for shutdown signal: {e}");
        }
    };
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received");
}

/// Fallback handler for unmatched routes.
async fn handler_404() -> impl IntoResponse {
    AppError::NotFound
}

/// Wires the whole system together from configuration; the binary calls this.
pub async fn build_state(config: AppConfig) -> Result<AppState, Box<dyn std::error::Error>> {
    use git_workspace::WorkspaceManager;
    use review_engine::{Poller, ReviewEngine};
    use review_store::Store;

    let db_path = std::path::Path::new(&config.data_dir).join("reviews.db");
    let store = Store::open(&db_path).await?;
    let workspace = Arc::new(WorkspaceManager::new(config.workspace_dir.clone()));
    let engine = ReviewEngine::new(store.clone(), workspace, config.engine_config());
    engine.start().await?;
    let poller = Poller::new(engine.clone());
    poller.spawn();
    poller.start();

    Ok(AppState::new(Arc::new(config), store, engine, poller))
}
