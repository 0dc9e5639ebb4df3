//! Health probe.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::core::app_state::AppState;
use crate::error_handler::AppResult;

pub async fn health(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let settings = state.store.settings();
    Ok(Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "model_endpoint": settings.get_or("model_api_base", "").await?,
        "model_name": settings.get_or("model_name", "").await?,
        "workers": state.config.worker_count,
    })))
}
