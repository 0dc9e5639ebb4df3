//! Settings routes: metadata listing (secrets masked), bulk and per-key set.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};

pub async fn list_settings(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let settings = state.store.settings().list_with_meta().await?;
    Ok(Json(json!({ "settings": settings, "version": state.store.settings().version() })))
}

pub async fn set_settings(
    State(state): State<AppState>,
    Json(payload): Json<HashMap<String, serde_json::Value>>,
) -> AppResult<Json<serde_json::Value>> {
    let entries: HashMap<String, String> = payload
        .into_iter()
        .map(|(k, v)| (k, value_to_string(v)))
        .collect();
    state.store.settings().set_many(entries).await?;
    Ok(Json(json!({"status": "saved"})))
}

pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let value = state.store.settings().get(&key).await?;
    let masked = if review_store::settings::SECRET_KEYS.contains(&key.as_str()) {
        value.map(|v| if v.is_empty() { v } else { "***".to_string() })
    } else {
        value
    };
    Ok(Json(json!({ "key": key, "value": masked })))
}

pub async fn set_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    let value = payload
        .get("value")
        .cloned()
        .ok_or_else(|| AppError::BadRequest("missing field: value".into()))?;
    let value = value_to_string(value);
    state.store.settings().set(&key, &value).await?;
    Ok(Json(json!({"status": "saved", "key": key})))
}

fn value_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
