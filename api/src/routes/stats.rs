//! Statistics and review-record routes.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use review_store::models::{ReviewStrategy, TaskFilter, TaskSort, TaskStatus};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::error_handler::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct ReviewListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default = "default_sort")]
    pub sort_by: String,
    #[serde(default = "default_order")]
    pub order: String,
}

fn default_limit() -> u32 {
    50
}
fn default_sort() -> String {
    "created_at".to_string()
}
fn default_order() -> String {
    "desc".to_string()
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<ReviewListQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let status = match &query.status {
        Some(s) => Some(
            TaskStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let strategy = match &query.strategy {
        Some(s) => Some(
            ReviewStrategy::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown strategy: {s}")))?,
        ),
        None => None,
    };
    let sort_by = TaskSort::parse(&query.sort_by)
        .ok_or_else(|| AppError::BadRequest(format!("unknown sort field: {}", query.sort_by)))?;
    let descending = match query.order.as_str() {
        "desc" => true,
        "asc" => false,
        other => return Err(AppError::BadRequest(format!("unknown order: {other}"))),
    };

    let tasks = state
        .store
        .tasks()
        .query(TaskFilter {
            status,
            strategy,
            repo_id: query.repo_id,
            author: query.author,
            search: query.search,
            sort_by,
            descending,
            limit: query.limit.clamp(1, 500),
            offset: query.offset,
        })
        .await?;
    Ok(Json(json!({ "reviews": tasks, "count": tasks.len() })))
}

pub async fn review_full(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let (task, issues) = state.store.tasks().get_full(task_id).await?;
    Ok(Json(json!({ "review": task, "issues": issues })))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.store.tasks().delete(task_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({"status": "deleted", "task_id": task_id})))
}

pub async fn cancel_review(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let outcome = state.engine.cancel(task_id).await?;
    Ok(Json(json!({"status": "cancelling", "outcome": format!("{outcome:?}")})))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "md".to_string()
}

pub async fn export_review(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let (task, issues) = state.store.tasks().get_full(task_id).await?;
    let (body, content_type, filename) = match query.format.as_str() {
        "md" => (
            report_parser::export_markdown(&task, &issues),
            "text/markdown; charset=utf-8",
            format!("review-{task_id}.md"),
        ),
        "html" => (
            report_parser::export_html(&task, &issues),
            "text/html; charset=utf-8",
            format!("review-{task_id}.html"),
        ),
        other => {
            return Err(AppError::BadRequest(format!("unknown format: {other}")));
        }
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

pub async fn overview(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let overview = state.store.stats().overview().await?;
    Ok(Json(serde_json::to_value(overview).map_err(|e| AppError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

pub async fn daily_trend(
    State(state): State<AppState>,
    Query(query): Query<TrendQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let trend = state.store.stats().daily_trend(query.days).await?;
    Ok(Json(json!({ "trend": trend })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_top")]
    pub limit: u32,
}

fn default_top() -> u32 {
    20
}

pub async fn authors(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let authors = state.store.stats().authors(query.limit).await?;
    Ok(Json(json!({ "authors": authors })))
}

pub async fn hotspots(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let hotspots = state.store.stats().hotspots(query.limit).await?;
    Ok(Json(json!({ "hotspots": hotspots })))
}

pub async fn categories(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let categories = state.store.stats().categories().await?;
    Ok(Json(json!({ "categories": categories })))
}
