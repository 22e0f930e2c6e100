use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use mirrorcache_core::mirror::MirrorStatus;
use mirrorcache_proxy::AppState;
use serde_json::{json, Value};

/// `GET /api/admin/mirrors` (§6) — full table, including pending/blacklisted
/// entries the public `/stats` endpoint hides.
pub async fn list_mirrors(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.mirrors.get_all()))
}

/// `POST /api/admin/mirrors` (§6). `urls` may be a single string or a list.
pub async fn add_mirror(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing name"})));
    };
    let urls = match body.get("urls") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    if urls.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing urls"})));
    }
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .and_then(MirrorStatus::parse)
        .unwrap_or(MirrorStatus::Approved);

    match state.mirrors.save(name, urls, status).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Ok(false) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "failed to add mirror (invalid urls or self-reference)"})),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist new mirror");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to add mirror"})))
        }
    }
}

/// `PUT /api/admin/mirrors/{name}` (§6) — partial update of `urls`/`status`.
pub async fn update_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let urls = match body.get("urls") {
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(Value::Array(items)) => {
            Some(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        }
        _ => None,
    };
    let status = body.get("status").and_then(Value::as_str).and_then(MirrorStatus::parse);

    match state.mirrors.update(&name, urls, status).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({"error": "failed to update mirror"}))),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist mirror update");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to update mirror"})))
        }
    }
}

/// `DELETE /api/admin/mirrors/{name}` (§6).
pub async fn delete_mirror(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.mirrors.delete(&name).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({"error": "mirror not found"}))),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete mirror");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to delete mirror"})))
        }
    }
}
