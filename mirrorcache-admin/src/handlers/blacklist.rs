use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use mirrorcache_proxy::AppState;
use serde_json::{json, Value};

/// `GET /api/admin/blacklist` (§6).
pub async fn list_patterns(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "patterns": state.blacklist.patterns() }))
}

/// `POST /api/admin/blacklist` (§6). Adding an already-present pattern is a
/// no-op success, matching `Blacklist::add`'s idempotence.
pub async fn add_pattern(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(pattern) = body.get("pattern").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing pattern"})));
    };
    if pattern.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "pattern must not be empty"})));
    }

    match state.blacklist.add(pattern).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist blacklist pattern");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to add pattern"})))
        }
    }
}

/// `DELETE /api/admin/blacklist` (§6). Pattern is supplied in the body, not
/// the path, since patterns may contain `/`.
pub async fn remove_pattern(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(pattern) = body.get("pattern").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing pattern"})));
    };

    match state.blacklist.remove(pattern).await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({"error": "pattern not found"}))),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist blacklist removal");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to remove pattern"})))
        }
    }
}
