use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use mirrorcache_proxy::AppState;
use serde_json::{json, Value};

/// `GET /api/admin/config` (§6) — the handful of fields the admin panel
/// is allowed to see and edit, not the full `ProxyConfig`.
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = state.config.snapshot();
    Json(json!({
        "cache_days": config.cache_days,
        "cache_retention_enabled": config.cache_retention_enabled,
    }))
}

/// `PUT /api/admin/config` (§6, §9 "save_config_value races"). Writes are
/// serialized by `ConfigStore::set`'s own write lock, so concurrent admin
/// edits never drop each other's changes.
pub async fn put_config(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(days) = body.get("cache_days") {
        let Some(days) = days.as_u64() else {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid value for cache_days"})));
        };
        if days < 1 {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "cache_days must be at least 1"})));
        }
        if let Err(e) = state.config.set("cache_days", json!(days)) {
            tracing::error!(error = %e, "failed to persist cache_days");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to save config"})));
        }
    }

    if let Some(enabled) = body.get("cache_retention_enabled") {
        let Some(enabled) = enabled.as_bool() else {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid value for cache_retention_enabled"})));
        };
        if let Err(e) = state.config.set("cache_retention_enabled", json!(enabled)) {
            tracing::error!(error = %e, "failed to persist cache_retention_enabled");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to save config"})));
        }
    }

    (StatusCode::OK, Json(json!({"status": "success"})))
}
