use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use mirrorcache_core::cache_path::logical_filename;
use mirrorcache_proxy::AppState;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

const SEARCH_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    path: String,
}

/// `GET /api/cache/search` (§6) — unauthenticated substring search over the
/// on-disk cache tree, capped at 100 hits. Entries are stored on disk as
/// `{hash}_{filename}`; `q` is matched against the filename half only.
pub async fn search_cache(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Json<Value> {
    let query = params.q.to_lowercase();
    if query.is_empty() {
        return Json(json!([]));
    }

    let storage_root = state.config.snapshot().storage_path_resolved;
    let storage_path = Path::new(&storage_root);
    let mut results = Vec::new();

    for entry in WalkDir::new(storage_path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if results.len() >= SEARCH_LIMIT {
            break;
        }
        let Some(filename) = entry.file_name().to_str() else {
            continue;
        };
        let real_name = logical_filename(filename);
        if !real_name.to_lowercase().contains(&query) {
            continue;
        }

        let Ok(rel_path) = entry.path().strip_prefix(storage_path) else {
            continue;
        };
        let Some(distro) = rel_path.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned())
        else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };

        let mtime = meta.modified().ok();
        let atime = meta.accessed().ok();
        let last_hit = match (mtime, atime) {
            (Some(m), Some(a)) => Some(if m > a { m } else { a }),
            (Some(m), None) => Some(m),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        };

        results.push(json!({
            "name": real_name,
            "distro": distro,
            "size": meta.len(),
            "mtime": mtime.and_then(format_unix_timestamp),
            "atime": last_hit.and_then(format_unix_timestamp),
            "path": rel_path.to_string_lossy(),
        }));
    }

    Json(json!(results))
}

fn format_unix_timestamp(t: std::time::SystemTime) -> Option<String> {
    let secs = t.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
    let dt = chrono::DateTime::from_timestamp(secs, 0)?;
    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// `GET /api/cache/download` (§6) — unauthenticated, rejects any `path`
/// containing `..` or a leading `/` before ever touching the filesystem.
pub async fn download_cache(
    State(state): State<AppState>,
    Query(params): Query<DownloadQuery>,
) -> Response {
    if params.path.contains("..") || params.path.starts_with('/') {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }

    let storage_root = state.config.snapshot().storage_path_resolved;
    let full_path = Path::new(&storage_root).join(&params.path);

    let bytes = match tokio::fs::read(&full_path).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };

    let filename = full_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let download_name = logical_filename(&filename).to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{download_name}\""),
        )
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `DELETE /api/admin/cache?path=` (§6, token-gated). Same traversal guard as
/// the download route.
pub async fn delete_cache_entry(
    State(state): State<AppState>,
    Query(params): Query<DownloadQuery>,
) -> (StatusCode, Json<Value>) {
    if params.path.contains("..") || params.path.starts_with('/') {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid path"})));
    }

    let storage_root = state.config.snapshot().storage_path_resolved;
    let full_path = Path::new(&storage_root).join(&params.path);

    match tokio::fs::remove_file(&full_path).await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "success"}))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, Json(json!({"error": "file not found"})))
        }
        Err(e) => {
            tracing::error!(error = %e, path = %params.path, "failed to delete cache entry");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to delete entry"})))
        }
    }
}
