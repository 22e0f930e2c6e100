use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use mirrorcache_proxy::AppState;

/// Admin API token authentication. Accepts either a `Bearer <token>` header
/// or the bare token value. An empty configured `admin_token` disables
/// auth entirely.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = state.config.snapshot().admin_token;
    if token.is_empty() {
        return Ok(next.run(request).await);
    }

    let authorized = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v) == token)
        .unwrap_or(false);

    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
