use http_body_util::BodyExt;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceExt as _;
use tracing::{error, info, warn, Instrument};

use crate::cache_engine::{bytes_body, ResponseBody};
use crate::connect_tunnel;
use crate::router;
use crate::state::AppState;

/// Bind and serve the HTTP entry point (§4.10, §5): each accepted
/// connection is first checked for a CONNECT request-line ahead of hyper
/// (§4.8), then, if not a tunnel, runs on its own hyper task dispatching
/// each request through `handle`. `api_router` carries the admin/cache
/// REST surface (`/api/admin/*`, `/api/cache/*`) — everything else the
/// spec puts on this same listener is implemented directly in `handle`.
pub async fn serve(state: AppState, addr: SocketAddr, api_router: axum::Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "mirrorcache listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };

        let state = state.clone();
        let api_router = api_router.clone();
        state.metrics.active_connections.inc();

        tokio::spawn(async move {
            let stream = match connect_tunnel::intercept(stream, &state).await {
                Ok(Some(stream)) => stream,
                Ok(None) => {
                    state.metrics.active_connections.dec();
                    return;
                }
                Err(e) => {
                    warn!(error = %e, %peer_addr, "CONNECT handling failed");
                    state.metrics.active_connections.dec();
                    return;
                }
            };

            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                let api_router = api_router.clone();
                async move { handle(state, api_router, req, peer_addr).await }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                warn!(error = %e, %peer_addr, "connection error");
            }
            state.metrics.active_connections.dec();
        });
    }
}

async fn handle(
    state: AppState,
    api_router: axum::Router,
    req: http::Request<hyper::body::Incoming>,
    peer_addr: SocketAddr,
) -> Result<http::Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = peer_addr.ip().to_string();

    let span = tracing::info_span!("request", method = %method, path = %path, peer_addr = %client_ip);
    handle_inner(state, api_router, req, method, path).instrument(span).await
}

async fn handle_inner(
    state: AppState,
    api_router: axum::Router,
    req: http::Request<hyper::body::Incoming>,
    method: http::Method,
    path: String,
) -> Result<http::Response<ResponseBody>, Infallible> {
    if path == "/metrics" || (path.starts_with("/api/") && path != "/api/stats") {
        return Ok(delegate_to_api_router(api_router, req).await);
    }

    let response = match path.as_str() {
        "/health" => health(&state),
        "/stats" | "/api/stats" => stats(&state).await,
        "/favicon.ico" => placeholder(),
        "/acng-report.html" => acng_placeholder(),
        "/" | "/admin" => placeholder(),
        "/cleanup" => {
            if !admin_authorized(&state, &req) {
                unauthorized()
            } else {
                cleanup(&state).await
            }
        }
        "/reload" => {
            if !admin_authorized(&state, &req) {
                unauthorized()
            } else {
                reload(&state).await
            }
        }
        _ => {
            let target = absolute_target(&req);
            router::route(&state, &method, &target, req.headers()).await
        }
    };

    Ok(response)
}

/// Bridge a hyper request into the axum admin/cache router (§6) and its
/// response back into this crate's `ResponseBody` type.
async fn delegate_to_api_router(
    api_router: axum::Router,
    req: http::Request<hyper::body::Incoming>,
) -> http::Response<ResponseBody> {
    let (parts, body) = req.into_parts();
    let axum_req = http::Request::from_parts(parts, axum::body::Body::new(body));

    match api_router.oneshot(axum_req).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            let body = body
                .map_err(|e| std::io::Error::other(e.to_string()))
                .boxed();
            http::Response::from_parts(parts, body)
        }
        Err(infallible) => match infallible {},
    }
}

fn header_str<B>(req: &http::Request<B>, name: http::HeaderName) -> Option<&str> {
    req.headers().get(name)?.to_str().ok()
}

/// Reconstruct the request-line target as the router expects it: absolute
/// form when the client is using forward-proxy semantics (distinguished by
/// a non-empty `Host` header pointing somewhere not already handled above),
/// origin form otherwise.
fn absolute_target(req: &http::Request<hyper::body::Incoming>) -> String {
    if req.uri().scheme().is_some() {
        return req.uri().to_string();
    }
    req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".to_string())
}

fn admin_authorized(state: &AppState, req: &http::Request<hyper::body::Incoming>) -> bool {
    let token = state.config.snapshot().admin_token;
    if token.is_empty() {
        return true; // §4.10: empty configured token means admin is unauthenticated
    }
    match header_str(req, http::header::AUTHORIZATION) {
        Some(value) => value.strip_prefix("Bearer ").unwrap_or(value) == token,
        None => false,
    }
}

fn unauthorized() -> http::Response<ResponseBody> {
    json_response(http::StatusCode::UNAUTHORIZED, serde_json::json!({ "error": "unauthorized" }))
}

fn health(state: &AppState) -> http::Response<ResponseBody> {
    let config = state.config.snapshot();
    json_response(
        http::StatusCode::OK,
        serde_json::json!({ "status": "ok", "cache_path": config.storage_path_resolved }),
    )
}

async fn stats(state: &AppState) -> http::Response<ResponseBody> {
    let counters = state.stats.snapshot_counters();
    let file_stats = state.stats.file_stats();
    let logs = state.stats.log_ring.snapshot();
    let approved = state.mirrors.get_approved();

    json_response(
        http::StatusCode::OK,
        serde_json::json!({
            "counters": counters,
            "uptime": state.stats.uptime_string(),
            "file_stats": file_stats,
            "mirrors": approved,
            "logs": logs,
        }),
    )
}

fn placeholder() -> http::Response<ResponseBody> {
    json_response(
        http::StatusCode::OK,
        serde_json::json!({ "status": "ok", "note": "this endpoint is not rendered as HTML" }),
    )
}

fn acng_placeholder() -> http::Response<ResponseBody> {
    json_response(
        http::StatusCode::OK,
        serde_json::json!({ "status": "ok", "note": "apt-cacher-ng report page is not implemented" }),
    )
}

async fn cleanup(state: &AppState) -> http::Response<ResponseBody> {
    let config = state.config.snapshot();
    crate::cache_engine::clean_old_cache(
        std::path::Path::new(&config.storage_path_resolved),
        config.cache_days,
        config.cache_retention_enabled,
    )
    .await;
    json_response(
        http::StatusCode::OK,
        serde_json::json!({ "status": "ok", "note": "cleanup triggered" }),
    )
}

async fn reload(state: &AppState) -> http::Response<ResponseBody> {
    if let Err(e) = state.config.reload() {
        error!(error = %e, "config reload failed");
        return json_response(
            http::StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "config reload failed" }),
        );
    }
    if let Err(e) = state.mirrors.load_from_store().await {
        error!(error = %e, "mirror registry reload failed");
        return json_response(
            http::StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "mirror reload failed" }),
        );
    }
    json_response(http::StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

fn json_response(status: http::StatusCode, value: serde_json::Value) -> http::Response<ResponseBody> {
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(bytes_body(value.to_string()))
        .expect("json response is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_unauthorized_response_has_401_status() {
        let resp = unauthorized();
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }
}
