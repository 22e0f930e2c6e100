use http::Uri;
use http_body_util::BodyExt;
use mirrorcache_core::mirror::MirrorStatus;
use std::sync::atomic::Ordering;

use crate::cache_engine::{self, bytes_body, empty_body, ResponseBody};
use crate::state::AppState;

/// Strip a client-supplied absolute-form target (`http://host/rest`,
/// used by forward-proxy-style clients) down to its path, or return the
/// path unchanged for origin-form requests (§4.7.2).
pub fn path_only(target: &str) -> String {
    if let Ok(uri) = target.parse::<Uri>() {
        if uri.scheme().is_some() {
            return uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".to_string());
        }
    }
    target.to_string()
}

fn is_absolute_form(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// First two path segments after the leading slash, if at least two exist
/// (§4.7.3): `(distro, package_path)`.
fn split_distro_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(2, '/');
    let distro = parts.next()?;
    let rest = parts.next()?;
    if distro.is_empty() || rest.is_empty() {
        return None;
    }
    Some((distro, rest))
}

/// Route a non-CONNECT request to its disposition (§4.7). `target` is the
/// request-line target as received (origin-form path, or absolute-form URL
/// for forward-proxy-style clients).
pub async fn route(
    state: &AppState,
    method: &http::Method,
    target: &str,
    headers: &http::HeaderMap,
) -> http::Response<ResponseBody> {
    let path = path_only(target);
    let config = state.config.snapshot();

    if let Some((distro, package_path)) = split_distro_path(&path) {
        let approved = state.mirrors.get_approved();
        let upstream_key = state.mirrors.pick_upstream_key(distro, package_path);

        let managed_name = if approved.contains_key(&upstream_key) {
            Some(upstream_key)
        } else if approved.contains_key(distro) {
            Some(distro.to_string())
        } else {
            None
        };

        if let Some(name) = managed_name {
            state.stats.counters.requests_total.fetch_add(1, Ordering::Relaxed);

            let storage_root = std::path::Path::new(&config.storage_path_resolved);
            let cache_path = cache_engine::derive_cache_path(storage_root, distro, package_path);

            if cache_engine::is_valid(&cache_path, config.cache_days, config.cache_retention_enabled) {
                state.stats.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                state.metrics.requests_total.with_label_values(&[distro, "hit"]).inc();
                state.metrics.cache_hits_total.with_label_values(&[distro]).inc();
                return match cache_engine::serve_from_cache(state, &cache_path, distro).await {
                    Ok(resp) => resp,
                    Err(e) => error_response(e.status_code(), &e.to_json_body()),
                };
            }

            state.stats.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            state.metrics.requests_total.with_label_values(&[distro, "miss"]).inc();
            state.metrics.cache_misses_total.with_label_values(&[distro]).inc();
            state
                .stats
                .add_log(mirrorcache_observability::LogLevel::Info, format!("MISS: {package_path} -> {name}"));

            let urls = approved
                .get(&name)
                .cloned()
                .unwrap_or_default();
            let candidate_urls: Vec<String> = urls
                .iter()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), package_path))
                .collect();
            return cache_engine::stream_and_cache(state, &candidate_urls, cache_path, headers, distro).await;
        }
    }

    if config.passthrough_mode && is_absolute_form(target) {
        return direct_proxy(state, method, target, headers).await;
    }

    error_response(
        http::StatusCode::NOT_FOUND,
        b"{\"error\":\"no managed mirror or passthrough match for this request\"}",
    )
}

/// §4.7.4 — forward-proxy passthrough with opportunistic mirror learning.
async fn direct_proxy(
    state: &AppState,
    method: &http::Method,
    target: &str,
    headers: &http::HeaderMap,
) -> http::Response<ResponseBody> {
    let Ok(uri) = target.parse::<Uri>() else {
        return error_response(http::StatusCode::BAD_REQUEST, b"{\"error\":\"invalid proxy target\"}");
    };
    let Some(authority) = uri.authority().map(|a| a.as_str().to_string()) else {
        return error_response(http::StatusCode::BAD_REQUEST, b"{\"error\":\"proxy target has no host\"}");
    };
    let scheme = uri.scheme_str().unwrap_or("http");

    if state.mirrors.get(&authority).is_none() {
        let learned = state
            .mirrors
            .save(&authority, vec![format!("{scheme}://{authority}")], MirrorStatus::Pending)
            .await;
        match learned {
            Ok(true) => {
                tracing::warn!(host = %authority, "learned new mirror host, status pending");
                state.stats.add_log(
                    mirrorcache_observability::LogLevel::Warning,
                    format!("New mirror pending approval: {authority}"),
                );
            }
            Ok(false) => tracing::warn!(host = %authority, "declined to learn mirror host"),
            Err(e) => tracing::warn!(host = %authority, error = %e, "failed to persist learned mirror host"),
        }
    }

    let mut req = state.http.request(method_to_reqwest(method), target);
    for (name, value) in headers.iter() {
        if *name == http::header::HOST {
            continue;
        }
        req = req.header(name.as_str(), value.as_bytes());
    }

    let started = std::time::Instant::now();
    match req.send().await {
        Ok(resp) => {
            state
                .metrics
                .upstream_latency
                .with_label_values(&[&authority])
                .observe(started.elapsed().as_secs_f64());
            let status = resp.status().as_u16();
            let stats = state.stats.clone();
            let metrics = state.metrics.clone();
            let stream = futures::stream::unfold(resp, move |mut r| {
                let stats = stats.clone();
                let metrics = metrics.clone();
                async move {
                    match r.chunk().await {
                        Ok(Some(chunk)) => {
                            stats.counters.bytes_served.fetch_add(chunk.len() as i64, Ordering::Relaxed);
                            metrics.bytes_served_total.with_label_values(&["passthrough"]).inc_by(chunk.len() as u64);
                            Some((Ok(hyper::body::Frame::data(chunk)), r))
                        }
                        Ok(None) => None,
                        Err(e) => Some((Err(std::io::Error::other(e.to_string())), r)),
                    }
                }
            });
            let mut built = http::Response::builder()
                .status(http::StatusCode::from_u16(status).unwrap_or(http::StatusCode::BAD_GATEWAY))
                .body(http_body_util::StreamBody::new(stream).boxed())
                .expect("direct proxy response is well-formed");
            cache_engine::sanitize_response_headers(&mut built);
            built
        }
        Err(e) => error_response(
            http::StatusCode::BAD_GATEWAY,
            format!("{{\"error\":\"direct proxy failed: {e}\"}}").as_bytes(),
        ),
    }
}

fn method_to_reqwest(method: &http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

fn error_response(status: http::StatusCode, body: &[u8]) -> http::Response<ResponseBody> {
    let body = if body.is_empty() {
        empty_body()
    } else {
        bytes_body(body.to_vec())
    };
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .expect("error response is well-formed")
}
