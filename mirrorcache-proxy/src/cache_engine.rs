use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use mirrorcache_core::cache_path::{cache_path, logical_filename, tmp_path};
use mirrorcache_core::error::ProxyError;
use mirrorcache_observability::LogLevel;
use mirrorcache_store::BlacklistStore;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

pub type ResponseBody = BoxBody<Bytes, io::Error>;

pub fn empty_body() -> ResponseBody {
    Full::new(Bytes::new())
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

pub fn bytes_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

/// Headers that must never be forwarded verbatim because the streaming
/// layer recomputes framing (§4.6 "Response header sanitation").
const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] =
    &["transfer-encoding", "connection", "content-encoding", "content-length"];

pub fn sanitize_response_headers(resp: &mut http::Response<ResponseBody>) {
    for name in HOP_BY_HOP_RESPONSE_HEADERS {
        resp.headers_mut().remove(*name);
    }
}

pub fn derive_cache_path(storage_root: &Path, distro: &str, package_path: &str) -> PathBuf {
    cache_path(storage_root, distro, package_path)
}

/// §4.6 "Freshness": a cache hit requires the file to exist and, when
/// retention is enabled, for `max(atime, mtime)` to be within `cache_days`.
/// `max` rather than `mtime` alone guards against filesystems mounted
/// without atime tracking.
pub fn is_valid(path: &Path, cache_days: u32, retention_enabled: bool) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !retention_enabled {
        return true;
    }
    let last_touch = newest_touch(&meta);
    let now = SystemTime::now();
    match now.duration_since(last_touch) {
        Ok(age) => age < Duration::from_secs(u64::from(cache_days) * 86_400),
        Err(_) => true, // clock skew placed last_touch in the future: treat as fresh
    }
}

fn newest_touch(meta: &std::fs::Metadata) -> SystemTime {
    let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
    let atime = meta.accessed().unwrap_or(UNIX_EPOCH);
    mtime.max(atime)
}

/// Serve an already-cached file to the client (§4.6 "Serve-from-cache").
/// Best-effort bumps the access time; streams the whole file back.
pub async fn serve_from_cache(
    state: &AppState,
    path: &Path,
    distro: &str,
) -> Result<http::Response<ResponseBody>, ProxyError> {
    debug!(path = %path.display(), distro, "cache hit");
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_string();
    state.stats.add_log(LogLevel::Success, format!("HIT: {name}"));
    renew_access_time(path);

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ProxyError::Internal(e.to_string()))?;
    let size = file
        .metadata()
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    state.stats.counters.bytes_served.fetch_add(size as i64, Ordering::Relaxed);
    state.metrics.bytes_served_total.with_label_values(&[distro]).inc_by(size);

    let stream = tokio_util::io::ReaderStream::new(file);
    let body = StreamBody::new(futures::StreamExt::map(stream, |chunk| {
        chunk.map(Frame::data)
    }))
    .boxed();

    let resp = http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_LENGTH, size)
        .body(body)
        .expect("response with well-formed headers");
    Ok(resp)
}

fn renew_access_time(path: &Path) {
    let now = filetime::FileTime::now();
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(filetime::FileTime::from_system_time)
        .unwrap_or(now);
    if let Err(e) = filetime::set_file_times(path, now, mtime) {
        warn!(path = %path.display(), error = %e, "failed to renew cache entry access time");
    }
}

/// §4.6 "Fetch-and-cache" — try each mirror URL in order, streaming the
/// first usable response to the client and, when appropriate, simultaneously
/// to a `.tmp` file that is atomically renamed into place on success.
pub async fn stream_and_cache(
    state: &AppState,
    urls: &[String],
    cache_path: PathBuf,
    client_headers: &http::HeaderMap,
    distro: &str,
) -> http::Response<ResponseBody> {
    let logical_name = logical_filename(
        cache_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(""),
    )
    .to_string();

    let mut should_cache = true;
    if state.blacklist.blacklist().matches(&logical_name) {
        should_cache = false;
        warn!(file = %logical_name, "blacklisted filename, response will not be cached");
        state.stats.add_log(LogLevel::Warning, format!("BLACKLISTED {logical_name}"));
    }

    let mut last_error = String::from("no mirrors configured");

    for url in urls {
        let mirror = mirror_label(url);
        let request = build_forward_request(&state.http, url, client_headers);
        let started = Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = e.to_string();
                warn!(url, error = %last_error, "upstream transport failure, trying next mirror");
                continue;
            }
        };
        state
            .metrics
            .upstream_latency
            .with_label_values(&[&mirror])
            .observe(started.elapsed().as_secs_f64());

        let status = response.status();

        if status == http::StatusCode::NOT_FOUND {
            last_error = "404 Not Found".to_string();
            continue;
        }
        if status == http::StatusCode::NOT_MODIFIED {
            state.stats.add_log(LogLevel::Success, format!("HIT (304): {logical_name}"));
            let mut resp = http::Response::builder()
                .status(http::StatusCode::NOT_MODIFIED)
                .body(empty_body())
                .expect("304 response is well-formed");
            sanitize_response_headers(&mut resp);
            return resp;
        }
        if status == http::StatusCode::PARTIAL_CONTENT {
            info!(url, "upstream returned 206, forwarding without caching");
            state.stats.add_log(LogLevel::Warning, format!("PARTIAL: {logical_name}"));
            return stream_passthrough(state, response, distro).await;
        }
        if status.is_success() {
            if should_cache {
                state.stats.add_log(LogLevel::Success, format!("CACHED {logical_name}"));
                return stream_and_commit(state, response, &cache_path, distro).await;
            }
            return stream_passthrough(state, response, distro).await;
        }
        if status.as_u16() >= 400 {
            last_error = format!("HTTP {}", status.as_u16());
            continue;
        }
    }

    error!(error = %last_error, "all mirrors exhausted, request failed");
    state.stats.add_log(LogLevel::Error, format!("FAILED {logical_name}: {last_error}"));
    http::Response::builder()
        .status(http::StatusCode::BAD_GATEWAY)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(bytes_body(
            serde_json::json!({ "error": last_error }).to_string(),
        ))
        .expect("502 response is well-formed")
}

fn build_forward_request(
    client: &reqwest::Client,
    url: &str,
    client_headers: &http::HeaderMap,
) -> reqwest::RequestBuilder {
    let mut req = client.get(url);
    for (name, value) in client_headers.iter() {
        if name == http::header::HOST {
            continue;
        }
        req = req.header(name.as_str(), value.as_bytes());
    }
    req
}

/// Best-effort `host[:port]` label for the `upstream_latency` histogram;
/// falls back to the raw URL when it doesn't parse.
fn mirror_label(url: &str) -> String {
    url.parse::<http::Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Stream an upstream response straight through to the client: used for
/// 206 partial content and for blacklisted filenames (§4.6.e, §4.6.g).
async fn stream_passthrough(
    state: &AppState,
    response: reqwest::Response,
    distro: &str,
) -> http::Response<ResponseBody> {
    let status = response.status();
    let stats = state.stats.clone();
    let metrics = state.metrics.clone();
    let distro = distro.to_string();

    let stream = futures::stream::unfold(response, move |mut resp| {
        let stats = stats.clone();
        let metrics = metrics.clone();
        let distro = distro.clone();
        async move {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    stats.counters.bytes_served.fetch_add(chunk.len() as i64, Ordering::Relaxed);
                    metrics.bytes_served_total.with_label_values(&[&distro]).inc_by(chunk.len() as u64);
                    Some((Ok(Frame::data(chunk)), resp))
                }
                Ok(None) => None,
                Err(e) => Some((Err(io::Error::other(e.to_string())), resp)),
            }
        }
    });

    let mut resp = http::Response::builder()
        .status(http::StatusCode::from_u16(status.as_u16()).unwrap_or(http::StatusCode::OK))
        .body(StreamBody::new(stream).boxed())
        .expect("streamed response is well-formed");
    sanitize_response_headers(&mut resp);
    resp
}

/// Stream an upstream 200 response to the client while simultaneously
/// writing it to `<cache_path>.tmp`; on clean completion rename into place,
/// on any error unlink the temp file (§4.6.f, §8 property 2).
async fn stream_and_commit(
    state: &AppState,
    response: reqwest::Response,
    cache_path: &Path,
    distro: &str,
) -> http::Response<ResponseBody> {
    if let Some(parent) = cache_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!(error = %e, "failed to create cache shard directory");
            return bad_gateway(&e.to_string());
        }
    }

    let tmp = tmp_path(cache_path);
    let file = match tokio::fs::File::create(&tmp).await {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, path = %tmp.display(), "failed to open cache temp file");
            return bad_gateway(&e.to_string());
        }
    };

    let stats = state.stats.clone();
    let metrics = state.metrics.clone();
    let distro = distro.to_string();
    let cache_path_owned = cache_path.to_path_buf();
    let tmp_owned = tmp.clone();

    struct TeeState {
        response: reqwest::Response,
        file: Option<tokio::fs::File>,
        tmp: PathBuf,
        final_path: PathBuf,
    }

    let tee_state = TeeState {
        response,
        file: Some(file),
        tmp: tmp_owned,
        final_path: cache_path_owned,
    };

    let stream = futures::stream::unfold(tee_state, move |mut st| {
        let stats = stats.clone();
        let metrics = metrics.clone();
        let distro = distro.clone();
        async move {
            match st.response.chunk().await {
                Ok(Some(chunk)) => {
                    if let Some(file) = st.file.as_mut() {
                        if let Err(e) = file.write_all(&chunk).await {
                            error!(error = %e, path = %st.tmp.display(), "cache write failed, aborting commit");
                            st.file = None;
                            let _ = tokio::fs::remove_file(&st.tmp).await;
                        }
                    }
                    stats.counters.bytes_served.fetch_add(chunk.len() as i64, Ordering::Relaxed);
                    metrics.bytes_served_total.with_label_values(&[&distro]).inc_by(chunk.len() as u64);
                    Some((Ok(Frame::data(chunk)), st))
                }
                Ok(None) => {
                    if let Some(mut file) = st.file.take() {
                        if let Err(e) = file.flush().await {
                            error!(error = %e, "failed to flush cache temp file");
                            let _ = tokio::fs::remove_file(&st.tmp).await;
                        } else {
                            drop(file);
                            match tokio::fs::rename(&st.tmp, &st.final_path).await {
                                Ok(()) => info!(path = %st.final_path.display(), "cached"),
                                Err(e) => {
                                    error!(error = %e, "failed to commit cache entry");
                                    let _ = tokio::fs::remove_file(&st.tmp).await;
                                }
                            }
                        }
                    }
                    None
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream aborted mid-transfer");
                    st.file = None;
                    let _ = tokio::fs::remove_file(&st.tmp).await;
                    Some((Err(io::Error::other(e.to_string())), st))
                }
            }
        }
    });

    http::Response::builder()
        .status(http::StatusCode::OK)
        .body(StreamBody::new(stream).boxed())
        .expect("streamed cache response is well-formed")
}

fn bad_gateway(message: &str) -> http::Response<ResponseBody> {
    http::Response::builder()
        .status(http::StatusCode::BAD_GATEWAY)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(bytes_body(serde_json::json!({ "error": message }).to_string()))
        .expect("502 response is well-formed")
}

/// Remove cache entries untouched for longer than `cache_days` (§4.9).
pub async fn clean_old_cache(storage_root: &Path, cache_days: u32, retention_enabled: bool) {
    if !retention_enabled {
        return;
    }
    let cutoff = Duration::from_secs(u64::from(cache_days) * 86_400);
    let now = SystemTime::now();

    for entry in walkdir::WalkDir::new(storage_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let last_touch = newest_touch(&meta);
        let age = match now.duration_since(last_touch) {
            Ok(age) => age,
            Err(_) => continue,
        };
        if age >= cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "failed to evict expired cache entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_valid_missing_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_valid(&dir.path().join("missing"), 7, true));
    }

    #[test]
    fn is_valid_fresh_file_is_true_when_retention_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();
        assert!(is_valid(&path, 7, true));
    }

    #[test]
    fn is_valid_always_true_when_retention_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(&path, old, old).unwrap();
        assert!(is_valid(&path, 0, false));
    }

    #[test]
    fn is_valid_stale_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"x").unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(&path, old, old).unwrap();
        assert!(!is_valid(&path, 1, true));
    }

    #[test]
    fn derive_cache_path_matches_core_function() {
        let root = Path::new("/storage");
        assert_eq!(
            derive_cache_path(root, "ubuntu", "pool/x.deb"),
            cache_path(root, "ubuntu", "pool/x.deb")
        );
    }

    #[tokio::test]
    async fn clean_old_cache_skips_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ubuntu")).unwrap();
        let tmp = dir.path().join("ubuntu/partial.tmp");
        std::fs::write(&tmp, b"x").unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(&tmp, old, old).unwrap();

        clean_old_cache(dir.path(), 1, true).await;
        assert!(tmp.exists(), ".tmp files must never be evicted by age sweep");
    }

    #[tokio::test]
    async fn clean_old_cache_removes_stale_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ubuntu")).unwrap();
        let stale = dir.path().join("ubuntu/stale.deb");
        let fresh = dir.path().join("ubuntu/fresh.deb");
        std::fs::write(&stale, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(&stale, old, old).unwrap();

        clean_old_cache(dir.path(), 1, true).await;
        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn clean_old_cache_noop_when_retention_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale.deb");
        std::fs::write(&stale, b"x").unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_times(&stale, old, old).unwrap();

        clean_old_cache(dir.path(), 1, false).await;
        assert!(stale.exists());
    }
}
