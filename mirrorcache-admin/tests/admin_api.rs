//! Integration tests for the Admin REST API, exercised through
//! `tower::ServiceExt::oneshot` rather than a bound TCP listener.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use mirrorcache_admin::build_admin_router;
use mirrorcache_core::config::ConfigStore;
use mirrorcache_proxy::AppState;
use mirrorcache_store::PersistentStore;
use std::sync::Arc;
use tower::ServiceExt; // .oneshot()

const TOKEN: &str = "s3cret";

async fn make_state(admin_token: &str) -> AppState {
    // Leaked so the directory outlives the `AppState`, which only stores the
    // resolved path as a `String`; each test gets its own tempdir.
    let dir = tempfile::tempdir().unwrap().into_path();

    let config = ConfigStore::load(dir.join("config.json")).unwrap();
    config.set("admin_token", serde_json::json!(admin_token)).unwrap();
    config
        .set("storage_path", serde_json::json!(dir.join("storage").to_string_lossy()))
        .unwrap();

    let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
    AppState::new(Arc::new(config), store).await.unwrap()
}

fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_req(method: Method, uri: &str, body: serde_json::Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn delete_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::DELETE).uri(uri);
    if let Some(t) = token {
        builder = builder.header("authorization", format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Auth gating (§8 "Admin auth") ───────────────────────────────

#[tokio::test]
async fn admin_route_without_token_is_unauthorized() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(get_req("/api/admin/config", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_route_with_wrong_token_is_unauthorized() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(get_req("/api/admin/config", Some("wrong"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_route_with_correct_token_succeeds() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(get_req("/api/admin/config", Some(TOKEN))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn empty_admin_token_disables_auth() {
    let app = build_admin_router(make_state("").await);
    let resp = app.oneshot(get_req("/api/admin/config", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn cache_search_is_unauthenticated() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(get_req("/api/cache/search?q=foo", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn cache_download_is_unauthenticated_but_rejects_traversal() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app
        .oneshot(get_req("/api/cache/download?path=../../etc/passwd", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Config ───────────────────────────────────────────────────────

#[tokio::test]
async fn put_config_updates_cache_days() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app
        .oneshot(json_req(
            Method::PUT,
            "/api/admin/config",
            serde_json::json!({ "cache_days": 14 }),
            Some(TOKEN),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(get_req("/api/admin/config", Some(TOKEN))).await.unwrap();
    let j = body_json(resp).await;
    assert!(j.get("cache_days").is_some());
}

#[tokio::test]
async fn put_config_rejects_zero_cache_days() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app
        .oneshot(json_req(
            Method::PUT,
            "/api/admin/config",
            serde_json::json!({ "cache_days": 0 }),
            Some(TOKEN),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Mirrors (§8 concrete scenario) ───────────────────────────────

#[tokio::test]
async fn delete_mirror_without_token_is_unauthorized_and_has_no_side_effects() {
    let state = make_state(TOKEN).await;
    state
        .mirrors
        .save("ubuntu", vec!["http://127.0.0.1:1/repo".into()], mirrorcache_core::MirrorStatus::Approved)
        .await
        .ok();

    let app = build_admin_router(state.clone());
    let resp = app.oneshot(delete_req("/api/admin/mirrors/ubuntu", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_mirror_with_token_removes_it_from_memory_and_store() {
    let state = make_state(TOKEN).await;
    // `save` performs a real reachability check; insert directly to avoid
    // depending on network access in this test.
    state
        .store
        .upsert_mirror(&mirrorcache_core::Mirror::new(
            "ubuntu",
            vec!["http://127.0.0.1:1/repo".into()],
            mirrorcache_core::MirrorStatus::Approved,
        ))
        .await
        .unwrap();
    state.mirrors.load_from_store().await.unwrap();
    assert!(state.mirrors.get("ubuntu").is_some());

    let app = build_admin_router(state.clone());
    let resp = app.oneshot(delete_req("/api/admin/mirrors/ubuntu", Some(TOKEN))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(state.mirrors.get("ubuntu").is_none());
}

#[tokio::test]
async fn delete_unknown_mirror_returns_404() {
    let app = build_admin_router(make_state(TOKEN).await);
    let resp = app.oneshot(delete_req("/api/admin/mirrors/nope", Some(TOKEN))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Blacklist ─────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_list_blacklist_pattern() {
    let state = make_state(TOKEN).await;
    let app = build_admin_router(state.clone());
    let resp = app
        .oneshot(json_req(
            Method::POST,
            "/api/admin/blacklist",
            serde_json::json!({ "pattern": "*.deb" }),
            Some(TOKEN),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = build_admin_router(state);
    let resp = app.oneshot(get_req("/api/admin/blacklist", Some(TOKEN))).await.unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["patterns"], serde_json::json!(["*.deb"]));
}
