use crate::handlers::{blacklist, cache, config, mirrors};
use crate::middleware::admin_auth;
use axum::extract::State;
use axum::routing::{delete, get, put};
use axum::Router;
use mirrorcache_proxy::AppState;

/// Assemble the admin/cache REST router (§6, §4.10), plus an always-on
/// `/metrics` scrape endpoint. Mounted onto the same HTTP listener as the
/// rest of the proxy (by `mirrorcache_proxy::entry::serve`) rather than
/// bound to its own port. `/api/admin/*` sits behind token auth;
/// `/api/cache/search`, `/api/cache/download`, and `/metrics` are left open.
pub fn build_admin_router(state: AppState) -> Router {
    let admin_api = Router::new()
        .route("/config", get(config::get_config).put(config::put_config))
        .route("/mirrors", get(mirrors::list_mirrors).post(mirrors::add_mirror))
        .route(
            "/mirrors/{name}",
            put(mirrors::update_mirror).delete(mirrors::delete_mirror),
        )
        .route(
            "/blacklist",
            get(blacklist::list_patterns)
                .post(blacklist::add_pattern)
                .delete(blacklist::remove_pattern),
        )
        .route("/cache", delete(cache::delete_cache_entry))
        .layer(axum::middleware::from_fn_with_state(state.clone(), admin_auth));

    let cache_api = Router::new()
        .route("/search", get(cache::search_cache))
        .route("/download", get(cache::download_cache));

    Router::new()
        .nest("/api/admin", admin_api)
        .nest("/api/cache", cache_api)
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.gather_text()
}
