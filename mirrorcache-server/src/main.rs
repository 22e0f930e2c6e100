// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  mirrorcache — caching HTTP proxy for OS package repositories
//
//  Architecture: tokio + hyper data plane, axum admin/cache REST API
//  mounted on the same listener, sqlite-backed persistent store.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use mirrorcache_core::config::ConfigStore;
use mirrorcache_proxy::{background, entry, AppState};
use mirrorcache_store::PersistentStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mirrorcache", version, about = "mirrorcache — caching HTTP proxy for OS package repositories")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log level, overridden by RUST_LOG if set.
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    storage_path: Option<String>,

    #[arg(long)]
    database_path: Option<String>,

    #[arg(long)]
    admin_token: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigStore::load(&cli.config)?;
    apply_overrides(&config, &cli)?;

    let log_level = config.snapshot().log_level;
    mirrorcache_observability::init(&log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "mirrorcache starting");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(config))
}

/// Apply CLI flag overrides on top of the loaded config file (§10.3, last
/// in precedence). Each present flag is persisted through `ConfigStore::set`
/// exactly like an admin-triggered edit would be.
fn apply_overrides(config: &ConfigStore, cli: &Cli) -> anyhow::Result<()> {
    if let Some(host) = &cli.host {
        config.set("host", serde_json::json!(host))?;
    }
    if let Some(port) = cli.port {
        config.set("port", serde_json::json!(port))?;
    }
    if let Some(storage_path) = &cli.storage_path {
        config.set("storage_path", serde_json::json!(storage_path))?;
    }
    if let Some(database_path) = &cli.database_path {
        config.set("database_path", serde_json::json!(database_path))?;
    }
    if let Some(admin_token) = &cli.admin_token {
        config.set("admin_token", serde_json::json!(admin_token))?;
    }
    if let Some(log_level) = &cli.log_level {
        config.set("log_level", serde_json::json!(log_level))?;
    }
    Ok(())
}

async fn run(config: ConfigStore) -> anyhow::Result<()> {
    let snapshot = config.snapshot();
    info!(path = %snapshot.database_path, "opening persistent store");
    let store = Arc::new(PersistentStore::open(&snapshot.database_path).await?);

    let state = AppState::new(Arc::new(config), store).await?;

    let addr: SocketAddr = format!("{}:{}", snapshot.host, snapshot.port).parse()?;
    let admin_router = mirrorcache_admin::build_admin_router(state.clone());

    let entry_state = state.clone();
    let entry_task = tokio::spawn(async move {
        if let Err(e) = entry::serve(entry_state, addr, admin_router).await {
            error!(error = %e, "HTTP entry listener exited");
        }
    });

    let background_state = state.clone();
    let background_task = tokio::spawn(background::run(background_state));

    info!(%addr, "mirrorcache is ready");
    wait_for_shutdown().await;
    info!("shutdown signal received, stopping");

    entry_task.abort();
    background_task.abort();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
