use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

/// Handle returned by `init` — lets the admin `/reload` route apply a new
/// `log_level` without restarting the process.
pub type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize the global tracing subscriber. `RUST_LOG` takes precedence
/// over `default_level` when set (§10.2).
pub fn init(default_level: &str) -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    handle
}

/// Apply a new level string to an already-initialized subscriber.
pub fn set_level(handle: &FilterHandle, level: &str) -> Result<(), anyhow::Error> {
    handle.reload(EnvFilter::new(level))?;
    Ok(())
}
