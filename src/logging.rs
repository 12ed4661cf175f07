use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const DEFAULT_FILTER: &str = "info";

fn env_filter(raw: Option<&str>) -> EnvFilter {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global structured logger. `RUST_LOG` overrides the
/// default `info` filter; an unparsable value falls back to it.
pub(crate) fn init() {
    let raw = std::env::var("RUST_LOG").ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter(raw.as_deref()))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // already set in tests
}
