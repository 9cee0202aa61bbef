use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set and valid; otherwise `level` is used, which is
/// normally `AppConfig::log_level`. An unparsable `level` falls back to `info`.
pub fn init_tracing(level: &str) {
    fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .init();
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
