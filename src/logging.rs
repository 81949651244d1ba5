//! Tracing subscriber setup for binaries and tests embedding the cache

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `fmt` subscriber filtered by `RUST_LOG`
///
/// Falls back to `default_directive` (e.g. `"pagequery=info"`) when
/// `RUST_LOG` is unset or empty. Returns `false` if a global subscriber was
/// already installed, so calling this from several tests is harmless.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_directive.to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
