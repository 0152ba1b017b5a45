//! Tracing subscriber setup
//!
//! The engine only emits `tracing` events; hosts decide whether to install a
//! subscriber. `RUST_LOG` overrides the configured filter.

use crate::config::TelemetryConfig;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber
///
/// Returns `false` if a subscriber was already installed, which makes the
/// call safe to repeat from tests.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}
