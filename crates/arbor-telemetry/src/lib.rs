//! Logging and metrics for the bridge.
//!
//! Stdout belongs to the assistant's JSON-RPC stream, so every log line is
//! pinned to stderr. Metrics are in-memory counters behind an accessor; no
//! module-level mutable state.

mod metrics;

pub use metrics::{BridgeMetrics, MetricsSnapshot};

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. Call once at startup.
///
/// `RUST_LOG` overrides the default filter; `debug` raises the default
/// from `info` to `debug`.
pub fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
