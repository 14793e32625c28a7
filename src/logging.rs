//! Logging bootstrap for the `gigchat` binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,gigchat=info,gigmarket_client=info";

/// Install the global subscriber. Library `log` records are bridged into it.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `GIGCHAT_LOG`
/// 3) internal default filter
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter_from_env())
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    if let Some(value) = env::var("GIGCHAT_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    EnvFilter::new(DEFAULT_FILTER)
}
