//! Tracing subscriber setup.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global subscriber filtered by `RUST_LOG`, or `default_directive` if unset.
///
/// Safe to call more than once; later calls return an error and leave the
/// first subscriber in place.
///
/// # Errors
/// Returns `TryInitError` if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer())
        .try_init()
}

/// Like [`init_tracing`], with one JSON object per event.
///
/// # Errors
/// Returns `TryInitError` if a global subscriber is already installed.
pub fn init_json_tracing(default_directive: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().json())
        .try_init()
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _ = init_tracing("switchboard_orchestrator=debug,info");
        assert!(init_tracing("info").is_err());
        assert!(init_json_tracing("info").is_err());
    }
}
