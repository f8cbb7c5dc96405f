//! Tracing subscriber set-up for binaries embedding the core.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let (filter, handle) = reload::Layer::new(base_filter(&config.level));
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
}

/// Applies a new filter directive at runtime.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = EnvFilter::new(level));
    }
}

fn base_filter(level: &str) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&LoggingConfig {
            json: true,
            ..config
        });
        apply_logging_level("debug");
        tracing::debug!("subscriber installed");
    }
}
