//! Logging setup

use crate::config::LogConfig;
use crate::PhyError;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false`
/// when a subscriber was already installed, which leaves that one in place.
pub fn init(config: &LogConfig) -> Result<bool, PhyError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            PhyError::InvalidConfiguration(format!("log level '{}': {}", config.level, e))
        })?,
    };

    Ok(fmt()
        .with_env_filter(env_filter)
        .with_target(config.with_target)
        .with_thread_ids(true)
        .try_init()
        .is_ok())
}
