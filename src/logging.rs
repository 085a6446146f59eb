//! Diagnostics initialisation.
//!
//! Log output always goes to stderr. On the remote side stdout is the framed
//! console stream, and stray text there would reach the controller as console
//! output.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, LOG_ENV};

static LOG_GUARD: OnceCell<()> = OnceCell::new();

/// Errors encountered while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install log subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Install the global subscriber on first call.
///
/// `CONSOLEWIRE_LOG` overrides `config.level` when set. Later calls return
/// `Ok(())` without touching the installed subscriber.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    LOG_GUARD.get_or_try_init(|| install(config)).map(|_| ())
}

/// The filter directive in effect for `config`.
pub fn filter_directive(config: &LogConfig) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

fn install(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(filter_directive(config))
        .map_err(|e| LogError::Filter(e.to_string()))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(config.ansi && io::stderr().is_terminal())
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(LogError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: "warn".into(),
            ansi: false,
        };
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LogConfig {
            level: "consolewire=[".into(),
            ansi: false,
        };
        if std::env::var(LOG_ENV).is_err() {
            assert!(matches!(install(&config), Err(LogError::Filter(_))));
        }
    }
}
