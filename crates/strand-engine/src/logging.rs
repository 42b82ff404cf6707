//! Tracing subscriber setup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Overrides `LoggingConfig::filter` when set.
pub const LOG_ENV: &str = "STRAND_LOG";
pub const LOG_FILE_PREFIX: &str = "strand.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `warn` or `strand_engine=debug`.
    pub filter: String,
    /// Write daily-rotated files here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> Result<EnvFilter> {
        let directive = std::env::var(LOG_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.filter.clone());
        EnvFilter::try_new(&directive)
            .with_context(|| format!("Invalid log filter '{directive}'"))
    }
}

/// Installs the global subscriber.
///
/// Returns the appender guard when logging to a file; keep it alive for as
/// long as logs should flush. A second call is a no-op returning `None`.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create log directory {}", directory.display())
            })?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = builder
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .is_ok();
            Ok(installed.then_some(guard))
        }
        None => {
            // Already installed elsewhere (tests, host app): keep theirs.
            let _ = builder.with_writer(std::io::stderr).try_init();
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LoggingConfig {
            filter: "strand_engine=loud".to_string(),
            directory: None,
        };
        if std::env::var(LOG_ENV).is_err() {
            assert!(config.env_filter().is_err());
        }
    }

    #[test]
    fn test_init_writes_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            filter: "debug".to_string(),
            directory: Some(dir.path().join("logs")),
        };
        // Another test may have installed a subscriber first; either way
        // the directory is prepared and the call succeeds.
        let _guard = init(&config).unwrap();
        assert!(dir.path().join("logs").is_dir());
        assert!(init(&config).unwrap().is_none());
    }
}
