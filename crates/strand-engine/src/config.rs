//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an absent file or a
//! partial file both work.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use strand_providers::transport::DEFAULT_BODY_PREVIEW_LIMIT;
use strand_providers::{BearerAuth, EventStreamClient, TransportOptions};

use crate::logging::LoggingConfig;
use crate::pipeline::PipelineOptions;

pub const BASE_URL_ENV: &str = "STRAND_BASE_URL";
pub const API_KEY_ENV: &str = "STRAND_API_KEY";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Snapshot spacing in milliseconds. 0 emits on every event.
    pub emit_interval_ms: u64,
    pub body_preview_limit: usize,
    /// 0 disables the request timeout.
    pub request_timeout_secs: u64,
    /// 0 disables the per-call tool timeout.
    pub tool_timeout_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            emit_interval_ms: 100,
            body_preview_limit: DEFAULT_BODY_PREVIEW_LIMIT,
            request_timeout_secs: 0,
            tool_timeout_secs: 120,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolves the base URL with precedence: env > config > default.
    pub fn base_url(&self) -> Result<String> {
        self.base_url_with(std::env::var(BASE_URL_ENV).ok().as_deref())
    }

    fn base_url_with(&self, env_url: Option<&str>) -> Result<String> {
        let candidates = [
            (env_url, BASE_URL_ENV),
            (self.base_url.as_deref(), "base_url"),
        ];
        for (value, source) in candidates {
            if let Some(url) = value.map(str::trim).filter(|url| !url.is_empty()) {
                validate_url(url, source)?;
                return Ok(url.to_string());
            }
        }
        Ok(DEFAULT_BASE_URL.to_string())
    }

    /// Resolves the API key with precedence: config > env.
    ///
    /// `None` means the backend is used without authentication.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with(std::env::var(API_KEY_ENV).ok().as_deref())
    }

    fn api_key_with(&self, env_key: Option<&str>) -> Option<String> {
        [self.api_key.as_deref(), env_key]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|key| !key.is_empty())
            .map(str::to_string)
    }

    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.tool_timeout_secs))
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            emit_interval: self.emit_interval(),
        }
    }

    pub fn transport_options(&self) -> Result<TransportOptions> {
        let base_url = self.base_url()?;
        let mut options = TransportOptions::new(&base_url)
            .with_context(|| format!("Invalid base URL '{base_url}'"))?;
        options.body_preview_limit = self.body_preview_limit;
        options.request_timeout = self.request_timeout();
        Ok(options)
    }

    /// Builds a client, attaching bearer auth when a key is configured.
    pub fn client(&self) -> Result<EventStreamClient> {
        let client = EventStreamClient::new(self.transport_options()?)
            .context("Failed to build HTTP client")?;
        Ok(match self.api_key() {
            Some(key) => client.with_auth(Arc::new(BearerAuth::new(key))),
            None => client,
        })
    }
}

fn validate_url(url: &str, source: &str) -> Result<()> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => bail!(
            "Invalid {source} '{url}': unsupported scheme '{}'",
            parsed.scheme()
        ),
        Err(e) => bail!("Invalid {source} '{url}': {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.emit_interval(), Duration::from_millis(100));
        assert_eq!(config.tool_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
emit_interval_ms = 0
tool_timeout_secs = 0

[logging]
filter = "strand_engine=debug"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.pipeline_options().emit_interval, Duration::ZERO);
        assert_eq!(config.tool_timeout(), None);
        assert_eq!(config.body_preview_limit, DEFAULT_BODY_PREVIEW_LIMIT);
        assert_eq!(config.logging.filter, "strand_engine=debug");
    }

    #[test]
    fn test_malformed_file_names_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "emit_interval_ms = \"soon\"").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config"));
    }

    #[test]
    fn test_base_url_precedence() {
        let config = Config {
            base_url: Some("https://config.example".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.base_url_with(Some(" https://env.example ")).unwrap(),
            "https://env.example"
        );
        assert_eq!(config.base_url_with(Some("")).unwrap(), "https://config.example");
        assert_eq!(
            Config::default().base_url_with(None).unwrap(),
            DEFAULT_BASE_URL
        );
        assert!(config.base_url_with(Some("ftp://env.example")).is_err());
    }

    #[test]
    fn test_api_key_precedence() {
        let config = Config {
            api_key: Some("from-config".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.api_key_with(Some("from-env")).as_deref(),
            Some("from-config")
        );
        assert_eq!(
            Config::default().api_key_with(Some("from-env")).as_deref(),
            Some("from-env")
        );
        assert_eq!(Config::default().api_key_with(Some("  ")), None);
    }

    #[test]
    fn test_transport_options_carry_limits() {
        let config = Config {
            base_url: Some("http://localhost:9000/v1".to_string()),
            body_preview_limit: 128,
            request_timeout_secs: 30,
            ..Config::default()
        };
        let options = config.transport_options().unwrap();
        assert_eq!(options.body_preview_limit, 128);
        assert_eq!(options.request_timeout, Some(Duration::from_secs(30)));
    }
}
