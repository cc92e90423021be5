//! Configuration file loading
//!
//! The cache manager is configured from a TOML file. Only `origin` is required;
//! everything else has a default matching the conventions the host application
//! follows (`/api/` marker, `/` as offline document, `retry-requests` sync tag).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::version::VersionToken;

/// Default substring marking API requests
pub const DEFAULT_API_MARKER: &str = "/api/";

/// Default path served when a navigation fails offline
pub const DEFAULT_OFFLINE_DOCUMENT: &str = "/";

/// Default sync tag that triggers a retry-queue replay
pub const DEFAULT_SYNC_TAG: &str = "retry-requests";

/// Default number of failed requests kept for replay
pub const DEFAULT_RETRY_CAPACITY: usize = 50;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    /// The file is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The origin is not an http(s) base URL
    #[error("Origin must be an http or https URL, got '{0}'")]
    InvalidOrigin(String),

    /// No version token was configured
    #[error("api_fallback_max_age_hours is out of range: {0}")]
    InvalidFallbackAge(u64),

    #[error("No version token configured: set `version` in the config file or CACHEWARDEN_VERSION")]
    MissingVersion,
}

/// Cache manager configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL relative request paths resolve against
    pub origin: Url,
    /// Version token of the build being served
    #[serde(default)]
    pub version: Option<VersionToken>,
    /// Paths pre-cached in full during install, in order
    #[serde(default)]
    pub manifest: Vec<String>,
    /// Substring that marks a request path as an API call
    #[serde(default = "default_api_marker")]
    pub api_marker: String,
    /// Path of the document served when a navigation fails offline
    #[serde(default = "default_offline_document")]
    pub offline_document: String,
    /// Override for the disk store directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Maximum age of an API entry served as offline fallback; unset keeps entries until the next deploy
    #[serde(default)]
    pub api_fallback_max_age_hours: Option<u64>,
    /// Maximum number of failed mutating requests kept for replay
    #[serde(default = "default_retry_capacity")]
    pub retry_queue_capacity: usize,
    /// Sync tag that triggers a replay of the retry queue
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,
    /// Transport timeout for network requests
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn fallback_age(hours: u64) -> Option<chrono::Duration> {
    i64::try_from(hours).ok().and_then(chrono::Duration::try_hours)
}

fn default_api_marker() -> String {
    DEFAULT_API_MARKER.to_string()
}

fn default_offline_document() -> String {
    DEFAULT_OFFLINE_DOCUMENT.to_string()
}

fn default_sync_tag() -> String {
    DEFAULT_SYNC_TAG.to_string()
}

fn default_retry_capacity() -> usize {
    DEFAULT_RETRY_CAPACITY
}

impl Config {
    /// Creates a configuration with defaults for everything but the origin
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            version: None,
            manifest: Vec::new(),
            api_marker: default_api_marker(),
            offline_document: default_offline_document(),
            cache_dir: None,
            api_fallback_max_age_hours: None,
            retry_queue_capacity: DEFAULT_RETRY_CAPACITY,
            sync_tag: default_sync_tag(),
            request_timeout_secs: None,
        }
    }

    /// Sets the pre-cache manifest
    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Loads and validates a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(path.to_path_buf(), err))?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates TOML config content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.cannot_be_a_base() {
            return Err(ConfigError::InvalidOrigin(self.origin.to_string()));
        }
        if let Some(hours) = self.api_fallback_max_age_hours {
            if fallback_age(hours).is_none() {
                return Err(ConfigError::InvalidFallbackAge(hours));
            }
        }
        Ok(())
    }

    /// Picks the version token, preferring an explicit override
    pub fn version_token(&self, override_token: Option<VersionToken>) -> Result<VersionToken, ConfigError> {
        override_token
            .or_else(|| self.version.clone())
            .ok_or(ConfigError::MissingVersion)
    }

    /// Maximum age of API fallback entries, if limited
    pub fn api_fallback_max_age(&self) -> Option<chrono::Duration> {
        self.api_fallback_max_age_hours.and_then(fallback_age)
    }

    /// Transport timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str(r#"origin = "https://app.example.com""#).unwrap();

        assert_eq!(config.origin.as_str(), "https://app.example.com/");
        assert_eq!(config.api_marker, "/api/");
        assert_eq!(config.offline_document, "/");
        assert_eq!(config.sync_tag, "retry-requests");
        assert_eq!(config.retry_queue_capacity, 50);
        assert!(config.manifest.is_empty());
        assert!(config.version.is_none());
        assert!(config.api_fallback_max_age().is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_toml_str(
            r#"
            origin = "https://app.example.com"
            version = "1.0.1-1699999999"
            manifest = ["/", "/index.html", "/app.js"]
            api_marker = "/svc/"
            offline_document = "/index.html"
            api_fallback_max_age_hours = 12
            retry_queue_capacity = 5
            sync_tag = "outbox"
            request_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.version.as_ref().unwrap().as_str(), "1.0.1-1699999999");
        assert_eq!(config.manifest, vec!["/", "/index.html", "/app.js"]);
        assert_eq!(config.api_marker, "/svc/");
        assert_eq!(config.api_fallback_max_age(), Some(chrono::Duration::hours(12)));
        assert_eq!(config.retry_queue_capacity, 5);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rejects_non_http_origin() {
        let result = Config::from_toml_str(r#"origin = "file:///tmp/app""#);
        assert!(matches!(result, Err(ConfigError::InvalidOrigin(_))));
    }

    #[test]
    fn test_rejects_invalid_version_token() {
        let result = Config::from_toml_str(
            r#"
            origin = "https://app.example.com"
            version = "1.0 beta"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_out_of_range_fallback_age() {
        let result = Config::from_toml_str(
            r#"
            origin = "https://app.example.com"
            api_fallback_max_age_hours = 10000000000000000
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidFallbackAge(10000000000000000))
        ));

        let mut config = Config::new(Url::parse("https://app.example.com").unwrap());
        config.api_fallback_max_age_hours = Some(u64::MAX);
        assert!(config.api_fallback_max_age().is_none());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFallbackAge(u64::MAX))
        ));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result = Config::from_toml_str(
            r#"
            origin = "https://app.example.com"
            verison = "1"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_version_override_wins() {
        let mut config = Config::new(Url::parse("https://app.example.com").unwrap());
        config.version = Some(VersionToken::parse("1").unwrap());

        let token = config
            .version_token(Some(VersionToken::parse("2").unwrap()))
            .unwrap();
        assert_eq!(token.as_str(), "2");

        assert_eq!(config.version_token(None).unwrap().as_str(), "1");
    }

    #[test]
    fn test_missing_version_is_an_error() {
        let config = Config::new(Url::parse("https://app.example.com").unwrap());
        assert!(matches!(config.version_token(None), Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"origin = "http://localhost:8080""#).unwrap();
        writeln!(file, r#"manifest = ["/"]"#).unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.origin.as_str(), "http://localhost:8080/");
        assert_eq!(config.manifest, vec!["/"]);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let result = Config::load(Path::new("/nonexistent/cachewarden.toml"));
        assert!(matches!(result, Err(ConfigError::Read(_, _))));
    }
}
