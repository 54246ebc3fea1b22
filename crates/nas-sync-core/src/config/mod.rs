//! Configuration management for nas-sync.
//!
//! This module handles loading, saving, and managing nas-sync configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/nas-sync/config.toml` |
//! | macOS | `~/Library/Application Support/com.nas-sync.NasSync/config.toml` |
//! | Windows | `%APPDATA%\nas-sync\NasSync\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use nas_sync_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Chunk size: {}", config.client.chunk_size);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for nas-sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client (uploader) settings
    pub client: ClientConfig,
    /// Server (remote assembler) settings
    pub server: ServerConfig,
}

/// Client configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the proxy function, scoped to one service
    pub endpoint: Option<String>,
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Number of concurrent chunk uploads and unzip batches
    pub parallel_uploads: usize,
    /// Number of archive entries per unzip request
    pub unzip_batch_size: usize,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Directory for the local archive workspace (system temp dir if unset)
    pub local_temp_dir: Option<PathBuf>,
    /// Overwrite existing files when extracting
    pub overwrite: bool,
    /// Compare protocol versions before syncing
    pub check_version: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            parallel_uploads: crate::DEFAULT_PARALLEL_UPLOADS,
            unzip_batch_size: crate::DEFAULT_UNZIP_BATCH_SIZE,
            request_timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
            local_temp_dir: None,
            overwrite: true,
            check_version: true,
        }
    }
}

impl ClientConfig {
    /// Check the values that would make a sync impossible.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(invalid("client.chunk_size", "must be greater than zero"));
        }
        if self.parallel_uploads == 0 {
            return Err(invalid(
                "client.parallel_uploads",
                "must be greater than zero",
            ));
        }
        if self.unzip_batch_size == 0 {
            return Err(invalid(
                "client.unzip_batch_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// How the server extracts archive entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractBackend {
    /// Spawn the system `unzip` program
    #[default]
    Unzip,
    /// Extract in-process with the `zip` crate
    Builtin,
}

/// Server configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Directory holding per-digest sessions
    pub temp_root: PathBuf,
    /// Largest accepted chunk body in bytes
    pub max_chunk_bytes: usize,
    /// Largest accepted rendered extraction command in bytes
    pub max_command_bytes: usize,
    /// Extraction backend
    pub extract_backend: ExtractBackend,
    /// Sessions untouched for longer than this are removed
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: crate::DEFAULT_BIND_ADDR.to_string(),
            temp_root: std::env::temp_dir().join(crate::TEMP_DIR_NAME),
            max_chunk_bytes: crate::DEFAULT_MAX_CHUNK_BYTES,
            max_command_bytes: crate::DEFAULT_MAX_COMMAND_BYTES,
            extract_backend: ExtractBackend::default(),
            session_ttl: Duration::from_secs(crate::DEFAULT_SESSION_TTL_SECS),
        }
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "nas-sync", "NasSync")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{s}'"))?;
        let multiplier = match unit {
            "s" | "" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => return Err(format!("invalid duration unit in '{s}'")),
        };
        Ok(Duration::from_secs(value * multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.client.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.client.parallel_uploads, 4);
        assert_eq!(config.client.unzip_batch_size, 500);
        assert_eq!(config.client.request_timeout, Duration::from_secs(600));
        assert!(config.client.overwrite);
        assert_eq!(config.server.extract_backend, ExtractBackend::Unzip);
        assert!(config.server.temp_root.ends_with(crate::TEMP_DIR_NAME));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.client.endpoint = Some("https://proxy.example.com/svc".to_string());
        original.client.chunk_size = 1024 * 1024;
        original.server.extract_backend = ExtractBackend::Builtin;
        original.server.session_ttl = Duration::from_secs(3600);

        original.save_to(&config_path).expect("save");
        let loaded = Config::load_from(&config_path).expect("load");

        assert_eq!(
            loaded.client.endpoint.as_deref(),
            Some("https://proxy.example.com/svc")
        );
        assert_eq!(loaded.client.chunk_size, 1024 * 1024);
        assert_eq!(loaded.server.extract_backend, ExtractBackend::Builtin);
        assert_eq!(loaded.server.session_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.client.parallel_uploads, crate::DEFAULT_PARALLEL_UPLOADS);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [client]
            parallel_uploads = 8
            request_timeout = "10m"

            [server]
            session_ttl = "2d"
            extract_backend = "builtin"
            "#,
        )
        .expect("parse");

        assert_eq!(config.client.parallel_uploads, 8);
        assert_eq!(config.client.request_timeout, Duration::from_secs(600));
        assert_eq!(config.client.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.server.session_ttl, Duration::from_secs(2 * 86_400));
        assert_eq!(config.server.extract_backend, ExtractBackend::Builtin);
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(humantime_serde::parse("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(humantime_serde::parse("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(humantime_serde::parse("45"), Ok(Duration::from_secs(45)));
        assert!(humantime_serde::parse("soon").is_err());
        assert!(humantime_serde::parse("5w").is_err());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut client = ClientConfig::default();
        assert!(client.validate().is_ok());

        client.chunk_size = 0;
        let err = client.validate().expect_err("zero chunk size");
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "client.chunk_size"));
    }
}
