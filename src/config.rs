//! Application configuration.
//!
//! Settings come from an optional TOML file; every table and field has a
//! default, and command-line flags are applied on top by the binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::SourceConfig;
use crate::recording::RecordingConfig;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("no video source configured")]
    MissingSource,
    #[error("invalid output width {0} (0 disables resizing, otherwise at least 16)")]
    InvalidWidth(u32),
    #[error("reconnect delay must be positive")]
    InvalidReconnectDelay,
    #[error("invalid frame rate {0} (must be in (0, 240])")]
    InvalidFrameRate(f64),
    #[error("invalid JPEG quality {0} (must be 1-100)")]
    InvalidQuality(u8),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Validates a JPEG quality setting.
pub(crate) fn validate_quality(quality: u8) -> Result<(), ConfigError> {
    if quality == 0 || quality > 100 {
        return Err(ConfigError::InvalidQuality(quality));
    }
    Ok(())
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: IpAddr,
    /// Port to bind.
    pub port: u16,
    /// JPEG quality of `/snap.jpg`.
    pub snapshot_quality: u8,
    /// JPEG quality of the parts of `/stream.mjpg`.
    pub stream_quality: u8,
    /// Delay between stream parts, in milliseconds.
    pub stream_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5000,
            snapshot_quality: 85,
            stream_quality: 80,
            stream_interval_ms: 40,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_quality(self.snapshot_quality)?;
        validate_quality(self.stream_quality)
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// `[source]` table.
    #[serde(default)]
    pub source: SourceConfig,
    /// `[recording]` table.
    #[serde(default)]
    pub recording: RecordingConfig,
    /// `[server]` table.
    #[serde(default)]
    pub server: ServerConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    ///
    /// The file is only parsed here; call [`FileConfig::validate`] once
    /// command-line overrides have been applied.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.recording.validate()?;
        self.server.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = FileConfig::from_toml("").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.source.width, 960);
        assert_eq!(config.recording.fps, 25.0);
        // No source yet.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_tables() {
        let config = FileConfig::from_toml(
            r#"
            [source]
            locator = "http://192.168.0.12:8080/video"
            width = 0

            [recording]
            fps = 10.0

            [server]
            host = "0.0.0.0"
            port = 8080
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.source.target_width(), None);
        assert_eq!(config.source.reconnect_delay_ms, 1000);
        assert_eq!(config.recording.fps, 10.0);
        assert_eq!(config.server.bind_addr().port(), 8080);
        assert!(config.server.bind_addr().ip().is_unspecified());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            FileConfig::from_toml("[server]\nport = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = ServerConfig::default();
        config.stream_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidQuality(0))
        ));
    }
}
