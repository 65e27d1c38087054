//! Video source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Smallest accepted resize target.
const MIN_TARGET_WIDTH: u32 = 16;

/// Configuration for the upstream video source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source locator: an `http(s)://` MJPEG URL or a path to an MJPEG file.
    pub locator: String,
    /// Output width in pixels; frames are scaled keeping the aspect ratio.
    /// Zero disables resizing.
    pub width: u32,
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Connect timeout for network sources, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read timeout for network sources, in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            locator: String::new(),
            width: 960,
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
        }
    }
}

impl SourceConfig {
    /// Creates a configuration for the given locator with default settings.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Default::default()
        }
    }

    /// Returns the resize target, if resizing is enabled.
    pub fn target_width(&self) -> Option<u32> {
        (self.width > 0).then_some(self.width)
    }

    /// Returns the reconnect delay.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locator.trim().is_empty() {
            return Err(ConfigError::MissingSource);
        }
        if self.width != 0 && self.width < MIN_TARGET_WIDTH {
            return Err(ConfigError::InvalidWidth(self.width));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidReconnectDelay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_needs_locator() {
        let config = SourceConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingSource)));
        assert!(SourceConfig::new("http://cam.local/video").validate().is_ok());
    }

    #[test]
    fn test_width_zero_disables_resize() {
        let mut config = SourceConfig::new("clip.mjpeg");
        assert_eq!(config.target_width(), Some(960));

        config.width = 0;
        assert_eq!(config.target_width(), None);
        assert!(config.validate().is_ok());

        config.width = 4;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWidth(4))));
    }

    #[test]
    fn test_zero_reconnect_delay_invalid() {
        let mut config = SourceConfig::new("clip.mjpeg");
        config.reconnect_delay_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidReconnectDelay)
        ));
    }
}
