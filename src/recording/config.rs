//! Recording configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{validate_quality, ConfigError};

/// Highest accepted recording frame rate.
const MAX_FPS: f64 = 240.0;

/// Configuration for the paced recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Target frames per second written to the file.
    pub fps: f64,
    /// Directory receiving recordings and annotation records.
    pub output_dir: PathBuf,
    /// File name prefix of recordings.
    pub prefix: String,
    /// JPEG quality of recorded frames.
    pub jpeg_quality: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            output_dir: PathBuf::from("."),
            prefix: "recording_".to_string(),
            jpeg_quality: 90,
        }
    }
}

impl RecordingConfig {
    /// Creates a configuration writing to `output_dir` at `fps`.
    pub fn new(fps: f64, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fps,
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    /// Interval between two scheduled writes.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1e-6))
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fps > 0.0 && self.fps <= MAX_FPS) {
            return Err(ConfigError::InvalidFrameRate(self.fps));
        }
        validate_quality(self.jpeg_quality)
    }
}
