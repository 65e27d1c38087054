//! Paced recording of the latest frame into an MP4 file.

mod config;
mod mp4;
mod recorder;

pub use config::RecordingConfig;
pub use mp4::Mp4Writer;
pub use recorder::{Recorder, STOP_TIMEOUT};

use thiserror::Error;

/// Errors that can occur while recording.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("recorder already stopped; create a new one")]
    Finished,
}
