//! Video input and frame handling.
//!
//! This module owns everything between the upstream source and the
//! consumers: capture backends, the MJPEG stream reader, the single-slot
//! latest-frame buffer and the [`FrameSource`] acquisition loop.

mod backend;
mod buffer;
mod config;
mod frame;
mod mjpeg;
mod source;

pub use backend::{Capture, CaptureError, CaptureOpener, DefaultOpener, MockCapture, MockOpener};
pub use buffer::{FrameBuffer, FrameProvider};
pub use config::SourceConfig;
pub use frame::{Frame, BYTES_PER_PIXEL};
pub use mjpeg::{JpegSplitter, MjpegCapture};
pub use source::{FrameSource, SourceStatus, STOP_TIMEOUT};
