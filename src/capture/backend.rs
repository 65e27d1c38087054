//! Capture backend abstraction.
//!
//! A [`CaptureOpener`] turns a source locator into an open [`Capture`]
//! handle. The acquisition loop only ever talks to these two traits, which
//! lets tests script connection failures and frame timing.

use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::frame::BYTES_PER_PIXEL;
use super::mjpeg::MjpegCapture;
use super::{Frame, SourceConfig};

/// Errors that can occur while talking to the video source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unsupported source locator: {0}")]
    Unsupported(String),
    #[error("failed to open source: {0}")]
    OpenFailed(String),
    #[error("failed to read frame: {0}")]
    ReadFailed(String),
    #[error("corrupt frame: {0}")]
    Corrupt(String),
    #[error("source ended")]
    EndOfStream,
}

/// An open connection to a video source.
pub trait Capture: Send {
    /// Blocks until the next frame is decoded.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Releases the underlying connection or device.
    fn close(&mut self);
}

/// Opens capture handles for a locator.
pub trait CaptureOpener: Send + Sync {
    /// Attempts to connect to the source.
    fn open(&self, locator: &str) -> Result<Box<dyn Capture>, CaptureError>;
}

/// Opener for real sources.
///
/// `http://` and `https://` locators are read as MJPEG streams over HTTP;
/// any other locator without a URL scheme is a path to an MJPEG file.
#[derive(Debug, Clone)]
pub struct DefaultOpener {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl DefaultOpener {
    /// Creates an opener using the timeouts from `config`.
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }

    fn open_http(&self, url: &str) -> Result<Box<dyn Capture>, CaptureError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.connect_timeout)
            .timeout_read(self.read_timeout)
            .build();
        let response = agent
            .get(url)
            .call()
            .map_err(|e| CaptureError::OpenFailed(e.to_string()))?;

        tracing::debug!(
            url,
            content_type = response.content_type(),
            "Connected to HTTP source"
        );
        Ok(Box::new(MjpegCapture::new(response.into_reader())))
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn Capture>, CaptureError> {
        let file = File::open(path).map_err(|e| CaptureError::OpenFailed(format!("{path}: {e}")))?;
        Ok(Box::new(MjpegCapture::new(BufReader::new(file))))
    }
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self::new(&SourceConfig::default())
    }
}

impl CaptureOpener for DefaultOpener {
    fn open(&self, locator: &str) -> Result<Box<dyn Capture>, CaptureError> {
        match locator.split_once("://") {
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
                self.open_http(locator)
            }
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("file") => {
                self.open_file(&locator[scheme.len() + 3..])
            }
            Some((scheme, _)) => Err(CaptureError::Unsupported(format!(
                "{scheme}:// sources need an MJPEG gateway (got {locator})"
            ))),
            None => self.open_file(locator),
        }
    }
}

/// Synthetic source for tests and demos.
///
/// Produces solid RGB frames whose byte value follows the sequence number.
/// Opening fails until `available_after` has elapsed since the opener was
/// created, which models a camera that comes online late.
#[derive(Debug, Clone)]
pub struct MockOpener {
    width: u32,
    height: u32,
    frame_interval: Duration,
    created: Instant,
    available_after: Duration,
}

impl MockOpener {
    /// Creates an opener producing `width` x `height` frames at ~30 fps.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_millis(33),
            created: Instant::now(),
            available_after: Duration::ZERO,
        }
    }

    /// Sets the delay between frames.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Makes `open` fail until `delay` has passed.
    pub fn available_after(mut self, delay: Duration) -> Self {
        self.available_after = delay;
        self
    }
}

impl CaptureOpener for MockOpener {
    fn open(&self, locator: &str) -> Result<Box<dyn Capture>, CaptureError> {
        if self.created.elapsed() < self.available_after {
            return Err(CaptureError::OpenFailed(format!("{locator}: not available yet")));
        }
        tracing::info!(locator, width = self.width, height = self.height, "MockCapture opened");
        Ok(Box::new(MockCapture {
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            sequence: 0,
        }))
    }
}

/// Capture handle produced by [`MockOpener`].
#[derive(Debug)]
pub struct MockCapture {
    width: u32,
    height: u32,
    frame_interval: Duration,
    sequence: u64,
}

impl Capture for MockCapture {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        self.sequence += 1;
        let len = self.width as usize * self.height as usize * BYTES_PER_PIXEL;
        let pixels = vec![(self.sequence % 256) as u8; len];
        Ok(Frame::new(pixels, self.width, self.height, self.sequence))
    }

    fn close(&mut self) {
        tracing::info!("MockCapture closed");
    }
}
