//! Frame source with a self-healing acquisition loop.
//!
//! The loop owns the connection to the upstream source. Any open or read
//! failure drops the connection, waits out the reconnect delay and starts
//! over with a fresh connection, so a dead source never wedges consumers:
//! they keep seeing the last good frame until a new one is published.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::backend::{Capture, CaptureOpener, DefaultOpener};
use super::buffer::{FrameBuffer, FrameProvider};
use super::{Frame, SourceConfig};
use crate::worker::{StopSignal, Worker};

/// How long `stop` waits for the acquisition loop to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `stop` waits for a busy capture handle before giving up on it.
const RELEASE_WAIT: Duration = Duration::from_millis(100);

/// Coarse connectivity status of a [`FrameSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Acquisition is not running.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// The last attempt opened the source and frames are flowing.
    Streaming,
    /// The last open or read failed; a reconnect is pending.
    Error,
}

impl SourceStatus {
    /// Returns the lowercase status name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }

    /// Numeric code used for the status gauge.
    pub fn code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Streaming => 2,
            Self::Error => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Connecting,
            2 => Self::Streaming,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and status shared between the loop and readers.
#[derive(Debug, Default)]
struct SourceState {
    status: AtomicU8,
    frames_acquired: AtomicU64,
    failures: AtomicU64,
}

impl SourceState {
    fn status(&self) -> SourceStatus {
        SourceStatus::from_code(self.status.load(Ordering::Acquire))
    }

    /// Stores `status` and returns the previous value.
    fn set_status(&self, status: SourceStatus) -> SourceStatus {
        SourceStatus::from_code(self.status.swap(status.code(), Ordering::AcqRel))
    }
}

type CaptureSlot = Arc<Mutex<Option<Box<dyn Capture>>>>;

/// Owner of the upstream connection and the latest-frame buffer.
pub struct FrameSource {
    config: SourceConfig,
    opener: Arc<dyn CaptureOpener>,
    buffer: Arc<FrameBuffer>,
    state: Arc<SourceState>,
    capture: CaptureSlot,
    worker: Mutex<Option<Worker>>,
}

impl FrameSource {
    /// Creates a source for `config.locator` using the default backends.
    pub fn new(config: SourceConfig) -> Self {
        let opener = Arc::new(DefaultOpener::new(&config));
        Self::with_opener(config, opener)
    }

    /// Creates a source that connects through a custom opener.
    pub fn with_opener(config: SourceConfig, opener: Arc<dyn CaptureOpener>) -> Self {
        Self {
            config,
            opener,
            buffer: Arc::new(FrameBuffer::new()),
            state: Arc::new(SourceState::default()),
            capture: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Returns the source locator.
    pub fn locator(&self) -> &str {
        &self.config.locator
    }

    /// Starts the acquisition loop. No-op while it is already running.
    ///
    /// Failures, including a failure to spawn the thread, only show up in
    /// [`FrameSource::status`].
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let acquirer = Acquirer {
            locator: self.config.locator.clone(),
            target_width: self.config.target_width(),
            reconnect_delay: self.config.reconnect_delay(),
            opener: Arc::clone(&self.opener),
            buffer: Arc::clone(&self.buffer),
            state: Arc::clone(&self.state),
            capture: Arc::clone(&self.capture),
        };

        match Worker::spawn("frame-source", move |signal| acquirer.run(signal)) {
            Ok(spawned) => {
                *worker = Some(spawned);
                tracing::info!(
                    source = %self.config.locator,
                    width = ?self.config.target_width(),
                    "Frame source started"
                );
            }
            Err(e) => {
                self.state.set_status(SourceStatus::Error);
                tracing::error!(error = %e, "Failed to spawn acquisition thread");
            }
        }
    }

    /// Stops the acquisition loop and releases the capture handle.
    ///
    /// Waits at most [`STOP_TIMEOUT`] for the loop. The handle is released
    /// even if the loop did not acknowledge in time, unless it is still in
    /// use by a blocking read, in which case the loop closes it once the
    /// read returns. Safe to call repeatedly and before [`FrameSource::start`].
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop(STOP_TIMEOUT);
        }

        match self.capture.try_lock_for(RELEASE_WAIT) {
            Some(mut slot) => {
                if let Some(mut capture) = slot.take() {
                    capture.close();
                    tracing::info!(source = %self.config.locator, "Capture handle released");
                }
            }
            None => {
                tracing::warn!(
                    source = %self.config.locator,
                    "Capture handle busy in a blocking read, leaving it to the loop"
                );
            }
        }

        self.state.set_status(SourceStatus::Idle);
    }

    /// Returns a copy of the latest frame without waiting for a new one.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.buffer.latest_frame()
    }

    /// Encodes the latest frame as JPEG.
    ///
    /// Returns `None` when no frame has arrived yet (or encoding failed).
    pub fn latest_encoded_snapshot(&self, quality: u8) -> Option<Vec<u8>> {
        let frame = self.buffer.latest()?;
        match frame.encode_jpeg(quality) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence(), "Failed to encode snapshot");
                None
            }
        }
    }

    /// Returns the current connectivity status.
    pub fn status(&self) -> SourceStatus {
        self.state.status()
    }

    /// Total frames published since creation.
    pub fn frames_acquired(&self) -> u64 {
        self.state.frames_acquired.load(Ordering::Relaxed)
    }

    /// Total open and read failures since creation.
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    /// Returns true while the acquisition loop is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl FrameProvider for FrameSource {
    fn latest_frame(&self) -> Option<Frame> {
        FrameSource::latest_frame(self)
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("locator", &self.config.locator)
            .field("status", &self.status())
            .field("frames_acquired", &self.frames_acquired())
            .finish()
    }
}

/// Outcome of one acquisition iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Published,
    OpenFailed,
    ReadFailed,
}

/// State moved into the acquisition thread.
struct Acquirer {
    locator: String,
    target_width: Option<u32>,
    reconnect_delay: Duration,
    opener: Arc<dyn CaptureOpener>,
    buffer: Arc<FrameBuffer>,
    state: Arc<SourceState>,
    capture: CaptureSlot,
}

impl Acquirer {
    fn run(self, signal: StopSignal) {
        tracing::debug!(source = %self.locator, "Acquisition loop running");

        while !signal.is_stopped() {
            match self.step() {
                Step::Published => {}
                Step::OpenFailed | Step::ReadFailed => {
                    if signal.sleep(self.reconnect_delay) {
                        break;
                    }
                }
            }
        }

        // Only reached after a stop request; covers the case where `stop`
        // gave up on a handle that was busy in a read.
        if let Some(mut capture) = self.capture.lock().take() {
            capture.close();
            tracing::info!(source = %self.locator, "Capture handle released after read");
        }
        // A read that outlived `stop` may have published and set Streaming.
        self.state.set_status(SourceStatus::Idle);
        tracing::debug!(source = %self.locator, "Acquisition loop exited");
    }

    /// Runs one iteration: connect if needed, read, publish.
    fn step(&self) -> Step {
        let mut slot = self.capture.lock();

        if slot.is_none() {
            self.state.set_status(SourceStatus::Connecting);
            match self.opener.open(&self.locator) {
                Ok(mut capture) => {
                    // Network sources often deliver a partial first frame.
                    let _ = capture.read();
                    *slot = Some(capture);
                    self.state.set_status(SourceStatus::Streaming);
                    tracing::info!(source = %self.locator, "Source connected");
                }
                Err(e) => {
                    self.fail(&e.to_string(), "open");
                    return Step::OpenFailed;
                }
            }
        }

        let result = match slot.as_mut() {
            Some(capture) => capture.read(),
            None => return Step::OpenFailed,
        };

        let frame = match result {
            Ok(frame) if frame.is_valid() => frame,
            Ok(frame) => {
                self.fail(&format!("empty or malformed frame {frame:?}"), "read");
                Self::release(&mut slot);
                return Step::ReadFailed;
            }
            Err(e) => {
                self.fail(&e.to_string(), "read");
                Self::release(&mut slot);
                return Step::ReadFailed;
            }
        };
        drop(slot);

        let frame = match self.target_width {
            Some(width) => frame.resized_to_width(width).unwrap_or(frame),
            None => frame,
        };
        self.buffer.publish(frame);
        self.state.frames_acquired.fetch_add(1, Ordering::Relaxed);
        Step::Published
    }

    fn fail(&self, error: &str, stage: &'static str) {
        self.state.failures.fetch_add(1, Ordering::Relaxed);
        let previous = self.state.set_status(SourceStatus::Error);
        if previous == SourceStatus::Error {
            tracing::debug!(source = %self.locator, stage, error, "Source still unavailable");
        } else {
            tracing::warn!(
                source = %self.locator,
                stage,
                error,
                retry_ms = self.reconnect_delay.as_millis() as u64,
                "Source failed, reconnecting"
            );
        }
    }

    fn release(slot: &mut Option<Box<dyn Capture>>) {
        if let Some(mut capture) = slot.take() {
            capture.close();
        }
    }
}
