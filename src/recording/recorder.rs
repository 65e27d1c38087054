//! Paced recorder.
//!
//! The write loop samples the latest frame at a fixed cadence instead of
//! consuming every decoded frame: a slow source produces duplicate frames,
//! a fast one has frames skipped, and nothing is ever queued.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::mp4::Mp4Writer;
use super::{RecorderError, RecordingConfig};
use crate::capture::FrameProvider;
use crate::naming::timestamped_filename;
use crate::worker::{StopSignal, Worker};

/// How long `stop` waits for the write loop to finish.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while no frame is available yet.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Longest single sleep between writes.
const MAX_SLEEP: Duration = Duration::from_millis(200);

/// Records frames from a [`FrameProvider`] into an MP4 file.
///
/// A recorder is single-use: once stopped it cannot be started again.
pub struct Recorder {
    source: Arc<dyn FrameProvider>,
    config: RecordingConfig,
    path: Option<PathBuf>,
    frames_written: Arc<AtomicU64>,
    worker: Option<Worker>,
    active: bool,
    finished: bool,
}

impl Recorder {
    /// Creates an idle recorder reading from `source`.
    pub fn new(source: Arc<dyn FrameProvider>, config: RecordingConfig) -> Self {
        Self {
            source,
            config,
            path: None,
            frames_written: Arc::new(AtomicU64::new(0)),
            worker: None,
            active: false,
            finished: false,
        }
    }

    /// Assigns a timestamped output path and starts the write loop.
    ///
    /// No-op while active. The file itself is created when the first frame
    /// is available, since its dimensions come from that frame.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.active {
            return Ok(());
        }
        if self.finished {
            return Err(RecorderError::Finished);
        }

        fs::create_dir_all(&self.config.output_dir)?;
        let path = self
            .config
            .output_dir
            .join(timestamped_filename(&self.config.prefix, ".mp4"));

        let write_loop = WriteLoop {
            source: Arc::clone(&self.source),
            path: path.clone(),
            fps: self.config.fps,
            interval: self.config.frame_interval(),
            quality: self.config.jpeg_quality,
            frames_written: Arc::clone(&self.frames_written),
        };
        let worker = Worker::spawn("recorder", move |signal| write_loop.run(signal))?;

        tracing::info!(path = %path.display(), fps = self.config.fps, "Recording started");
        self.path = Some(path);
        self.worker = Some(worker);
        self.active = true;
        Ok(())
    }

    /// Stops the write loop and finalizes the file. Idempotent.
    ///
    /// Never fails: finalize errors are logged. If no frame was ever
    /// written, an empty file is left at [`Recorder::path`].
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.finished = true;

        let exited = match self.worker.take() {
            Some(worker) => worker.stop(STOP_TIMEOUT),
            None => true,
        };
        let frames = self.frames_written();

        if let Some(path) = &self.path {
            if exited && frames == 0 && !path.exists() {
                tracing::warn!(path = %path.display(), "No frames were recorded");
                if let Err(e) = File::create(path) {
                    tracing::error!(path = %path.display(), error = %e, "Failed to create empty recording");
                }
            }
            tracing::info!(path = %path.display(), frames, "Recording stopped");
        }
    }

    /// Returns true between `start` and `stop`.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Output path, assigned by `start`.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("path", &self.path)
            .field("fps", &self.config.fps)
            .field("active", &self.active)
            .field("frames_written", &self.frames_written())
            .finish()
    }
}

/// State moved into the recorder thread. The writer lives only here.
struct WriteLoop {
    source: Arc<dyn FrameProvider>,
    path: PathBuf,
    fps: f64,
    interval: Duration,
    quality: u8,
    frames_written: Arc<AtomicU64>,
}

impl WriteLoop {
    fn run(self, signal: StopSignal) {
        let mut writer: Option<Mp4Writer> = None;
        let mut next = Instant::now();

        while !signal.is_stopped() {
            let Some(frame) = self.source.latest_frame() else {
                if signal.sleep(IDLE_POLL) {
                    break;
                }
                continue;
            };

            if writer.is_none() {
                match Mp4Writer::create(&self.path, frame.width(), frame.height(), self.fps, self.quality) {
                    Ok(created) => {
                        tracing::info!(
                            path = %self.path.display(),
                            width = frame.width(),
                            height = frame.height(),
                            "Recording file created"
                        );
                        writer = Some(created);
                    }
                    Err(e) => {
                        tracing::error!(path = %self.path.display(), error = %e, "Failed to create recording");
                        break;
                    }
                }
            }

            if let Some(out) = writer.as_mut() {
                match out.write(&frame) {
                    Ok(()) => {
                        let written = self.frames_written.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::trace!(
                            written,
                            sequence = frame.sequence(),
                            age_ms = frame.age().as_millis() as u64,
                            "Frame recorded"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to write frame"),
                }
            }

            next += self.interval;
            let now = Instant::now();
            if next <= now {
                // Behind schedule: restart from now instead of catching up.
                next = now;
            } else if sleep_until(&signal, next) {
                break;
            }
        }

        if let Some(out) = writer {
            if let Err(e) = out.finish() {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to finalize recording");
            }
        }
    }
}

/// Sleeps until `deadline` in steps of at most [`MAX_SLEEP`].
///
/// Returns true if interrupted by a stop request.
fn sleep_until(signal: &StopSignal, deadline: Instant) -> bool {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        if signal.sleep((deadline - now).min(MAX_SLEEP)) {
            return true;
        }
    }
}
