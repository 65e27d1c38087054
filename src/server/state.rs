//! Shared application state.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::capture::{FrameProvider, FrameSource};
use crate::config::FileConfig;
use crate::metrics::{MetricsError, MetricsRegistry, MetricsSnapshot};
use crate::recording::Recorder;
use crate::session::{RecordError, Session, SessionError, SessionState};

/// Outcome of finalizing the session, returned by `/stop`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopSummary {
    /// Always true; failures are reported as errors instead.
    pub ok: bool,
    /// Where the session record was written.
    pub json_path: PathBuf,
    /// Recording path, if a session was started.
    pub video_path: Option<String>,
    /// Number of annotations.
    pub count: usize,
    /// Session duration in seconds.
    pub duration_sec: f64,
}

/// State shared by all request handlers.
///
/// Owns the process-wide [`Session`]; the frame source is shared with the
/// session's recorder.
pub struct AppState {
    config: FileConfig,
    source: Arc<FrameSource>,
    session: Mutex<Session>,
    metrics: MetricsRegistry,
    finished: Mutex<Option<StopSummary>>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Creates the state around an already constructed source.
    pub fn new(config: FileConfig, source: Arc<FrameSource>) -> Result<Self, MetricsError> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            session: Mutex::new(Session::new(source.locator())),
            metrics: MetricsRegistry::new()?,
            finished: Mutex::new(None),
            config,
            source,
            shutdown,
        })
    }

    /// Application configuration.
    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    /// The frame source.
    pub fn source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    /// The session, behind its lock.
    pub fn session(&self) -> &Mutex<Session> {
        &self.session
    }

    /// Starts the session with a fresh recorder on the shared source.
    pub fn start_session(&self) -> Result<(), SessionError> {
        let provider: Arc<dyn FrameProvider> = self.source.clone();
        let recorder = Recorder::new(provider, self.config.recording.clone());
        self.session.lock().start(recorder)
    }

    /// Refreshes and encodes the Prometheus metrics.
    pub fn encode_metrics(&self) -> Result<String, MetricsError> {
        let snapshot = {
            let session = self.session.lock();
            MetricsSnapshot::from_components(&self.source, &session)
        };
        self.metrics.update(&snapshot);
        self.metrics.encode()
    }

    /// Stops the session, writes its record and stops the source.
    ///
    /// Blocks for up to the recorder and source stop timeouts, without
    /// holding the session lock while waiting. Only the first call does
    /// any work; later calls return the same summary.
    pub fn finish(&self) -> Result<StopSummary, RecordError> {
        let mut finished = self.finished.lock();
        if let Some(summary) = finished.as_ref() {
            return Ok(summary.clone());
        }

        // Handlers keep using the session while the recorder drains.
        let recorder = self.session.lock().take_recorder();
        if let Some(mut recorder) = recorder {
            recorder.stop();
        }
        let record = self.session.lock().stop();
        let json_path = record.save(&self.config.recording.output_dir)?;
        self.source.stop();

        let summary = StopSummary {
            ok: true,
            json_path,
            video_path: record.recording.clone(),
            count: record.annotations.len(),
            duration_sec: record.duration_sec,
        };
        tracing::info!(
            json_path = %summary.json_path.display(),
            video_path = summary.video_path.as_deref().unwrap_or_default(),
            count = summary.count,
            "Session finalized"
        );
        *finished = Some(summary.clone());
        Ok(summary)
    }

    /// Finalizes on process exit: writes the record only if a session was
    /// started, and always stops the source.
    pub fn finish_on_exit(&self) {
        let started = self.session.lock().state() != SessionState::NotStarted;
        if started {
            if let Err(e) = self.finish() {
                tracing::error!(error = %e, "Failed to write session record");
            }
        }
        self.source.stop();
    }

    /// Requests graceful shutdown of the server and open streams.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns true once shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Subscribes to the shutdown flag.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[cfg(test)]
impl AppState {
    /// State over a 64x48 mock source recording at 10 fps into `dir`.
    pub(crate) fn with_mock_source(dir: &std::path::Path) -> Arc<Self> {
        use crate::capture::{MockOpener, SourceConfig};
        use crate::recording::RecordingConfig;

        let config = FileConfig {
            source: SourceConfig::new("mock://camera"),
            recording: RecordingConfig::new(10.0, dir),
            ..FileConfig::default()
        };
        let source = Arc::new(FrameSource::with_opener(
            config.source.clone(),
            Arc::new(MockOpener::new(64, 48)),
        ));
        Arc::new(Self::new(config, source).expect("metrics registry"))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("source", &self.source)
            .field("session", &self.session)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Frame, BYTES_PER_PIXEL};
    use crate::recording::RecordingConfig;
    use std::time::Duration;

    /// Provider whose every read takes `delay`.
    struct SlowProvider {
        delay: Duration,
    }

    impl FrameProvider for SlowProvider {
        fn latest_frame(&self) -> Option<Frame> {
            std::thread::sleep(self.delay);
            Some(Frame::new(vec![0; 16 * 16 * BYTES_PER_PIXEL], 16, 16, 1))
        }
    }

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        AppState::with_mock_source(dir)
    }

    #[test]
    fn test_finish_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.start_session().unwrap();
        state.session().lock().add("mark").unwrap();

        let first = state.finish().unwrap();
        let second = state.finish().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.count, 1);
        assert!(first.json_path.exists());
        assert!(first.video_path.is_some());
    }

    #[test]
    fn test_finish_on_exit_without_session_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.finish_on_exit();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_shutdown_flag() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let rx = state.subscribe_shutdown();
        assert!(!state.is_shutting_down());
        state.request_shutdown();
        assert!(state.is_shutting_down());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_metrics_reflect_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.session().lock().add("first").unwrap();

        let output = state.encode_metrics().unwrap();
        assert!(output.contains("live_annotator_annotations 1"));
        assert!(output.contains("live_annotator_recording_active 0"));
    }

    #[test]
    fn test_session_usable_while_finish_waits_on_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let provider = Arc::new(SlowProvider { delay: Duration::from_millis(800) });
        let recorder = Recorder::new(provider, RecordingConfig::new(10.0, dir.path()));
        state.session().lock().start(recorder).unwrap();

        let finishing = Arc::clone(&state);
        let handle = std::thread::spawn(move || finishing.finish());
        std::thread::sleep(Duration::from_millis(100));

        let session = state.session().try_lock_for(Duration::from_millis(200));
        assert!(session.is_some(), "session lock held during recorder stop");
        assert!(!session.unwrap().is_recording());
        assert!(!handle.is_finished());

        let summary = handle.join().unwrap().unwrap();
        assert!(summary.json_path.exists());
        assert!(summary.video_path.is_some());
    }
}
