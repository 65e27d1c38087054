//! Recording session and its annotation timeline.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::SessionRecord;
use crate::naming::utc_timestamp;
use crate::recording::{Recorder, RecorderError};

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("annotation text is empty")]
    EmptyText,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session has ended")]
    Ended,
    #[error("failed to start recorder: {0}")]
    Recorder(#[from] RecorderError),
}

/// One timestamped note on the session timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Seconds since session start.
    pub t: f64,
    /// Annotation text, never empty.
    pub text: String,
}

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet started.
    NotStarted,
    /// Started and recording.
    Active,
    /// Stopped; the session cannot be started again.
    Ended,
}

/// A single recording session.
///
/// Annotation times come from a monotonic clock captured at start, so they
/// are unaffected by wall-clock adjustments. The wall-clock start time is
/// kept for display and the persisted record only.
#[derive(Debug)]
pub struct Session {
    source: String,
    state: SessionState,
    started_at: Option<String>,
    started: Option<Instant>,
    final_elapsed: Option<f64>,
    annotations: Vec<Annotation>,
    recorder: Option<Recorder>,
    recording_path: Option<PathBuf>,
}

impl Session {
    /// Creates a session for the given source locator.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            state: SessionState::NotStarted,
            started_at: None,
            started: None,
            final_elapsed: None,
            annotations: Vec::new(),
            recorder: None,
            recording_path: None,
        }
    }

    /// Starts the session and the given recorder.
    ///
    /// Resets the timeline. If the recorder fails to start the session is
    /// left untouched.
    pub fn start(&mut self, mut recorder: Recorder) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => return Err(SessionError::AlreadyStarted),
            SessionState::Ended => return Err(SessionError::Ended),
            SessionState::NotStarted => {}
        }

        let started = Instant::now();
        let started_at = utc_timestamp();
        recorder.start()?;

        self.started = Some(started);
        self.started_at = Some(started_at);
        self.annotations.clear();
        self.recording_path = recorder.path().map(Path::to_path_buf);
        self.recorder = Some(recorder);
        self.state = SessionState::Active;

        tracing::info!(
            source = %self.source,
            started_at = self.started_at.as_deref().unwrap_or_default(),
            "Session started"
        );
        Ok(())
    }

    /// Seconds since start; zero before start, frozen once stopped.
    pub fn elapsed(&self) -> f64 {
        if let Some(elapsed) = self.final_elapsed {
            return elapsed;
        }
        self.started
            .map_or(0.0, |started| started.elapsed().as_secs_f64().max(0.0))
    }

    /// Appends an annotation at the current elapsed time.
    pub fn add(&mut self, text: &str) -> Result<Annotation, SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::Ended);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyText);
        }

        let annotation = Annotation {
            t: self.elapsed(),
            text: text.to_string(),
        };
        self.annotations.push(annotation.clone());
        tracing::debug!(t = annotation.t, count = self.annotations.len(), "Annotation added");
        Ok(annotation)
    }

    /// Removes and returns the most recent annotation.
    pub fn undo(&mut self) -> Option<Annotation> {
        if self.state == SessionState::Ended {
            return None;
        }
        let removed = self.annotations.pop();
        if let Some(annotation) = &removed {
            tracing::debug!(t = annotation.t, "Annotation removed");
        }
        removed
    }

    /// Stops the recorder, ends the session and returns its record.
    ///
    /// Works from any state; stopping twice returns the same record.
    pub fn stop(&mut self) -> SessionRecord {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.stop();
        }
        if self.state != SessionState::Ended {
            self.final_elapsed = Some(self.elapsed());
            self.state = SessionState::Ended;
            tracing::info!(
                duration_sec = self.elapsed(),
                annotations = self.annotations.len(),
                "Session ended"
            );
        }
        self.to_record()
    }

    /// Builds the durable record of the session as it is now.
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            video_source: self.source.clone(),
            started_at: self.started_at.clone(),
            duration_sec: self.elapsed(),
            annotations: self.annotations.clone(),
            recording: self
                .recording_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Source locator.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// UTC start time, once started.
    pub fn started_at(&self) -> Option<&str> {
        self.started_at.as_deref()
    }

    /// Annotations in insertion order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Path of the recording file, once started.
    pub fn recording_path(&self) -> Option<&Path> {
        self.recording_path.as_deref()
    }

    /// The session's recorder, once started.
    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    /// Detaches the recorder so it can be stopped without holding the
    /// session. The recording path stays with the session and its record.
    pub fn take_recorder(&mut self) -> Option<Recorder> {
        self.recorder.take()
    }

    /// True while the recorder is running.
    pub fn is_recording(&self) -> bool {
        self.recorder.as_ref().is_some_and(Recorder::is_active)
    }
}
