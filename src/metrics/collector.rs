//! Metrics collection and registry.

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

use crate::capture::FrameSource;
use crate::session::Session;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of pipeline state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Frames decoded and published by the source.
    pub frames_acquired: u64,
    /// Failed opens and reads.
    pub acquisition_failures: u64,
    /// Source status code (0 idle, 1 connecting, 2 streaming, 3 error).
    pub source_status: u8,
    /// Frames written to the current recording.
    pub frames_written: u64,
    /// Whether the recorder is running.
    pub recording_active: bool,
    /// Annotations in the session.
    pub annotations: usize,
    /// Session elapsed time in seconds.
    pub elapsed_seconds: f64,
}

/// Prometheus metrics registry for the capture and recording pipeline.
pub struct MetricsRegistry {
    registry: Registry,

    // Source metrics
    frames_acquired_total: IntCounter,
    acquisition_failures_total: IntCounter,
    source_status: IntGauge,

    // Recording metrics
    frames_written_total: IntCounter,
    recording_active: IntGauge,

    // Session metrics
    annotations: IntGauge,
    session_elapsed_seconds: Gauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all pipeline metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_acquired_total = IntCounter::new(
            "live_annotator_frames_acquired_total",
            "Total frames decoded from the video source",
        )?;
        let acquisition_failures_total = IntCounter::new(
            "live_annotator_acquisition_failures_total",
            "Total failed opens and reads of the video source",
        )?;
        let source_status = IntGauge::new(
            "live_annotator_source_status",
            "Source status (0=idle, 1=connecting, 2=streaming, 3=error)",
        )?;

        let frames_written_total = IntCounter::new(
            "live_annotator_frames_written_total",
            "Total frames written to the recording",
        )?;
        let recording_active = IntGauge::new(
            "live_annotator_recording_active",
            "Whether a recording is in progress (1=active, 0=inactive)",
        )?;

        let annotations = IntGauge::new(
            "live_annotator_annotations",
            "Number of annotations in the session",
        )?;
        let session_elapsed_seconds = Gauge::new(
            "live_annotator_session_elapsed_seconds",
            "Seconds since the session started",
        )?;

        registry.register(Box::new(frames_acquired_total.clone()))?;
        registry.register(Box::new(acquisition_failures_total.clone()))?;
        registry.register(Box::new(source_status.clone()))?;
        registry.register(Box::new(frames_written_total.clone()))?;
        registry.register(Box::new(recording_active.clone()))?;
        registry.register(Box::new(annotations.clone()))?;
        registry.register(Box::new(session_elapsed_seconds.clone()))?;

        Ok(Self {
            registry,
            frames_acquired_total,
            acquisition_failures_total,
            source_status,
            frames_written_total,
            recording_active,
            annotations,
            session_elapsed_seconds,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Counters only move forward by the difference
        let current = self.frames_acquired_total.get();
        if snapshot.frames_acquired > current {
            self.frames_acquired_total.inc_by(snapshot.frames_acquired - current);
        }
        let current = self.acquisition_failures_total.get();
        if snapshot.acquisition_failures > current {
            self.acquisition_failures_total
                .inc_by(snapshot.acquisition_failures - current);
        }
        let current = self.frames_written_total.get();
        if snapshot.frames_written > current {
            self.frames_written_total.inc_by(snapshot.frames_written - current);
        }

        self.source_status.set(i64::from(snapshot.source_status));
        self.recording_active
            .set(if snapshot.recording_active { 1 } else { 0 });
        self.annotations.set(snapshot.annotations as i64);
        self.session_elapsed_seconds.set(snapshot.elapsed_seconds);
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from the current source and session state.
    pub fn from_components(source: &FrameSource, session: &Session) -> Self {
        Self {
            frames_acquired: source.frames_acquired(),
            acquisition_failures: source.failures(),
            source_status: source.status().code(),
            frames_written: session.recorder().map_or(0, |r| r.frames_written()),
            recording_active: session.is_recording(),
            annotations: session.annotations().len(),
            elapsed_seconds: session.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SourceConfig;

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            frames_acquired: 120,
            acquisition_failures: 2,
            source_status: 2,
            frames_written: 40,
            recording_active: true,
            annotations: 3,
            elapsed_seconds: 4.5,
        };
        registry.update(&snapshot);
        // Replaying the same snapshot must not double count
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("live_annotator_frames_acquired_total 120"));
        assert!(output.contains("live_annotator_acquisition_failures_total 2"));
        assert!(output.contains("live_annotator_source_status 2"));
        assert!(output.contains("live_annotator_recording_active 1"));
        assert!(output.contains("live_annotator_annotations 3"));
        assert!(output.contains("live_annotator_session_elapsed_seconds 4.5"));
    }

    #[test]
    fn test_snapshot_from_idle_components() {
        let source = FrameSource::new(SourceConfig::new("clip.mjpeg"));
        let session = Session::new("clip.mjpeg");

        let snapshot = MetricsSnapshot::from_components(&source, &session);
        assert_eq!(snapshot.frames_acquired, 0);
        assert_eq!(snapshot.source_status, 0);
        assert!(!snapshot.recording_active);
        assert_eq!(snapshot.elapsed_seconds, 0.0);
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("live_annotator_frames_written_total"));
        assert!(output.contains("live_annotator_source_status"));
    }
}
