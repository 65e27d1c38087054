//! Prometheus metrics for the capture and recording pipeline.
//!
//! # Metrics Exposed
//!
//! ## Source Metrics
//! - `live_annotator_frames_acquired_total` - Frames decoded from the source
//! - `live_annotator_acquisition_failures_total` - Failed opens and reads
//! - `live_annotator_source_status` - 0=idle, 1=connecting, 2=streaming, 3=error
//!
//! ## Recording Metrics
//! - `live_annotator_frames_written_total` - Frames written to the recording
//! - `live_annotator_recording_active` - 1 while a recording is in progress
//!
//! ## Session Metrics
//! - `live_annotator_annotations` - Annotations in the session
//! - `live_annotator_session_elapsed_seconds` - Seconds since session start
//!
//! # Example
//!
//! ```no_run
//! use live_annotator::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     frames_acquired: 250,
//!     source_status: 2,
//!     recording_active: true,
//!     frames_written: 100,
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! println!("{}", registry.encode().expect("encode"));
//! ```

mod collector;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
