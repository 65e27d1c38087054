//! Live Annotator Library
//!
//! Watches a live video source, records it to an MP4 file at a fixed frame
//! rate and keeps a timeline of text annotations synchronized to the
//! recording.
//!
//! # Architecture
//!
//! ```text
//! source ──▶ FrameSource ──▶ latest-frame slot ──┬──▶ Recorder ──▶ .mp4
//!           (acquisition loop)                   └──▶ snapshots / MJPEG stream
//!
//!                 Session (annotations, timing) ──▶ .json record
//! ```
//!
//! # Design Principles
//!
//! - **Latest frame wins**: one buffered frame, no queues; slow consumers
//!   skip frames, slow producers get frames repeated
//! - **Never fatal**: acquisition failures reconnect forever and only show
//!   up in the source status
//! - **Monotonic timing**: annotation times come from a monotonic clock
//! - **Bounded stop**: background loops are joined with a timeout
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use live_annotator::{
//!     capture::{FrameSource, SourceConfig},
//!     recording::{Recorder, RecordingConfig},
//!     session::Session,
//! };
//!
//! let source = Arc::new(FrameSource::new(SourceConfig::new("http://192.168.0.12:8080/video")));
//! source.start();
//!
//! let mut session = Session::new(source.locator());
//! let recorder = Recorder::new(source.clone(), RecordingConfig::new(25.0, "."));
//! session.start(recorder).unwrap();
//!
//! session.add("door opens").unwrap();
//!
//! let record = session.stop();
//! record.save(".").unwrap();
//! source.stop();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod config;
pub mod metrics;
pub mod naming;
pub mod recording;
pub mod session;
#[cfg(feature = "server")]
pub mod server;
pub mod worker;

// Re-export commonly used types at crate root
pub use capture::{Frame, FrameProvider, FrameSource, SourceConfig, SourceStatus};
pub use config::{ConfigError, FileConfig, ServerConfig};
pub use recording::{Recorder, RecorderError, RecordingConfig};
pub use session::{Annotation, Session, SessionError, SessionRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
