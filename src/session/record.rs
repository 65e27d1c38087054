//! Durable session record written on stop.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Annotation;
use crate::naming::timestamped_filename;

/// Errors that can occur while persisting a record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to write session record: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize session record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Locator of the video source.
    pub video_source: String,
    /// UTC start time, `None` if the session never started.
    pub started_at: Option<String>,
    /// Seconds between start and stop.
    pub duration_sec: f64,
    /// Annotations in insertion order.
    pub annotations: Vec<Annotation>,
    /// Path of the recording, if one was started.
    pub recording: Option<String>,
}

impl SessionRecord {
    /// Writes the record as pretty JSON to `dir/annotations_<timestamp>.json`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, RecordError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(timestamped_filename("annotations_", ".json"));
        self.save_to(&path)?;
        Ok(path)
    }

    /// Writes the record as pretty JSON to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), RecordError> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n")?;
        out.flush()?;

        tracing::info!(
            path = %path.display(),
            annotations = self.annotations.len(),
            duration_sec = self.duration_sec,
            "Session record saved"
        );
        Ok(())
    }

    /// Reads a record back from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let record = SessionRecord {
            video_source: "http://cam/video".into(),
            started_at: Some("2024-01-02T03:04:05.678+00:00".into()),
            duration_sec: 12.5,
            annotations: vec![Annotation {
                t: 1.25,
                text: "door opens".into(),
            }],
            recording: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["video_source"], "http://cam/video");
        assert_eq!(value["annotations"][0]["t"], 1.25);
        assert_eq!(value["annotations"][0]["text"], "door opens");
        assert!(value["recording"].is_null());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let record = SessionRecord {
            video_source: "clip.mjpeg".into(),
            started_at: None,
            duration_sec: 0.0,
            annotations: Vec::new(),
            recording: Some("recording_20240101_000000.mp4".into()),
        };

        let path = record.save(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("annotations_") && name.ends_with(".json"));
        assert_eq!(SessionRecord::load(&path).unwrap(), record);
    }
}
