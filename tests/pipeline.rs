//! End-to-end scenarios over a mock source.

use std::sync::Arc;
use std::time::{Duration, Instant};

use live_annotator::capture::{FrameSource, MockOpener, SourceConfig, SourceStatus};
use live_annotator::recording::{Recorder, RecordingConfig};
use live_annotator::session::{Session, SessionRecord};

fn late_source(width: u32) -> Arc<FrameSource> {
    let mut config = SourceConfig::new("mock://late");
    config.width = width;
    config.reconnect_delay_ms = 20;
    let opener = MockOpener::new(640, 480).available_after(Duration::from_millis(50));
    Arc::new(FrameSource::with_opener(config, Arc::new(opener)))
}

#[test]
fn records_once_a_late_source_comes_online() {
    let dir = tempfile::tempdir().unwrap();
    let source = late_source(0);
    source.start();

    let mut session = Session::new(source.locator());
    let recorder = Recorder::new(source.clone(), RecordingConfig::new(10.0, dir.path()));
    session.start(recorder).unwrap();

    std::thread::sleep(Duration::from_secs(1));

    assert!(session.is_recording());
    assert_eq!(source.status(), SourceStatus::Streaming);
    let path = session.recording_path().unwrap().to_path_buf();
    assert!(path.exists());
    assert!(std::fs::metadata(&path).unwrap().len() > 0);

    let frame = source.latest_frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (640, 480));

    let record = session.stop();
    source.stop();

    let written = session.recorder().unwrap().frames_written();
    assert!(written > 0 && written <= 13, "wrote {written} frames");
    assert_eq!(record.recording.as_deref(), Some(path.to_string_lossy().as_ref()));
}

#[test]
fn resizes_frames_before_publishing() {
    let source = late_source(320);
    source.start();

    let deadline = Instant::now() + Duration::from_secs(2);
    let frame = loop {
        if let Some(frame) = source.latest_frame() {
            break frame;
        }
        assert!(Instant::now() < deadline, "no frame within 2s");
        std::thread::sleep(Duration::from_millis(10));
    };
    source.stop();

    assert_eq!((frame.width(), frame.height()), (320, 240));
}

#[test]
fn stopping_a_never_started_session_yields_a_valid_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new("http://camera.local/video");

    let record = session.stop();
    assert_eq!(record.duration_sec, 0.0);
    assert!(record.annotations.is_empty());

    let path = record.save(dir.path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["video_source"], "http://camera.local/video");
    assert!(json["started_at"].is_null());
    assert!(json["recording"].is_null());
    assert_eq!(SessionRecord::load(&path).unwrap(), record);
}

#[test]
fn annotations_follow_the_session_clock() {
    let dir = tempfile::tempdir().unwrap();
    let source = late_source(0);
    let mut session = Session::new(source.locator());
    session
        .start(Recorder::new(source.clone(), RecordingConfig::new(10.0, dir.path())))
        .unwrap();

    let first = session.add("first").unwrap();
    std::thread::sleep(Duration::from_millis(30));
    let second = session.add("second").unwrap();
    assert!(second.t >= first.t + 0.03);

    let record = session.stop();
    assert_eq!(record.annotations, vec![first, second]);
    assert!(record.duration_sec >= record.annotations[1].t);
    // No frames ever arrived: an empty file stands in for the recording.
    let path = record.recording.unwrap();
    assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
}
