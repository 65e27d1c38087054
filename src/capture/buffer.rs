//! Single-slot latest-frame hand-off.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Frame;

/// Anything that can hand out the most recent frame.
///
/// Implemented by [`FrameBuffer`] and [`super::FrameSource`]; the recorder
/// depends only on this trait.
pub trait FrameProvider: Send + Sync {
    /// Returns an independent copy of the most recent frame, if any.
    fn latest_frame(&self) -> Option<Frame>;
}

/// Overwrite-always slot holding the latest decoded frame.
///
/// Frames are stored behind an `Arc`, so the lock is only held to swap or
/// clone a pointer; readers copy pixels outside the critical section and
/// can never observe a frame that is still being written. There is no
/// queue: a frame published before the previous one was read replaces it.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current frame.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let previous = self.slot.lock().replace(frame);
        // Free the old pixels after the lock is released.
        drop(previous);
    }

    /// Returns a shared reference to the current frame.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// Returns true once any frame has been published.
    pub fn has_frame(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl FrameProvider for FrameBuffer {
    fn latest_frame(&self) -> Option<Frame> {
        self.latest().map(|frame| Frame::clone(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::BYTES_PER_PIXEL;
    use std::thread;

    fn filled(value: u8, sequence: u64) -> Frame {
        Frame::new(vec![value; 64 * 48 * BYTES_PER_PIXEL], 64, 48, sequence)
    }

    #[test]
    fn test_empty_until_published() {
        let buffer = FrameBuffer::new();
        assert!(buffer.latest_frame().is_none());
        assert!(!buffer.has_frame());

        buffer.publish(filled(1, 1));
        assert_eq!(buffer.latest_frame().unwrap().sequence(), 1);
    }

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let buffer = FrameBuffer::new();
        buffer.publish(filled(1, 1));
        buffer.publish(filled(2, 2));
        buffer.publish(filled(3, 3));

        // Repeated reads observe the same frame; nothing is consumed.
        assert_eq!(buffer.latest_frame().unwrap().sequence(), 3);
        assert_eq!(buffer.latest_frame().unwrap().sequence(), 3);
    }

    #[test]
    fn test_copies_are_independent() {
        let buffer = FrameBuffer::new();
        buffer.publish(filled(9, 1));
        let copy = buffer.latest_frame().unwrap();
        buffer.publish(filled(10, 2));

        assert!(copy.pixels().iter().all(|&b| b == 9));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_frames() {
        let buffer = Arc::new(FrameBuffer::new());

        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 1..=500u64 {
                    buffer.publish(filled((seq % 256) as u8, seq));
                }
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    let mut last_seq = 0;
                    for _ in 0..2000 {
                        if let Some(frame) = buffer.latest_frame() {
                            let expected = (frame.sequence() % 256) as u8;
                            assert!(frame.pixels().iter().all(|&b| b == expected));
                            assert!(frame.sequence() >= last_seq);
                            last_seq = frame.sequence();
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.latest_frame().unwrap().sequence(), 500);
    }
}
