//! Motion-JPEG stream reader.
//!
//! Works on both `multipart/x-mixed-replace` HTTP bodies and raw files of
//! concatenated JPEG images. Bytes outside an image (part headers, boundary
//! lines) are skipped. Inside an image the marker segments are walked by
//! their length fields, so an `FF D9` inside a segment payload, such as
//! the EOI of an EXIF thumbnail, does not end the image. Only an EOI in
//! the entropy-coded data after SOS does.

use std::io::{ErrorKind, Read};

use super::{Capture, CaptureError, Frame};

const SOI: [u8; 2] = [0xFF, 0xD8];

const MARKER: u8 = 0xFF;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

/// Upper bound on a single JPEG image; larger runs are treated as garbage.
const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// Where the splitter is within the stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Looking for SOI.
    #[default]
    Seek,
    /// At a marker between segments.
    Segments,
    /// Inside entropy-coded scan data.
    Entropy,
}

/// Incremental splitter for a byte stream of JPEG images.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buffer: Vec<u8>,
    /// Parse cursor inside the current image; SOI is at index 0.
    pos: usize,
    phase: Phase,
}

impl JpegSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw stream bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete JPEG image, if one is buffered.
    ///
    /// A malformed image is reported once as [`CaptureError::Corrupt`];
    /// the splitter then resynchronizes on the next SOI.
    pub fn next_image(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        if self.phase == Phase::Seek {
            match find(&self.buffer, &SOI, 0) {
                Some(start) => {
                    self.buffer.drain(..start);
                    self.pos = SOI.len();
                    self.phase = Phase::Segments;
                }
                None => {
                    // Keep a trailing 0xFF, it may be the first half of SOI.
                    let keep = usize::from(self.buffer.last() == Some(&MARKER));
                    let cut = self.buffer.len() - keep;
                    self.buffer.drain(..cut);
                    return Ok(None);
                }
            }
        }

        match self.advance() {
            Ok(Some(end)) => {
                let image: Vec<u8> = self.buffer.drain(..end).collect();
                self.reset();
                Ok(Some(image))
            }
            Ok(None) if self.buffer.len() > MAX_IMAGE_BYTES => {
                let size = self.buffer.len();
                self.buffer.clear();
                self.reset();
                Err(CaptureError::Corrupt(format!(
                    "no end-of-image marker within {size} bytes"
                )))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                // Drop this SOI so the next search finds a later one.
                self.buffer.drain(..SOI.len());
                self.reset();
                Err(e)
            }
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.phase = Phase::Seek;
    }

    /// Moves the cursor as far as the buffered bytes allow.
    ///
    /// Returns the end offset (exclusive) once EOI is reached.
    fn advance(&mut self) -> Result<Option<usize>, CaptureError> {
        loop {
            match self.phase {
                Phase::Seek => return Ok(None),
                Phase::Segments => {
                    let Some(&lead) = self.buffer.get(self.pos) else {
                        return Ok(None);
                    };
                    if lead != MARKER {
                        return Err(CaptureError::Corrupt(format!(
                            "expected marker at offset {}, found {lead:#04x}",
                            self.pos
                        )));
                    }
                    let Some(&code) = self.buffer.get(self.pos + 1) else {
                        return Ok(None);
                    };
                    match code {
                        // Fill byte before the marker code.
                        MARKER => self.pos += 1,
                        EOI => return Ok(Some(self.pos + 2)),
                        TEM | RST0..=RST7 => self.pos += 2,
                        _ => {
                            let Some(len) = self.buffer.get(self.pos + 2..self.pos + 4) else {
                                return Ok(None);
                            };
                            let len = usize::from(u16::from_be_bytes([len[0], len[1]]));
                            if len < 2 {
                                return Err(CaptureError::Corrupt(format!(
                                    "segment {code:#04x} has invalid length {len}"
                                )));
                            }
                            self.pos += 2 + len;
                            if code == SOS {
                                self.phase = Phase::Entropy;
                            }
                        }
                    }
                }
                Phase::Entropy => {
                    let mut i = self.pos;
                    let mut marker = None;
                    while i + 1 < self.buffer.len() {
                        if self.buffer[i] != MARKER {
                            i += 1;
                            continue;
                        }
                        match self.buffer[i + 1] {
                            // Stuffed zero or restart marker: still scan data.
                            0x00 | RST0..=RST7 => i += 2,
                            MARKER => i += 1,
                            _ => {
                                marker = Some(i);
                                break;
                            }
                        }
                    }
                    match marker {
                        Some(at) => {
                            // EOI, or the tables of the next progressive scan.
                            self.pos = at;
                            self.phase = Phase::Segments;
                        }
                        None => {
                            // The last byte may be half of a marker.
                            self.pos = i;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// A [`Capture`] decoding frames from any MJPEG byte stream.
pub struct MjpegCapture<R> {
    reader: R,
    splitter: JpegSplitter,
    chunk: Box<[u8]>,
    sequence: u64,
}

impl<R: Read> MjpegCapture<R> {
    /// Wraps a reader positioned at the start of the stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            splitter: JpegSplitter::new(),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
            sequence: 0,
        }
    }

    fn next_image(&mut self) -> Result<Vec<u8>, CaptureError> {
        loop {
            if let Some(image) = self.splitter.next_image()? {
                return Ok(image);
            }
            let n = match self.reader.read(&mut self.chunk) {
                Ok(0) => return Err(CaptureError::EndOfStream),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::ReadFailed(e.to_string())),
            };
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

impl<R: Read + Send> Capture for MjpegCapture<R> {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let image = self.next_image()?;
        self.sequence += 1;
        let frame = Frame::decode_jpeg(&image, self.sequence)
            .map_err(|e| CaptureError::Corrupt(e.to_string()))?;

        tracing::trace!(
            sequence = self.sequence,
            bytes = image.len(),
            width = frame.width(),
            height = frame.height(),
            "Decoded MJPEG frame"
        );
        Ok(frame)
    }

    fn close(&mut self) {
        tracing::debug!(frames = self.sequence, "MJPEG stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::BYTES_PER_PIXEL;
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
        let pixels = vec![value; width as usize * height as usize * BYTES_PER_PIXEL];
        Frame::new(pixels, width, height, 0).encode_jpeg(90).unwrap()
    }

    #[test]
    fn test_splitter_handles_multipart_framing() {
        let a = jpeg(8, 8, 10);
        let b = jpeg(8, 8, 200);

        let mut stream = Vec::new();
        for image in [&a, &b] {
            stream.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            stream.extend_from_slice(image);
            stream.extend_from_slice(b"\r\n");
        }

        let mut splitter = JpegSplitter::new();
        splitter.push(&stream);
        assert_eq!(splitter.next_image().unwrap().as_ref(), Some(&a));
        assert_eq!(splitter.next_image().unwrap().as_ref(), Some(&b));
        assert_eq!(splitter.next_image().unwrap(), None);
    }

    #[test]
    fn test_splitter_byte_at_a_time() {
        let a = jpeg(16, 8, 77);
        let mut splitter = JpegSplitter::new();
        let mut found = Vec::new();

        for byte in b"junk".iter().chain(a.iter()).chain(b"tail".iter()) {
            splitter.push(&[*byte]);
            if let Some(image) = splitter.next_image().unwrap() {
                found.push(image);
            }
        }

        assert_eq!(found, vec![a]);
    }

    #[test]
    fn test_splitter_discards_noise() {
        let mut splitter = JpegSplitter::new();
        splitter.push(&[0u8; 1000]);
        assert_eq!(splitter.next_image().unwrap(), None);
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_capture_reads_frames_then_eof() {
        let mut stream = jpeg(24, 12, 1);
        stream.extend(jpeg(24, 12, 2));

        let mut capture = MjpegCapture::new(Cursor::new(stream));
        let first = capture.read().unwrap();
        assert_eq!((first.width(), first.height()), (24, 12));
        assert_eq!(first.sequence(), 1);
        assert_eq!(capture.read().unwrap().sequence(), 2);
        assert!(matches!(capture.read(), Err(CaptureError::EndOfStream)));
    }

    /// Inserts an APP1 segment carrying `thumbnail` right after SOI.
    fn with_exif_thumbnail(image: &[u8], thumbnail: &[u8]) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(thumbnail);
        let len = u16::try_from(payload.len() + 2).unwrap();

        let mut out = SOI.to_vec();
        out.extend_from_slice(&[MARKER, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&image[SOI.len()..]);
        out
    }

    #[test]
    fn test_exif_thumbnail_does_not_end_image() {
        let image = with_exif_thumbnail(&jpeg(64, 48, 120), &jpeg(8, 8, 30));
        let mut stream = image.clone();
        stream.extend(jpeg(64, 48, 60));

        let mut splitter = JpegSplitter::new();
        splitter.push(&stream);
        assert_eq!(splitter.next_image().unwrap().as_ref(), Some(&image));

        let mut capture = MjpegCapture::new(Cursor::new(stream));
        let frame = capture.read().unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(capture.read().unwrap().sequence(), 2);
    }

    #[test]
    fn test_exif_thumbnail_byte_at_a_time() {
        let image = with_exif_thumbnail(&jpeg(32, 16, 90), &jpeg(8, 8, 200));
        let mut splitter = JpegSplitter::new();
        let mut found = Vec::new();

        for byte in b"--frame\r\n\r\n".iter().chain(image.iter()) {
            splitter.push(&[*byte]);
            if let Some(image) = splitter.next_image().unwrap() {
                found.push(image);
            }
        }

        assert_eq!(found, vec![image]);
    }

    #[test]
    fn test_splitter_recovers_after_malformed_image() {
        let good = jpeg(8, 8, 5);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(b"garbage");
        stream.extend_from_slice(&good);

        let mut splitter = JpegSplitter::new();
        splitter.push(&stream);
        assert!(matches!(splitter.next_image(), Err(CaptureError::Corrupt(_))));
        assert_eq!(splitter.next_image().unwrap(), Some(good));
    }

    #[test]
    fn test_capture_reports_corrupt_image() {
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(b"definitely not entropy coded data");
        stream.extend_from_slice(&[MARKER, EOI]);

        let mut capture = MjpegCapture::new(Cursor::new(stream));
        assert!(matches!(capture.read(), Err(CaptureError::Corrupt(_))));
    }
}
