//! Frame type representing a decoded RGB image with metadata.

use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, ImageError, ImageFormat, Rgb};

/// Bytes per pixel of the packed RGB8 layout.
pub const BYTES_PER_PIXEL: usize = 3;

/// A single decoded frame from the video source.
///
/// Pixels are packed RGB8, row-major, without padding.
#[derive(Clone)]
pub struct Frame {
    /// Raw RGB8 pixel data.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Decode timestamp.
    timestamp: Instant,
    /// Sequence number assigned by the capture backend.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Decodes a JPEG image into an RGB frame.
    pub fn decode_jpeg(data: &[u8], sequence: u64) -> Result<Self, ImageError> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.into_rgb8();
        let (width, height) = image.dimensions();
        Ok(Self::new(image.into_raw(), width, height, sequence))
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the decode timestamp.
    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Time since the frame was decoded.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.pixels.len() == self.pixel_count() * BYTES_PER_PIXEL
    }

    /// Scales the frame to `target_width`, keeping the aspect ratio.
    ///
    /// The new height is the source height times the scale factor, rounded
    /// to the nearest integer and never below one row.
    pub fn resized_to_width(&self, target_width: u32) -> Option<Self> {
        if target_width == 0 || target_width == self.width {
            return None;
        }
        let view = self.as_image()?;
        let scale = f64::from(target_width) / f64::from(self.width);
        let target_height = ((f64::from(self.height) * scale).round() as u32).max(1);
        let resized = imageops::resize(&view, target_width, target_height, FilterType::Triangle);

        Some(Self {
            pixels: resized.into_raw(),
            width: target_width,
            height: target_height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Encodes the frame as a baseline JPEG with the given quality (1-100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::with_capacity(self.pixels.len() / 8);
        self.write_jpeg(&mut out, quality)?;
        Ok(out)
    }

    /// Encodes the frame as JPEG into an existing buffer.
    pub fn write_jpeg(&self, out: &mut Vec<u8>, quality: u8) -> Result<(), ImageError> {
        let view = self.as_image().ok_or_else(|| {
            ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;
        let mut encoder = JpegEncoder::new_with_quality(out, quality.clamp(1, 100));
        encoder.encode_image(&view)
    }

    fn as_image(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.as_slice())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
