//! Minimal ISO-BMFF writer for Motion-JPEG video.
//!
//! Layout: `ftyp`, one `mdat` that grows as frames arrive, then `moov`
//! appended when the file is finished. Each frame is one JPEG sample and
//! one chunk. The sample entry is `mp4v` with object type 0x6C (JPEG),
//! which is how common muxers store MJPEG in MP4.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::RecorderError;
use crate::capture::Frame;

/// Media timescale; divides evenly for common frame rates.
const MEDIA_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1_000;

const MDAT_HEADER_LEN: u64 = 16;

/// Identity transformation matrix shared by `mvhd` and `tkhd`.
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Incremental MP4 writer. Created on the first frame, finished once.
pub struct Mp4Writer {
    path: PathBuf,
    out: BufWriter<File>,
    width: u32,
    height: u32,
    sample_delta: u32,
    quality: u8,
    mdat_start: u64,
    position: u64,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    jpeg: Vec<u8>,
}

impl Mp4Writer {
    /// Creates the file and writes the headers.
    ///
    /// `width` and `height` go into the track header and sample entry.
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
        quality: u8,
    ) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);

        let ftyp = boxed(b"ftyp", |b| {
            b.extend_from_slice(b"isom");
            put_u32(b, 0x200);
            for brand in [b"isom", b"iso2", b"mp41"] {
                b.extend_from_slice(brand);
            }
        });
        out.write_all(&ftyp)?;

        let mdat_start = ftyp.len() as u64;
        // 64-bit size form, patched in `finish`.
        let mut header = Vec::with_capacity(MDAT_HEADER_LEN as usize);
        put_u32(&mut header, 1);
        header.extend_from_slice(b"mdat");
        put_u64(&mut header, MDAT_HEADER_LEN);
        out.write_all(&header)?;
        out.flush()?;

        let sample_delta = ((f64::from(MEDIA_TIMESCALE) / fps.max(1e-6)).round() as u32).max(1);

        Ok(Self {
            path,
            out,
            width,
            height,
            sample_delta,
            quality,
            mdat_start,
            position: mdat_start + MDAT_HEADER_LEN,
            sample_sizes: Vec::new(),
            chunk_offsets: Vec::new(),
            jpeg: Vec::new(),
        })
    }

    /// Returns the output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames written.
    pub fn frames(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Appends one frame.
    ///
    /// Frames are written at their own size even if it differs from the
    /// dimensions the file was created with; players may reject such files.
    pub fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        self.jpeg.clear();
        frame.write_jpeg(&mut self.jpeg, self.quality)?;

        let size = u32::try_from(self.jpeg.len()).map_err(|_| {
            RecorderError::Io(io::Error::new(io::ErrorKind::InvalidData, "frame too large"))
        })?;
        self.out.write_all(&self.jpeg)?;
        self.out.flush()?;

        self.chunk_offsets.push(self.position);
        self.sample_sizes.push(size);
        self.position += u64::from(size);
        Ok(())
    }

    /// Patches the `mdat` size, appends the `moov` index and syncs the file.
    pub fn finish(mut self) -> Result<PathBuf, RecorderError> {
        let moov = self.build_moov();
        self.out.write_all(&moov)?;

        let mdat_size = self.position - self.mdat_start;
        self.out.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.out.write_all(&mdat_size.to_be_bytes())?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;

        tracing::debug!(
            path = %self.path.display(),
            frames = self.sample_sizes.len(),
            bytes = self.position + moov.len() as u64,
            "MP4 finalized"
        );
        Ok(self.path)
    }

    fn build_moov(&self) -> Vec<u8> {
        let samples = self.sample_sizes.len() as u64;
        let media_duration = samples * u64::from(self.sample_delta);
        let movie_duration = media_duration * u64::from(MOVIE_TIMESCALE) / u64::from(MEDIA_TIMESCALE);

        boxed(b"moov", |moov| {
            moov.extend(full_box(b"mvhd", 1, 0, |b| {
                put_u64(b, 0); // creation time
                put_u64(b, 0); // modification time
                put_u32(b, MOVIE_TIMESCALE);
                put_u64(b, movie_duration);
                put_u32(b, 0x0001_0000); // rate 1.0
                put_u16(b, 0x0100); // volume 1.0
                b.extend_from_slice(&[0; 10]);
                put_matrix(b);
                b.extend_from_slice(&[0; 24]);
                put_u32(b, 2); // next track id
            }));
            moov.extend(boxed(b"trak", |trak| {
                trak.extend(full_box(b"tkhd", 1, 0x3, |b| {
                    put_u64(b, 0);
                    put_u64(b, 0);
                    put_u32(b, 1); // track id
                    put_u32(b, 0);
                    put_u64(b, movie_duration);
                    b.extend_from_slice(&[0; 8]);
                    put_u16(b, 0); // layer
                    put_u16(b, 0); // alternate group
                    put_u16(b, 0); // volume
                    put_u16(b, 0);
                    put_matrix(b);
                    put_u32(b, self.width << 16);
                    put_u32(b, self.height << 16);
                }));
                trak.extend(boxed(b"mdia", |mdia| {
                    mdia.extend(full_box(b"mdhd", 1, 0, |b| {
                        put_u64(b, 0);
                        put_u64(b, 0);
                        put_u32(b, MEDIA_TIMESCALE);
                        put_u64(b, media_duration);
                        put_u16(b, 0x55C4); // "und"
                        put_u16(b, 0);
                    }));
                    mdia.extend(full_box(b"hdlr", 0, 0, |b| {
                        put_u32(b, 0);
                        b.extend_from_slice(b"vide");
                        b.extend_from_slice(&[0; 12]);
                        b.extend_from_slice(b"VideoHandler\0");
                    }));
                    mdia.extend(boxed(b"minf", |minf| {
                        minf.extend(full_box(b"vmhd", 0, 0x1, |b| {
                            b.extend_from_slice(&[0; 8]);
                        }));
                        minf.extend(boxed(b"dinf", |dinf| {
                            dinf.extend(full_box(b"dref", 0, 0, |b| {
                                put_u32(b, 1);
                                b.extend(full_box(b"url ", 0, 0x1, |_| {}));
                            }));
                        }));
                        minf.extend(self.build_stbl());
                    }));
                }));
            }));
        })
    }

    fn build_stbl(&self) -> Vec<u8> {
        let samples = self.sample_sizes.len() as u32;

        boxed(b"stbl", |stbl| {
            stbl.extend(full_box(b"stsd", 0, 0, |b| {
                put_u32(b, 1);
                b.extend(self.build_sample_entry());
            }));
            stbl.extend(full_box(b"stts", 0, 0, |b| {
                if samples == 0 {
                    put_u32(b, 0);
                } else {
                    put_u32(b, 1);
                    put_u32(b, samples);
                    put_u32(b, self.sample_delta);
                }
            }));
            stbl.extend(full_box(b"stsc", 0, 0, |b| {
                put_u32(b, 1);
                put_u32(b, 1); // first chunk
                put_u32(b, 1); // samples per chunk
                put_u32(b, 1); // sample description index
            }));
            stbl.extend(full_box(b"stsz", 0, 0, |b| {
                put_u32(b, 0);
                put_u32(b, samples);
                for size in &self.sample_sizes {
                    put_u32(b, *size);
                }
            }));
            stbl.extend(full_box(b"co64", 0, 0, |b| {
                put_u32(b, samples);
                for offset in &self.chunk_offsets {
                    put_u64(b, *offset);
                }
            }));
        })
    }

    fn build_sample_entry(&self) -> Vec<u8> {
        boxed(b"mp4v", |b| {
            b.extend_from_slice(&[0; 6]);
            put_u16(b, 1); // data reference index
            b.extend_from_slice(&[0; 16]);
            put_u16(b, self.width as u16);
            put_u16(b, self.height as u16);
            put_u32(b, 0x0048_0000); // 72 dpi
            put_u32(b, 0x0048_0000);
            put_u32(b, 0);
            put_u16(b, 1); // frames per sample
            let mut compressor = [0u8; 32];
            let name = b"Motion JPEG";
            compressor[0] = name.len() as u8;
            compressor[1..=name.len()].copy_from_slice(name);
            b.extend_from_slice(&compressor);
            put_u16(b, 0x0018); // depth
            put_u16(b, 0xFFFF); // pre-defined -1
            b.extend(full_box(b"esds", 0, 0, |esds| {
                // ES_Descriptor
                esds.extend_from_slice(&[0x03, 21]);
                put_u16(esds, 1);
                esds.push(0);
                // DecoderConfigDescriptor: JPEG, visual stream
                esds.extend_from_slice(&[0x04, 13, 0x6C, 0x11]);
                esds.extend_from_slice(&[0, 0, 0]); // buffer size
                put_u32(esds, 0); // max bitrate
                put_u32(esds, 0); // avg bitrate
                // SLConfigDescriptor
                esds.extend_from_slice(&[0x06, 1, 0x02]);
            }));
        })
    }
}

impl std::fmt::Debug for Mp4Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Writer")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frames", &self.sample_sizes.len())
            .finish()
    }
}

fn boxed(kind: &[u8; 4], body: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    out.extend_from_slice(kind);
    body(&mut out);
    let size = out.len() as u32;
    out[..4].copy_from_slice(&size.to_be_bytes());
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    boxed(kind, |b| {
        put_u32(b, (u32::from(version) << 24) | (flags & 0x00FF_FFFF));
        body(b);
    })
}

fn put_u16(b: &mut Vec<u8>, v: u16) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(b: &mut Vec<u8>, v: u32) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(b: &mut Vec<u8>, v: u64) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn put_matrix(b: &mut Vec<u8>) {
    for value in UNITY_MATRIX {
        put_u32(b, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BYTES_PER_PIXEL;

    fn frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(
            vec![value; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
            0,
        )
    }

    fn read_u32(data: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(data[at..at + 4].try_into().unwrap())
    }

    fn read_u64(data: &[u8], at: usize) -> u64 {
        u64::from_be_bytes(data[at..at + 8].try_into().unwrap())
    }

    fn find(data: &[u8], kind: &[u8; 4]) -> usize {
        data.windows(4).position(|w| w == kind).unwrap() - 4
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");

        let mut writer = Mp4Writer::create(&path, 32, 16, 25.0, 90).unwrap();
        for value in [10, 120, 240] {
            writer.write(&frame(32, 16, value)).unwrap();
        }
        assert_eq!(writer.frames(), 3);
        let written = writer.finish().unwrap();
        assert_eq!(written, path);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[4..8], b"ftyp");

        // mdat uses the 64-bit size and ends where moov begins.
        let mdat = read_u32(&data, 0) as usize;
        assert_eq!(&data[mdat + 4..mdat + 8], b"mdat");
        let mdat_size = read_u64(&data, mdat + 8) as usize;
        let moov = mdat + mdat_size;
        assert_eq!(&data[moov + 4..moov + 8], b"moov");
        assert_eq!(moov + read_u32(&data, moov) as usize, data.len());

        // First sample is a JPEG right after the mdat header.
        assert_eq!(&data[mdat + 16..mdat + 18], &[0xFF, 0xD8]);

        let stsz = find(&data, b"stsz");
        assert_eq!(read_u32(&data, stsz + 16), 3);
        let stts = find(&data, b"stts");
        assert_eq!(read_u32(&data, stts + 20), 3600);

        let co64 = find(&data, b"co64");
        assert_eq!(read_u64(&data, co64 + 16) as usize, mdat + 16);
    }

    #[test]
    fn test_headers_written_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.mp4");

        let mut writer = Mp4Writer::create(&path, 8, 8, 10.0, 80).unwrap();
        writer.write(&frame(8, 8, 50)).unwrap();

        // Visible on disk before finish.
        assert!(std::fs::metadata(&path).unwrap().len() > 32);
        drop(writer);
    }

    #[test]
    fn test_mismatched_frame_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Mp4Writer::create(dir.path().join("mixed.mp4"), 16, 16, 10.0, 80).unwrap();
        writer.write(&frame(16, 16, 1)).unwrap();
        writer.write(&frame(32, 8, 2)).unwrap();
        assert_eq!(writer.frames(), 2);
        assert!(writer.finish().is_ok());
    }
}
