//! Audio container I/O on top of `hound`.
//!
//! [`open_for_read`] streams an existing WAV file block by block;
//! [`open_for_write`] creates (or truncates) a WAV file for a given
//! [`AudioFormat`]. Both sides work in [`FrameBlock`]s so memory stays bounded
//! by the block capacity regardless of file length.
//!
//! The [`AudioReader`] / [`AudioWriter`] traits are the seams the engines
//! depend on, so tests can substitute streams that never end or writes that
//! fail.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use hound::{WavReader, WavWriter};
use thiserror::Error;

use super::format::{AudioFormat, FrameBlock, SampleKind};

// ---------------------------------------------------------------------------
// ContainerError
// ---------------------------------------------------------------------------

/// Failures of the container layer.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The input path does not exist.
    #[error("Input audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but is not a readable WAV stream.
    #[error("Unsupported audio format in {path}: {reason}")]
    FormatUnsupported { path: String, reason: String },

    /// The output file could not be created.
    #[error("Cannot create output file {path}: {reason}")]
    CannotCreate { path: String, reason: String },

    /// Decoding failed part-way through the stream.
    #[error("Read failed: {0}")]
    Read(String),

    /// Appending to the output failed.
    #[error("Write failed: {0}")]
    Write(String),

    /// A block was written to a container with a different channel layout.
    #[error("Block has {got} channels but the container expects {expected}")]
    ChannelMismatch { expected: u16, got: usize },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A finite stream of frame blocks.
pub trait AudioReader: Send {
    /// Format of every block this reader yields.
    fn format(&self) -> AudioFormat;

    /// Total number of frames in the stream.
    fn total_frames(&self) -> u64;

    /// Stream duration in seconds.
    fn duration_secs(&self) -> f64 {
        self.format().frames_to_secs(self.total_frames())
    }

    /// Read up to `capacity` frames.
    ///
    /// A block with `frame_count() == 0` marks end-of-stream.
    fn read_next(&mut self, capacity: usize) -> Result<FrameBlock, ContainerError>;
}

/// An append-only sink for frame blocks.
pub trait AudioWriter: Send {
    /// Format the container was created with.
    fn format(&self) -> AudioFormat;

    /// Append `block`. The first failure should abort the caller.
    fn write(&mut self, block: &FrameBlock) -> Result<(), ContainerError>;

    /// Frames appended so far.
    fn frames_written(&self) -> u64;

    /// Flush headers and close the file, returning the final frame count.
    fn finalize(self: Box<Self>) -> Result<u64, ContainerError>;
}

// ---------------------------------------------------------------------------
// WavFileReader
// ---------------------------------------------------------------------------

/// Streaming WAV reader.
pub struct WavFileReader {
    reader: WavReader<BufReader<File>>,
    format: AudioFormat,
    total_frames: u64,
}

impl std::fmt::Debug for WavFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileReader")
            .field("format", &self.format)
            .field("total_frames", &self.total_frames)
            .finish_non_exhaustive()
    }
}

/// Open `path` for streaming reads.
///
/// # Errors
///
/// - [`ContainerError::NotFound`]: nothing exists at `path`.
/// - [`ContainerError::FormatUnsupported`]: not a WAV file `hound` can decode.
pub fn open_for_read(path: impl AsRef<Path>) -> Result<WavFileReader, ContainerError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ContainerError::NotFound(path.to_path_buf()));
    }

    let reader = WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            ContainerError::NotFound(path.to_path_buf())
        }
        other => ContainerError::FormatUnsupported {
            path: path.display().to_string(),
            reason: other.to_string(),
        },
    })?;

    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(ContainerError::FormatUnsupported {
            path: path.display().to_string(),
            reason: format!(
                "{} channels at {} Hz",
                spec.channels, spec.sample_rate
            ),
        });
    }

    let format = AudioFormat::from_wav_spec(&spec);
    let total_frames = u64::from(reader.duration());
    log::debug!(
        "container: opened {} ({} Hz, {} ch, {} frames)",
        path.display(),
        spec.sample_rate,
        spec.channels,
        total_frames
    );

    Ok(WavFileReader {
        reader,
        format,
        total_frames,
    })
}

impl AudioReader for WavFileReader {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read_next(&mut self, capacity: usize) -> Result<FrameBlock, ContainerError> {
        let wanted = capacity * self.format.channels as usize;
        let mut interleaved = Vec::with_capacity(wanted);

        match self.format.sample_kind {
            SampleKind::Float32 => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    interleaved.push(sample.map_err(|e| ContainerError::Read(e.to_string()))?);
                }
            }
            SampleKind::Int { bits } => {
                let full_scale = int_full_scale(bits);
                for sample in self.reader.samples::<i32>().take(wanted) {
                    let value = sample.map_err(|e| ContainerError::Read(e.to_string()))?;
                    interleaved.push(value as f32 / full_scale);
                }
            }
        }

        Ok(FrameBlock::from_interleaved(self.format, &interleaved))
    }
}

// ---------------------------------------------------------------------------
// WavFileWriter
// ---------------------------------------------------------------------------

/// Streaming WAV writer.
pub struct WavFileWriter {
    writer: WavWriter<BufWriter<File>>,
    format: AudioFormat,
    frames_written: u64,
}

impl std::fmt::Debug for WavFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileWriter")
            .field("format", &self.format)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

/// Create a WAV file at `path` with the given format.
///
/// A file already at `path` is truncated, so a retried job never appends to
/// stale data and a path reserved by the caller stays claimed.
///
/// # Errors
///
/// [`ContainerError::CannotCreate`] when the format cannot be expressed as a
/// WAV header or the file cannot be opened.
pub fn open_for_write(
    path: impl AsRef<Path>,
    format: &AudioFormat,
) -> Result<WavFileWriter, ContainerError> {
    let path = path.as_ref();
    let cannot_create = |reason: String| ContainerError::CannotCreate {
        path: path.display().to_string(),
        reason,
    };

    if format.channels == 0 || format.container_rate() == 0 {
        return Err(cannot_create(format!(
            "{} channels at {} Hz",
            format.channels,
            format.container_rate()
        )));
    }
    if let SampleKind::Int { bits } = format.sample_kind {
        if !matches!(bits, 8 | 16 | 24 | 32) {
            return Err(cannot_create(format!("{bits}-bit integer samples")));
        }
    }

    let writer =
        WavWriter::create(path, format.to_wav_spec()).map_err(|e| cannot_create(e.to_string()))?;

    Ok(WavFileWriter {
        writer,
        format: *format,
        frames_written: 0,
    })
}

impl WavFileWriter {
    fn write_sample(&mut self, sample: f32) -> Result<(), hound::Error> {
        match self.format.sample_kind {
            SampleKind::Float32 => self.writer.write_sample(sample),
            SampleKind::Int { bits } => {
                let value = quantize(sample, bits);
                match bits {
                    8 => self.writer.write_sample(value as i8),
                    16 => self.writer.write_sample(value as i16),
                    _ => self.writer.write_sample(value),
                }
            }
        }
    }
}

impl AudioWriter for WavFileWriter {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn write(&mut self, block: &FrameBlock) -> Result<(), ContainerError> {
        if block.channel_count() != self.format.channels as usize {
            return Err(ContainerError::ChannelMismatch {
                expected: self.format.channels,
                got: block.channel_count(),
            });
        }

        for i in 0..block.frame_count() {
            for plane in block.planes() {
                self.write_sample(plane[i])
                    .map_err(|e| ContainerError::Write(e.to_string()))?;
            }
        }
        self.frames_written += block.frame_count() as u64;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finalize(self: Box<Self>) -> Result<u64, ContainerError> {
        let frames = self.frames_written;
        self.writer
            .finalize()
            .map_err(|e| ContainerError::Write(e.to_string()))?;
        Ok(frames)
    }
}

// ---------------------------------------------------------------------------
// Sample scaling
// ---------------------------------------------------------------------------

fn int_full_scale(bits: u16) -> f32 {
    (1u64 << (bits.clamp(1, 32) - 1)) as f32
}

/// Scale a `[-1.0, 1.0]` sample to a signed integer of `bits` width.
pub(super) fn quantize(sample: f32, bits: u16) -> i32 {
    let full = int_full_scale(bits) as f64;
    (f64::from(sample) * full)
        .round()
        .clamp(-full, full - 1.0) as i32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
