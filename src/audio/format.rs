//! Audio format descriptors and the [`FrameBlock`] unit of transfer.
//!
//! Every stage of the pipeline moves audio around as a [`FrameBlock`]: a
//! planar `f32` buffer tagged with the [`AudioFormat`] it was produced in.
//! Blocks are owned by exactly one stage at a time and are handed from
//! producer to consumer by value.
//!
//! Samples are always held as `f32` in `[-1.0, 1.0]` while in flight; the
//! [`SampleKind`] only matters at the container boundary where samples are
//! quantised back to the on-disk representation.

use hound::{SampleFormat, WavSpec};

/// Frames per block used by both engines.
pub const FRAME_BLOCK_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// SampleKind
// ---------------------------------------------------------------------------

/// On-disk sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Signed integer PCM with the given bit depth (8, 16, 24 or 32).
    Int { bits: u16 },
    /// IEEE 754 single-precision float.
    Float32,
}

impl SampleKind {
    /// Bits per sample as stored in the container.
    pub fn bits(&self) -> u16 {
        match self {
            SampleKind::Int { bits } => *bits,
            SampleKind::Float32 => 32,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Sample rate, channel count and sample representation of a stream.
///
/// The rate is a real number because rate negotiation may derive a
/// fractional value (e.g. `22_050 × 0.75`); containers store the rounded
/// [`container_rate`](Self::container_rate).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Number of channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
    /// Sample representation on disk.
    pub sample_kind: SampleKind,
}

impl AudioFormat {
    pub fn new(sample_rate: f64, channels: u16, sample_kind: SampleKind) -> Self {
        Self {
            sample_rate,
            channels,
            sample_kind,
        }
    }

    /// 16-bit integer PCM, the most common recording format.
    ///
    /// ```
    /// use slowdown::audio::{AudioFormat, SampleKind};
    ///
    /// let fmt = AudioFormat::pcm16(44_100.0, 1);
    /// assert_eq!(fmt.sample_kind, SampleKind::Int { bits: 16 });
    /// assert_eq!(fmt.container_rate(), 44_100);
    /// ```
    pub fn pcm16(sample_rate: f64, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleKind::Int { bits: 16 })
    }

    /// The integral rate written to a container header.
    pub fn container_rate(&self) -> u32 {
        self.sample_rate.round().max(0.0) as u32
    }

    /// Same channel layout and sample representation, different rate.
    pub fn with_rate(&self, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..*self
        }
    }

    /// Duration in seconds of `frames` frames at this rate.
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate
    }

    /// Convert to a `hound` WAV header.
    pub fn to_wav_spec(&self) -> WavSpec {
        let (bits_per_sample, sample_format) = match self.sample_kind {
            SampleKind::Int { bits } => (bits, SampleFormat::Int),
            SampleKind::Float32 => (32, SampleFormat::Float),
        };
        WavSpec {
            channels: self.channels,
            sample_rate: self.container_rate(),
            bits_per_sample,
            sample_format,
        }
    }

    /// Build from a `hound` WAV header.
    pub fn from_wav_spec(spec: &WavSpec) -> Self {
        let sample_kind = match spec.sample_format {
            SampleFormat::Float => SampleKind::Float32,
            SampleFormat::Int => SampleKind::Int {
                bits: spec.bits_per_sample,
            },
        };
        Self::new(spec.sample_rate as f64, spec.channels, sample_kind)
    }
}

// ---------------------------------------------------------------------------
// FrameBlock
// ---------------------------------------------------------------------------

/// A bounded block of planar audio frames.
///
/// `planes[ch][i]` is sample `i` of channel `ch`. All planes have the same
/// length, which is the block's [`frame_count`](Self::frame_count). A block
/// with zero frames signals end-of-stream when returned by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBlock {
    format: AudioFormat,
    planes: Vec<Vec<f32>>,
    capacity: usize,
}

impl FrameBlock {
    /// An empty block with room for `capacity` frames per channel.
    pub fn with_capacity(format: AudioFormat, capacity: usize) -> Self {
        let planes = (0..format.channels)
            .map(|_| Vec::with_capacity(capacity))
            .collect();
        Self {
            format,
            planes,
            capacity,
        }
    }

    /// An empty block, used as the end-of-stream marker.
    pub fn end_of_stream(format: AudioFormat) -> Self {
        Self::with_capacity(format, 0)
    }

    /// Wrap already-planar data.
    ///
    /// Planes longer than the shortest one are truncated so every channel
    /// carries the same number of frames.
    pub fn from_planes(format: AudioFormat, mut planes: Vec<Vec<f32>>) -> Self {
        let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
        for plane in &mut planes {
            plane.truncate(frames);
        }
        Self {
            format,
            planes,
            capacity: frames,
        }
    }

    /// Split interleaved samples (`L R L R …`) into planes.
    ///
    /// A trailing partial frame is dropped.
    ///
    /// ```
    /// use slowdown::audio::{AudioFormat, FrameBlock};
    ///
    /// let block = FrameBlock::from_interleaved(AudioFormat::pcm16(8_000.0, 2), &[0.5, -0.5, 0.25, -0.25]);
    /// assert_eq!(block.frame_count(), 2);
    /// assert_eq!(block.plane(0), &[0.5, 0.25]);
    /// assert_eq!(block.plane(1), &[-0.5, -0.25]);
    /// ```
    pub fn from_interleaved(format: AudioFormat, samples: &[f32]) -> Self {
        let channels = format.channels as usize;
        if channels == 0 {
            return Self::from_planes(format, Vec::new());
        }
        let frames = samples.len() / channels;
        let mut planes: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
        for frame in samples.chunks_exact(channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
        Self::from_planes(format, planes)
    }

    /// Interleave the planes back into `L R L R …` order.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.planes.len());
        for i in 0..frames {
            for plane in &self.planes {
                out.push(plane[i]);
            }
        }
        out
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Re-tag the block with another format without touching the samples.
    ///
    /// The channel count must already match; callers remix first.
    pub fn relabel(mut self, format: AudioFormat) -> Self {
        debug_assert_eq!(format.channels as usize, self.planes.len());
        self.format = format;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.max(self.frame_count())
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.planes[channel]
    }

    pub fn planes(&self) -> &[Vec<f32>] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<Vec<f32>> {
        self.planes
    }

    /// Duration of the block at its format's rate.
    pub fn duration_secs(&self) -> f64 {
        self.format.frames_to_secs(self.frame_count() as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
