//! Streaming sample-rate conversion and channel remixing.
//!
//! The direct-resample engine relabels a stream at `input rate × m`. WAV
//! headers only carry integral rates, so when that product is fractional the
//! stream is written at the rounded rate and [`StreamConverter`] corrects the
//! residual ratio with `rubato`. When the product is already integral the
//! converter is a pass-through that only re-tags blocks.
//!
//! Channel layouts are reconciled first with [`remix_channels`].

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use thiserror::Error;

use super::format::{AudioFormat, FrameBlock};

/// Upper bound on drain passes when flushing the resampler's delay line.
const MAX_FLUSH_PASSES: usize = 8;

// ---------------------------------------------------------------------------
// ConversionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Unable to create converter: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("Conversion error: {0}")]
    Resample(#[from] rubato::ResampleError),
}

// ---------------------------------------------------------------------------
// Channel mixing
// ---------------------------------------------------------------------------

/// Mix planar multi-channel audio down to mono by averaging all channels.
///
/// * One plane is returned as-is.
/// * No planes yield an empty vector.
///
/// ```rust
/// use slowdown::audio::downmix_to_mono;
///
/// let mono = downmix_to_mono(&[vec![0.5, 0.2], vec![-0.5, -0.2]]);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.0).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(planes: &[Vec<f32>]) -> Vec<f32> {
    match planes.len() {
        0 => Vec::new(),
        1 => planes[0].clone(),
        n => {
            let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
            (0..frames)
                .map(|i| planes.iter().map(|p| p[i]).sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Adapt `planes` to `target` channels.
///
/// * Same count: unchanged.
/// * To mono: averaged with [`downmix_to_mono`].
/// * Otherwise: channels are kept in order, surplus channels dropped and
///   missing ones filled by repeating the last source channel.
pub fn remix_channels(planes: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
    if planes.len() == target || planes.is_empty() {
        return planes;
    }
    if target == 1 {
        return vec![downmix_to_mono(&planes)];
    }
    let last = planes.len() - 1;
    (0..target).map(|ch| planes[ch.min(last)].clone()).collect()
}

// ---------------------------------------------------------------------------
// StreamConverter
// ---------------------------------------------------------------------------

/// Block-by-block converter from an input format to an output format.
///
/// Feed blocks with [`convert`](Self::convert) in file order, then call
/// [`flush`](Self::flush) once to drain the resampler's delay line. Only
/// one input block and one output block are alive per call.
pub struct StreamConverter {
    output: AudioFormat,
    resampler: Option<FastFixedIn<f32>>,
    ratio: f64,
    /// Input frames waiting for a full resampler chunk.
    pending: Vec<Vec<f32>>,
    /// Leading output frames still to discard (resampler latency).
    delay_remaining: usize,
    frames_in: u64,
    frames_out: u64,
}

impl std::fmt::Debug for StreamConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConverter")
            .field("output", &self.output)
            .field("ratio", &self.ratio)
            .field("resampling", &self.resampler.is_some())
            .finish_non_exhaustive()
    }
}

impl StreamConverter {
    /// Build a converter that turns `input` blocks into `output` blocks.
    ///
    /// `chunk_frames` is the resampler's fixed input chunk, normally the
    /// engine's block capacity.
    pub fn new(
        input: &AudioFormat,
        output: &AudioFormat,
        chunk_frames: usize,
    ) -> Result<Self, ConversionError> {
        let channels = output.channels as usize;
        let ratio = output.container_rate() as f64 / output.sample_rate;

        let resampler = if (ratio - 1.0).abs() < 1e-9 {
            None
        } else {
            Some(FastFixedIn::<f32>::new(
                ratio,
                1.1,
                PolynomialDegree::Cubic,
                chunk_frames.max(1),
                channels,
            )?)
        };
        let delay_remaining = resampler.as_ref().map_or(0, |r| r.output_delay());

        log::debug!(
            "converter: {} ch @ {} Hz -> {} ch @ {} Hz (residual ratio {ratio:.6})",
            input.channels,
            input.sample_rate,
            output.channels,
            output.container_rate()
        );

        Ok(Self {
            output: *output,
            resampler,
            ratio,
            pending: vec![Vec::new(); channels],
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// `true` when blocks are only re-tagged.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn output_format(&self) -> &AudioFormat {
        &self.output
    }

    /// Convert one block. The result may hold fewer frames than the input
    /// while the resampler fills its chunk.
    pub fn convert(&mut self, block: FrameBlock) -> Result<FrameBlock, ConversionError> {
        let channels = self.output.channels as usize;
        let planes = remix_channels(block.into_planes(), channels);
        let frames = planes.first().map_or(0, Vec::len);
        self.frames_in += frames as u64;

        let Some(resampler) = self.resampler.as_mut() else {
            self.frames_out += frames as u64;
            return Ok(FrameBlock::from_planes(self.output, planes));
        };

        for (pending, plane) in self.pending.iter_mut().zip(planes) {
            pending.extend(plane);
        }

        let mut produced: Vec<Vec<f32>> = vec![Vec::new(); channels];
        while self.pending[0].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|p| p.drain(..needed).collect())
                .collect();
            let out = resampler.process(&chunk, None)?;
            append_trimmed(&mut produced, out, &mut self.delay_remaining);
        }

        self.frames_out += produced[0].len() as u64;
        Ok(FrameBlock::from_planes(self.output, produced))
    }

    /// Drain buffered input and the delay line.
    ///
    /// Trims the total output to `round(frames_in × ratio)` frames. Returns
    /// `None` when nothing is left.
    pub fn flush(&mut self) -> Result<Option<FrameBlock>, ConversionError> {
        let channels = self.output.channels as usize;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };

        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let mut tail: Vec<Vec<f32>> = vec![Vec::new(); channels];

        if !self.pending[0].is_empty() {
            let pending = std::mem::replace(&mut self.pending, vec![Vec::new(); channels]);
            let out = resampler.process_partial(Some(pending.as_slice()), None)?;
            append_trimmed(&mut tail, out, &mut self.delay_remaining);
        }

        let mut passes = 0;
        while self.frames_out + (tail[0].len() as u64) < expected && passes < MAX_FLUSH_PASSES {
            let out = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
            append_trimmed(&mut tail, out, &mut self.delay_remaining);
            passes += 1;
        }

        let keep = expected.saturating_sub(self.frames_out) as usize;
        for plane in &mut tail {
            plane.truncate(keep);
        }
        self.frames_out += tail[0].len() as u64;

        if tail[0].is_empty() {
            Ok(None)
        } else {
            Ok(Some(FrameBlock::from_planes(self.output, tail)))
        }
    }
}

/// Append `out` to `dest`, first skipping `delay` leading frames.
fn append_trimmed(dest: &mut [Vec<f32>], out: Vec<Vec<f32>>, delay: &mut usize) {
    let frames = out.first().map_or(0, Vec::len);
    let skip = (*delay).min(frames);
    *delay -= skip;
    for (d, plane) in dest.iter_mut().zip(out) {
        d.extend_from_slice(&plane[skip..]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- channel mixing ----------------------------------------------------

    #[test]
    fn downmix_already_mono() {
        let input = vec![vec![0.1_f32, 0.2, 0.3]];
        assert_eq!(downmix_to_mono(&input), input[0]);
    }

    #[test]
    fn downmix_two_channel() {
        let out = downmix_to_mono(&[vec![1.0, 0.5], vec![-1.0, 0.5]]);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_no_channels() {
        assert!(downmix_to_mono(&[]).is_empty());
    }

    #[test]
    fn remix_mono_to_stereo_duplicates() {
        let out = remix_channels(vec![vec![0.3, 0.4]], 2);
        assert_eq!(out, vec![vec![0.3, 0.4], vec![0.3, 0.4]]);
    }

    #[test]
    fn remix_surround_to_stereo_drops_extra() {
        let planes = vec![vec![0.1], vec![0.2], vec![0.3], vec![0.4]];
        let out = remix_channels(planes, 2);
        assert_eq!(out, vec![vec![0.1], vec![0.2]]);
    }

    #[test]
    fn remix_same_layout_is_noop() {
        let planes = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        assert_eq!(remix_channels(planes.clone(), 2), planes);
    }

    // ---- StreamConverter ---------------------------------------------------

    #[test]
    fn integral_rate_is_passthrough() {
        let input = AudioFormat::pcm16(44_100.0, 1);
        let output = input.with_rate(33_075.0);
        let mut conv = StreamConverter::new(&input, &output, 4096).unwrap();
        assert!(conv.is_passthrough());

        let block = FrameBlock::from_planes(input, vec![vec![0.25; 4096]]);
        let out = conv.convert(block).unwrap();
        assert_eq!(out.frame_count(), 4096);
        assert_eq!(out.format().sample_rate, 33_075.0);
        assert!(out.plane(0).iter().all(|&s| s == 0.25));
        assert!(conv.flush().unwrap().is_none());
    }

    #[test]
    fn passthrough_remixes_channels() {
        let input = AudioFormat::pcm16(8_000.0, 2);
        let output = AudioFormat::pcm16(6_000.0, 1);
        let mut conv = StreamConverter::new(&input, &output, 4096).unwrap();

        let block = FrameBlock::from_planes(input, vec![vec![1.0; 10], vec![0.0; 10]]);
        let out = conv.convert(block).unwrap();
        assert_eq!(out.channel_count(), 1);
        assert!(out.plane(0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn fractional_rate_keeps_total_length() {
        // 22 050 × 0.75 = 16 537.5 Hz, written at 16 538 Hz.
        let input = AudioFormat::pcm16(22_050.0, 1);
        let output = input.with_rate(16_537.5);
        let mut conv = StreamConverter::new(&input, &output, 4096).unwrap();
        assert!(!conv.is_passthrough());

        let total_in = 22_050usize;
        let mut total_out = 0usize;
        let mut fed = 0usize;
        while fed < total_in {
            let n = (total_in - fed).min(4096);
            let block = FrameBlock::from_planes(input, vec![vec![0.1; n]]);
            total_out += conv.convert(block).unwrap().frame_count();
            fed += n;
        }
        if let Some(tail) = conv.flush().unwrap() {
            total_out += tail.frame_count();
        }

        let expected = (total_in as f64 * 16_538.0 / 16_537.5).round() as usize;
        assert_eq!(total_out, expected);
    }

    #[test]
    fn empty_stream_flushes_nothing() {
        let input = AudioFormat::pcm16(22_050.0, 2);
        let output = input.with_rate(16_537.5);
        let mut conv = StreamConverter::new(&input, &output, 4096).unwrap();
        assert!(conv.flush().unwrap().is_none());
    }
}
