//! Processing units that sit between the graph's source and its tap.
//!
//! [`TimePitchUnit`] changes playback rate while holding pitch: it cuts the
//! input into Hann-windowed grains spaced `analysis_hop` apart and overlaps
//! them `synthesis_hop` apart on the output. With `rate < 1` the grains are
//! spread further apart than they were read, so the output is longer.

use crate::audio::{remix_channels, AudioFormat, FrameBlock, FRAME_BLOCK_CAPACITY};

use super::GraphError;

/// Output samples whose accumulated window weight is below this are zeroed.
const WEIGHT_FLOOR: f32 = 1e-3;

// ---------------------------------------------------------------------------
// AudioUnit
// ---------------------------------------------------------------------------

/// A streaming stage of a [`ProcessingGraph`](super::ProcessingGraph).
///
/// Units run on the graph's render thread and see blocks in file order.
/// Output goes to `emit` in order, one or more blocks per call, each no
/// larger than the unit's block size.
pub trait AudioUnit: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Consume one block, emitting whatever output is final.
    fn process(&mut self, block: FrameBlock, emit: &mut dyn FnMut(FrameBlock));

    /// Emit whatever is still buffered once the source is exhausted.
    fn flush(&mut self, emit: &mut dyn FnMut(FrameBlock));
}

// ---------------------------------------------------------------------------
// TimePitchUnit
// ---------------------------------------------------------------------------

/// Overlap-add time-stretcher.
pub struct TimePitchUnit {
    format: AudioFormat,
    rate: f64,
    window: Vec<f32>,
    synthesis_hop: usize,
    analysis_hop: f64,
    /// Unconsumed input, one plane per channel.
    input: Vec<Vec<f32>>,
    /// Position of the next grain inside `input`.
    read_pos: f64,
    /// Overlap accumulator; index 0 is the next output frame.
    acc: Vec<Vec<f32>>,
    weights: Vec<f32>,
    /// Finished output not yet emitted; never reaches `max_block` frames.
    pending: Vec<Vec<f32>>,
    max_block: usize,
    /// Output frames past this count are dropped.
    limit: u64,
    frames_in: u64,
    frames_out: u64,
}

impl std::fmt::Debug for TimePitchUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimePitchUnit")
            .field("rate", &self.rate)
            .field("window", &self.window.len())
            .field("max_block", &self.max_block)
            .field("frames_in", &self.frames_in)
            .field("frames_out", &self.frames_out)
            .finish_non_exhaustive()
    }
}

impl TimePitchUnit {
    /// Build a unit that plays `format` audio at `rate` × speed.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidRate`]: `rate` is not finite and positive.
    /// - [`GraphError::InvalidWindow`]: `window_frames` is not a positive
    ///   multiple of 4.
    pub fn new(format: AudioFormat, rate: f64, window_frames: usize) -> Result<Self, GraphError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(GraphError::InvalidRate(rate));
        }
        if window_frames < 4 || window_frames % 4 != 0 {
            return Err(GraphError::InvalidWindow(window_frames));
        }

        let channels = format.channels as usize;
        let synthesis_hop = window_frames / 4;

        Ok(Self {
            format,
            rate,
            window: hann_window(window_frames),
            synthesis_hop,
            analysis_hop: synthesis_hop as f64 * rate,
            input: vec![Vec::new(); channels],
            read_pos: 0.0,
            acc: vec![vec![0.0; window_frames]; channels],
            weights: vec![0.0; window_frames],
            pending: vec![Vec::new(); channels],
            max_block: FRAME_BLOCK_CAPACITY,
            limit: u64::MAX,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Cap emitted blocks at `frames` (default [`FRAME_BLOCK_CAPACITY`]).
    pub fn with_max_block(mut self, frames: usize) -> Self {
        self.max_block = frames.max(1);
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    /// Frames the unit will have produced once flushed.
    pub fn expected_output_frames(&self) -> u64 {
        (self.frames_in as f64 / self.rate).round() as u64
    }

    /// Overlap every grain that fits in the buffered input.
    fn run_grains(&mut self, emit: &mut dyn FnMut(FrameBlock)) {
        let n = self.window.len();
        loop {
            let start = self.read_pos.floor() as usize;
            if start + n > self.input[0].len() {
                break;
            }
            for (acc, input) in self.acc.iter_mut().zip(&self.input) {
                for (k, (a, &w)) in acc.iter_mut().zip(&self.window).enumerate() {
                    *a += input[start + k] * w;
                }
            }
            for (weight, &w) in self.weights.iter_mut().zip(&self.window) {
                *weight += w;
            }
            self.emit_hop(emit);
            self.read_pos += self.analysis_hop;
        }

        let consumed = (self.read_pos.floor() as usize).min(self.input[0].len());
        for plane in &mut self.input {
            plane.drain(..consumed);
        }
        self.read_pos -= consumed as f64;
    }

    /// Move the first `synthesis_hop` accumulated frames to `pending`.
    ///
    /// No later grain overlaps them, so they are final.
    fn emit_hop(&mut self, emit: &mut dyn FnMut(FrameBlock)) {
        let hop = self.synthesis_hop;
        let n = self.window.len();
        let keep = self.limit.saturating_sub(self.frames_out).min(hop as u64) as usize;
        for (acc, dest) in self.acc.iter_mut().zip(self.pending.iter_mut()) {
            for (k, &sample) in acc[..keep].iter().enumerate() {
                let w = self.weights[k];
                dest.push(if w > WEIGHT_FLOOR { sample / w } else { 0.0 });
            }
            acc.drain(..hop);
            acc.resize(n, 0.0);
        }
        self.weights.drain(..hop);
        self.weights.resize(n, 0.0);
        self.frames_out += keep as u64;

        while self.pending[0].len() >= self.max_block {
            let max_block = self.max_block;
            let planes: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..max_block).collect())
                .collect();
            emit(FrameBlock::from_planes(self.format, planes));
        }
    }

    /// Emit the partial block left in `pending`, if any.
    fn emit_pending(&mut self, emit: &mut dyn FnMut(FrameBlock)) {
        if self.pending[0].is_empty() {
            return;
        }
        let channels = self.pending.len();
        let planes = std::mem::replace(&mut self.pending, vec![Vec::new(); channels]);
        emit(FrameBlock::from_planes(self.format, planes));
    }
}

impl AudioUnit for TimePitchUnit {
    fn name(&self) -> &'static str {
        "time-pitch"
    }

    fn process(&mut self, block: FrameBlock, emit: &mut dyn FnMut(FrameBlock)) {
        if block.is_empty() {
            return;
        }
        let planes = remix_channels(block.into_planes(), self.format.channels as usize);
        self.frames_in += planes[0].len() as u64;
        for (input, plane) in self.input.iter_mut().zip(planes) {
            input.extend(plane);
        }

        self.run_grains(emit);
        self.emit_pending(emit);
    }

    fn flush(&mut self, emit: &mut dyn FnMut(FrameBlock)) {
        let expected = self.expected_output_frames();
        if self.frames_out >= expected {
            return;
        }

        let n = self.window.len();
        let remaining = (expected - self.frames_out) as usize;
        let passes_per_grain = 1 + (self.analysis_hop as usize) / n;
        let max_passes = 4 + (remaining / self.synthesis_hop + 1) * passes_per_grain;

        // Pad with silence until the last real input frame has passed
        // through a grain and enough output exists.
        self.limit = expected;
        let mut passes = 0;
        while self.frames_out < expected && passes < max_passes {
            for plane in &mut self.input {
                plane.resize(plane.len() + n, 0.0);
            }
            self.run_grains(emit);
            passes += 1;
        }
        self.emit_pending(emit);
    }
}

/// Periodic Hann window of `len` points.
fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / len as f64;
            (0.5 - 0.5 * phase.cos()) as f32
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` in `block`-frame chunks and collect every emitted block.
    fn run_blocks(
        unit: &mut TimePitchUnit,
        format: AudioFormat,
        planes: Vec<Vec<f32>>,
        block: usize,
    ) -> Vec<FrameBlock> {
        let mut blocks = Vec::new();
        let frames = planes[0].len();
        let mut start = 0;
        while start < frames {
            let end = (start + block).min(frames);
            let chunk = planes.iter().map(|p| p[start..end].to_vec()).collect();
            unit.process(FrameBlock::from_planes(format, chunk), &mut |b| blocks.push(b));
            start = end;
        }
        unit.flush(&mut |b| blocks.push(b));
        blocks
    }

    fn run_all(unit: &mut TimePitchUnit, format: AudioFormat, input: &[f32], block: usize) -> Vec<f32> {
        run_blocks(unit, format, vec![input.to_vec()], block)
            .iter()
            .flat_map(|b| b.plane(0).to_vec())
            .collect()
    }

    #[test]
    fn rejects_bad_parameters() {
        let fmt = AudioFormat::pcm16(44_100.0, 1);
        assert!(matches!(TimePitchUnit::new(fmt, 0.0, 1024), Err(GraphError::InvalidRate(_))));
        assert!(matches!(TimePitchUnit::new(fmt, 0.75, 1022), Err(GraphError::InvalidWindow(1022))));
        assert!(matches!(TimePitchUnit::new(fmt, 0.75, 0), Err(GraphError::InvalidWindow(0))));
    }

    #[test]
    fn slowdown_lengthens_by_inverse_rate() {
        let fmt = AudioFormat::pcm16(44_100.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 0.75, 1024).unwrap();
        let input = vec![0.1_f32; 88_200];
        let out = run_all(&mut unit, fmt, &input, 4096);
        assert_eq!(out.len(), 117_600);
    }

    #[test]
    fn speedup_shortens_output() {
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 2.0, 256).unwrap();
        let input = vec![0.1_f32; 8_000];
        let out = run_all(&mut unit, fmt, &input, 1000);
        assert_eq!(out.len(), 4_000);
    }

    #[test]
    fn constant_signal_keeps_amplitude() {
        let fmt = AudioFormat::pcm16(16_000.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 0.75, 512).unwrap();
        let input = vec![0.5_f32; 16_000];
        let out = run_all(&mut unit, fmt, &input, 4096);

        // Skip the ramp-in of the first grain and the zero-padded tail.
        for &s in &out[512..out.len() - 1024] {
            assert!((s - 0.5).abs() < 1e-4, "amplitude drift: {s}");
        }
    }

    #[test]
    fn unit_rate_reconstructs_input() {
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 1.0, 256).unwrap();
        let input: Vec<f32> = (0..8_000)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 8_000.0).sin() * 0.5)
            .collect();
        let out = run_all(&mut unit, fmt, &input, 700);
        assert_eq!(out.len(), input.len());
        for i in 256..7_000 {
            assert!((out[i] - input[i]).abs() < 1e-4, "frame {i}: {} vs {}", out[i], input[i]);
        }
    }

    #[test]
    fn stereo_channels_stay_independent() {
        let fmt = AudioFormat::pcm16(8_000.0, 2);
        let mut unit = TimePitchUnit::new(fmt, 0.5, 256).unwrap();
        let planes = vec![vec![0.25; 4_000], vec![-0.25; 4_000]];
        let mut left = Vec::new();
        let mut right = Vec::new();
        for b in run_blocks(&mut unit, fmt, planes, 4_000) {
            left.extend_from_slice(b.plane(0));
            right.extend_from_slice(b.plane(1));
        }
        assert_eq!(left.len(), 8_000);
        assert!(left[300..7_000].iter().all(|&s| (s - 0.25).abs() < 1e-4));
        assert!(right[300..7_000].iter().all(|&s| (s + 0.25).abs() < 1e-4));
    }

    #[test]
    fn empty_input_flushes_nothing() {
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 0.75, 256).unwrap();
        let mut emitted = 0;
        unit.process(FrameBlock::end_of_stream(fmt), &mut |_| emitted += 1);
        unit.flush(&mut |_| emitted += 1);
        assert_eq!(emitted, 0);
    }

    #[test]
    fn emitted_blocks_never_exceed_capacity() {
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let mut unit = TimePitchUnit::new(fmt, 0.1, 1024).unwrap();
        let blocks = run_blocks(&mut unit, fmt, vec![vec![0.2; 20_480]], FRAME_BLOCK_CAPACITY);

        let largest = blocks.iter().map(FrameBlock::frame_count).max().unwrap();
        assert!(largest <= FRAME_BLOCK_CAPACITY, "largest block {largest}");
        let total: usize = blocks.iter().map(FrameBlock::frame_count).sum();
        assert_eq!(total, 204_800);
    }

    #[test]
    fn max_block_is_configurable() {
        let fmt = AudioFormat::pcm16(8_000.0, 2);
        let mut unit = TimePitchUnit::new(fmt, 0.5, 256).unwrap().with_max_block(300);
        let planes = vec![vec![0.1; 2_000], vec![0.1; 2_000]];
        let blocks = run_blocks(&mut unit, fmt, planes, 1_000);

        assert!(blocks.iter().all(|b| b.frame_count() <= 300));
        assert_eq!(blocks.iter().map(FrameBlock::frame_count).sum::<usize>(), 4_000);
    }
}
