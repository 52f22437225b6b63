//! WAV fixtures for tests.

use std::fs::OpenOptions;
use std::path::Path;

use hound::WavWriter;

use super::container::quantize;
use super::format::{AudioFormat, SampleKind};

/// Write `frames` frames of a 440 Hz sine at half scale.
pub(crate) fn write_sine(path: &Path, format: AudioFormat, frames: usize) {
    write_with(path, format, frames, |i| {
        let t = i as f64 / format.sample_rate;
        (0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as f32
    });
}

/// Write `frames` frames of silence.
pub(crate) fn write_silence(path: &Path, format: AudioFormat, frames: usize) {
    write_with(path, format, frames, |_| 0.0);
}

fn write_with(path: &Path, format: AudioFormat, frames: usize, signal: impl Fn(usize) -> f32) {
    let mut writer = WavWriter::create(path, format.to_wav_spec()).expect("create fixture");
    for i in 0..frames {
        let sample = signal(i);
        for _ in 0..format.channels {
            match format.sample_kind {
                SampleKind::Float32 => writer.write_sample(sample).expect("write"),
                SampleKind::Int { bits } => writer
                    .write_sample(quantize(sample, bits))
                    .expect("write"),
            }
        }
    }
    writer.finalize().expect("finalize fixture");
}

/// Cut the file to half its length, leaving the header's data size intact.
pub(crate) fn truncate_body(path: &Path) {
    let file = OpenOptions::new().write(true).open(path).expect("open fixture");
    let len = file.metadata().expect("fixture metadata").len();
    file.set_len(len / 2).expect("truncate fixture");
}
