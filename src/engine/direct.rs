//! Direct resample engine.
//!
//! Re-tags every frame at `input rate × m`. Frame count is unchanged, so the
//! file plays `1/m` times longer with pitch shifted by the same factor. When
//! the new rate is fractional the container carries the rounded rate and the
//! converter resamples by the small residual ratio to keep duration exact.

use std::path::Path;

use async_trait::async_trait;

use crate::audio::{
    derive_output_format, open_for_read, open_for_write, AudioReader, AudioWriter,
    StreamConverter, Strategy, FRAME_BLOCK_CAPACITY,
};

use super::{EngineError, EngineReport, ProcessOutcome, TransformEngine, TransformRequest};

#[derive(Debug, Clone)]
pub struct DirectResampleEngine {
    block_frames: usize,
}

impl Default for DirectResampleEngine {
    fn default() -> Self {
        Self::new(FRAME_BLOCK_CAPACITY)
    }
}

impl DirectResampleEngine {
    pub fn new(block_frames: usize) -> Self {
        Self {
            block_frames: block_frames.max(1),
        }
    }

    /// Run the whole conversion on the calling thread.
    ///
    /// Only one input block and one output block are alive at a time.
    ///
    /// # Errors
    ///
    /// Returns the first container, negotiation or conversion failure. The
    /// output file may exist in a partial state afterwards.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        rate_multiplier: f64,
    ) -> Result<EngineReport, EngineError> {
        let mut reader = open_for_read(input)?;
        let in_format = reader.format();
        let out_format = derive_output_format(&in_format, rate_multiplier, Strategy::DirectResample)?;

        let mut writer = Box::new(open_for_write(output, &out_format)?);
        let mut converter = StreamConverter::new(&in_format, &out_format, self.block_frames)?;

        log::debug!(
            "direct: {} -> {} ({} Hz -> {:.3} Hz, {} frames{})",
            input.display(),
            output.display(),
            in_format.container_rate(),
            out_format.sample_rate,
            reader.total_frames(),
            if converter.is_passthrough() { ", relabel only" } else { "" }
        );

        loop {
            let block = reader.read_next(self.block_frames)?;
            if block.is_empty() {
                break;
            }
            let converted = converter.convert(block)?;
            if !converted.is_empty() {
                writer.write(&converted)?;
            }
        }
        if let Some(tail) = converter.flush()? {
            writer.write(&tail)?;
        }

        let frames_written = writer.finalize()?;

        Ok(EngineReport {
            strategy: Strategy::DirectResample,
            output_format: out_format,
            frames_written,
            outcome: ProcessOutcome::Complete,
        })
    }
}

#[async_trait]
impl TransformEngine for DirectResampleEngine {
    fn strategy(&self) -> Strategy {
        Strategy::DirectResample
    }

    async fn transform(&self, request: &TransformRequest) -> Result<EngineReport, EngineError> {
        let engine = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            engine.run(&request.input, &request.output, request.rate_multiplier)
        })
        .await?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures::{truncate_body, write_silence, write_sine};
    use crate::audio::{AudioFormat, ContainerError, FormatError, SampleKind};

    use tempfile::tempdir;

    #[test]
    fn slows_mono_pcm16_by_relabelling() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(44_100.0, 1), 88_200);

        let report = DirectResampleEngine::default().run(&input, &output, 0.75).unwrap();
        assert_eq!(report.output_format.container_rate(), 33_075);
        assert_eq!(report.frames_written, 88_200);
        assert!((report.duration_secs() - 8.0 / 3.0).abs() < 1e-3);

        let reader = open_for_read(&output).unwrap();
        assert_eq!(reader.format().container_rate(), 33_075);
        assert_eq!(reader.format().channels, 1);
        assert_eq!(reader.total_frames(), 88_200);
    }

    #[test]
    fn keeps_stereo_and_float_samples() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        let fmt = AudioFormat::new(48_000.0, 2, SampleKind::Float32);
        write_sine(&input, fmt, 24_000);

        let report = DirectResampleEngine::new(1024).run(&input, &output, 0.5).unwrap();
        let reader = open_for_read(&output).unwrap();
        assert_eq!(reader.format().channels, 2);
        assert_eq!(reader.format().sample_kind, SampleKind::Float32);
        assert_eq!(reader.format().container_rate(), 24_000);
        assert_eq!(report.frames_written, 24_000);
    }

    #[test]
    fn fractional_rate_keeps_duration() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(22_050.0, 1), 22_050);

        // 22050 × 0.77 = 16978.5 Hz, carried as 16979 Hz.
        let report = DirectResampleEngine::default().run(&input, &output, 0.77).unwrap();
        assert_eq!(report.output_format.container_rate(), 16_979);
        let secs = report.frames_written as f64 / 16_979.0;
        assert!((secs - 1.0 / 0.77).abs() < 1e-3, "duration {secs}");
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_silence(&input, AudioFormat::pcm16(16_000.0, 1), 0);

        let report = DirectResampleEngine::default().run(&input, &output, 0.75).unwrap();
        assert_eq!(report.frames_written, 0);
        assert!(output.exists());
    }

    #[test]
    fn truncated_body_fails_mid_stream() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        write_sine(&input, AudioFormat::pcm16(22_050.0, 1), 22_050);
        truncate_body(&input);

        // Relabel-only and resampled paths both stop at the missing data.
        for rate in [0.5, 0.77] {
            let output = dir.path().join(format!("out_{rate}.wav"));
            let err = DirectResampleEngine::default().run(&input, &output, rate).unwrap_err();
            assert!(matches!(err, EngineError::Container(ContainerError::Read(_))), "{err}");
        }
    }

    #[test]
    fn missing_input_is_not_found() {
        let dir = tempdir().unwrap();
        let err = DirectResampleEngine::default()
            .run(&dir.path().join("nope.wav"), &dir.path().join("out.wav"), 0.75)
            .unwrap_err();
        assert!(matches!(err, EngineError::Container(ContainerError::NotFound(_))));
    }

    #[test]
    fn bad_multiplier_fails_before_output_exists() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(8_000.0, 1), 800);

        let err = DirectResampleEngine::default().run(&input, &output, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::InvalidMultiplier(_))));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn transform_runs_off_the_runtime() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(16_000.0, 1), 16_000);

        let engine = DirectResampleEngine::default();
        assert_eq!(engine.strategy(), Strategy::DirectResample);
        let report = engine
            .transform(&TransformRequest {
                input,
                output: output.clone(),
                rate_multiplier: 0.75,
            })
            .await
            .unwrap();
        assert_eq!(report.output_format.container_rate(), 12_000);
        assert!(output.exists());
    }
}
