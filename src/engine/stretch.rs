//! Graph-based time-stretch engine.
//!
//! # Flow
//!
//! ```text
//! open input / negotiate / open output      (spawn_blocking)
//!        │
//!        ▼
//! ProcessingGraph: FilePlayer → TimePitchUnit → tap ──▶ writer
//!        │                                        (stop flag checked first)
//!        ▼
//! await completion  ──▶ sleep(grace) ──▶ stop
//!        └── or deadline = duration / rate + margin ──▶ stop (truncated)
//!        │
//!        ▼
//! stop graph, remove tap, finalize writer    (spawn_blocking)
//! ```
//!
//! The player reports completion when the source is drained, which is before
//! the last stretched block reaches the tap. The grace period covers that gap.
//! The stop flag guarantees no write can land after teardown begins.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::audio::{
    derive_output_format, open_for_read, open_for_write, AudioReader, AudioWriter, Strategy,
    FRAME_BLOCK_CAPACITY,
};
use crate::config::AppConfig;
use crate::graph::{PlaybackEnd, ProcessingGraph, TimePitchUnit};

use super::{
    EngineError, EngineReport, ProcessOutcome, TransformEngine, TransformRequest,
    TruncationReason,
};

/// Shared slot for the output writer; emptied at teardown.
type WriterSlot = Arc<Mutex<Option<Box<dyn AudioWriter>>>>;

// ---------------------------------------------------------------------------
// StretchSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StretchSettings {
    pub block_frames: usize,
    pub window_frames: usize,
    /// Wait after completion before tearing down, so in-flight blocks land.
    pub grace: Duration,
    /// Added to the expected playback time to form the hard deadline.
    pub safety_margin: Duration,
}

impl Default for StretchSettings {
    fn default() -> Self {
        Self {
            block_frames: FRAME_BLOCK_CAPACITY,
            window_frames: 1024,
            grace: Duration::from_millis(500),
            safety_margin: Duration::from_secs(3),
        }
    }
}

impl StretchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            block_frames: config.processing.block_frames,
            window_frames: config.stretch.window_frames,
            grace: Duration::from_millis(config.stretch.grace_ms),
            safety_margin: Duration::from_secs_f64(config.stretch.safety_margin_secs.max(0.0)),
        }
    }
}

/// Longest time to wait for the graph: `duration / rate + margin`.
///
/// ```
/// use std::time::Duration;
/// use slowdown::engine::completion_deadline;
///
/// let d = completion_deadline(4.0, 0.75, Duration::from_secs(3));
/// assert_eq!(d.as_millis(), 8_333);
/// ```
pub fn completion_deadline(duration_secs: f64, rate: f64, margin: Duration) -> Duration {
    let playback = if rate > 0.0 && duration_secs.is_finite() {
        (duration_secs / rate).max(0.0)
    } else {
        0.0
    };
    Duration::try_from_secs_f64(playback)
        .unwrap_or(Duration::MAX)
        .saturating_add(margin)
}

// ---------------------------------------------------------------------------
// TimeStretchEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TimeStretchEngine {
    settings: StretchSettings,
}

impl TimeStretchEngine {
    pub fn new(settings: StretchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StretchSettings {
        &self.settings
    }

    /// Stretch `input` into `output`.
    ///
    /// Failing to open either file is reported as a processing failure; a
    /// multiplier the negotiator rejects keeps its format error.
    pub async fn stretch_file(
        &self,
        input: &Path,
        output: &Path,
        rate: f64,
    ) -> Result<EngineReport, EngineError> {
        let (input_owned, output_owned) = (input.to_path_buf(), output.to_path_buf());
        let (reader, writer) = tokio::task::spawn_blocking(move || -> Result<_, EngineError> {
            let reader = open_for_read(&input_owned)
                .map_err(|e| EngineError::Processing(format!("Failed to open input: {e}")))?;
            let format = derive_output_format(&reader.format(), rate, Strategy::TimeStretch)?;
            let writer = open_for_write(&output_owned, &format)
                .map_err(|e| EngineError::Processing(format!("Failed to create output: {e}")))?;
            Ok((reader, writer))
        })
        .await??;

        let report = self
            .stretch_stream(Box::new(reader), Box::new(writer), rate)
            .await?;

        let written = tokio::fs::metadata(output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(EngineError::Processing("Output file was not created".into()));
        }
        Ok(report)
    }

    /// Run `reader` through the graph into `writer` at `rate` × speed.
    ///
    /// Returns `Truncated` rather than an error when completion is not seen
    /// in time or a write fails; whatever reached the writer is kept.
    pub async fn stretch_stream(
        &self,
        reader: Box<dyn AudioReader>,
        writer: Box<dyn AudioWriter>,
        rate: f64,
    ) -> Result<EngineReport, EngineError> {
        let format = writer.format();
        let deadline = completion_deadline(reader.duration_secs(), rate, self.settings.safety_margin);

        log::debug!(
            "stretch: {} frames @ {} Hz, rate {rate}, deadline {:.3}s",
            reader.total_frames(),
            format.container_rate(),
            deadline.as_secs_f64()
        );

        let writer: WriterSlot = Arc::new(Mutex::new(Some(writer)));
        let stop_writing = Arc::new(AtomicBool::new(false));
        let write_failed = Arc::new(AtomicBool::new(false));

        let mut graph = ProcessingGraph::new(format, self.settings.block_frames);
        graph.attach(
            TimePitchUnit::new(format, rate, self.settings.window_frames)?
                .with_max_block(self.settings.block_frames),
        )?;
        {
            let writer = Arc::clone(&writer);
            let stop_writing = Arc::clone(&stop_writing);
            let write_failed = Arc::clone(&write_failed);
            graph.install_tap(move |block| {
                if stop_writing.load(Ordering::Acquire) {
                    return;
                }
                let Ok(mut slot) = writer.lock() else {
                    return;
                };
                let Some(out) = slot.as_mut() else {
                    return;
                };
                if let Err(e) = out.write(block) {
                    log::error!("stretch: write failed, dropping remaining audio: {e}");
                    stop_writing.store(true, Ordering::Release);
                    write_failed.store(true, Ordering::Release);
                }
            });
        }

        let (done_tx, done_rx) = oneshot::channel::<PlaybackEnd>();
        graph.schedule_file(reader, move |end| {
            let _ = done_tx.send(end);
        })?;
        graph.start()?;
        graph.play()?;

        let grace = self.settings.grace;
        let wait = async move {
            match done_rx.await {
                Ok(end) => {
                    if end == PlaybackEnd::Exhausted {
                        tokio::time::sleep(grace).await;
                    }
                    end
                }
                // The handler was dropped unfired; only the deadline can end this.
                Err(_) => std::future::pending().await,
            }
        };
        let ended = tokio::time::timeout(deadline, wait).await;

        stop_writing.store(true, Ordering::Release);
        let timed_out = ended.is_err();
        tokio::task::spawn_blocking(move || {
            // A timed-out source may be stuck in a read; joining it would
            // outlive the deadline.
            if timed_out {
                graph.abandon();
            } else {
                graph.stop();
            }
            graph.remove_tap();
        })
        .await?;

        let writer = match writer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let writer = writer.ok_or_else(|| EngineError::Internal("output writer missing".into()))?;
        let frames_written = tokio::task::spawn_blocking(move || writer.finalize()).await??;

        let outcome = match ended {
            Ok(PlaybackEnd::ReadFailed(reason)) => {
                return Err(EngineError::Processing(format!("Reading input failed: {reason}")));
            }
            _ if write_failed.load(Ordering::Acquire) => {
                ProcessOutcome::Truncated(TruncationReason::WriteFailed)
            }
            Ok(_) => ProcessOutcome::Complete,
            Err(_) => {
                log::warn!(
                    "stretch: completion not observed within {:.3}s, output truncated",
                    deadline.as_secs_f64()
                );
                ProcessOutcome::Truncated(TruncationReason::Timeout)
            }
        };

        log::debug!("stretch: wrote {frames_written} frames ({outcome:?})");

        Ok(EngineReport {
            strategy: Strategy::TimeStretch,
            output_format: format,
            frames_written,
            outcome,
        })
    }
}

#[async_trait]
impl TransformEngine for TimeStretchEngine {
    fn strategy(&self) -> Strategy {
        Strategy::TimeStretch
    }

    async fn transform(&self, request: &TransformRequest) -> Result<EngineReport, EngineError> {
        self.stretch_file(&request.input, &request.output, request.rate_multiplier)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures::write_sine;
    use crate::audio::{AudioFormat, ContainerError, FormatError, FrameBlock};

    use std::time::Instant;
    use tempfile::tempdir;

    fn quick_settings() -> StretchSettings {
        StretchSettings {
            grace: Duration::from_millis(200),
            safety_margin: Duration::from_millis(500),
            ..StretchSettings::default()
        }
    }

    /// Claims a short duration but never reaches end of stream.
    struct EndlessReader {
        format: AudioFormat,
    }

    impl AudioReader for EndlessReader {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn total_frames(&self) -> u64 {
            (self.format.sample_rate * 0.3) as u64
        }

        fn read_next(&mut self, capacity: usize) -> Result<FrameBlock, ContainerError> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(FrameBlock::from_planes(self.format, vec![vec![0.1; capacity]]))
        }
    }

    /// Accepts `limit` frames, then fails every write.
    struct FailingWriter {
        format: AudioFormat,
        limit: u64,
        written: u64,
    }

    impl AudioWriter for FailingWriter {
        fn format(&self) -> AudioFormat {
            self.format
        }

        fn write(&mut self, block: &FrameBlock) -> Result<(), ContainerError> {
            if self.written >= self.limit {
                return Err(ContainerError::Write("disk full".into()));
            }
            self.written += block.frame_count() as u64;
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.written
        }

        fn finalize(self: Box<Self>) -> Result<u64, ContainerError> {
            Ok(self.written)
        }
    }

    #[test]
    fn deadline_covers_playback_plus_margin() {
        let d = completion_deadline(4.0, 0.75, Duration::from_secs(3));
        assert!((d.as_secs_f64() - (4.0 / 0.75 + 3.0)).abs() < 1e-6);
        assert_eq!(completion_deadline(0.0, 0.75, Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(completion_deadline(1.0, 0.0, Duration::ZERO), Duration::ZERO);
        assert_eq!(completion_deadline(2.0, 1e-20, Duration::from_secs(3)), Duration::MAX);
    }

    #[tokio::test]
    async fn stretches_mono_file_to_expected_length() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(44_100.0, 1), 88_200);

        let engine = TimeStretchEngine::new(quick_settings());
        let report = engine.stretch_file(&input, &output, 0.75).await.unwrap();

        assert_eq!(report.outcome, ProcessOutcome::Complete);
        assert_eq!(report.output_format.container_rate(), 44_100);
        assert_eq!(report.frames_written, 117_600);

        let reader = open_for_read(&output).unwrap();
        assert_eq!(reader.format().container_rate(), 44_100);
        assert_eq!(reader.format().channels, 1);
        let secs = reader.duration_secs();
        assert!((secs - 2.0 / 0.75).abs() < 0.05, "duration {secs}");
    }

    #[tokio::test]
    async fn stereo_layout_is_preserved() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_sine(&input, AudioFormat::pcm16(22_050.0, 2), 22_050);

        let engine = TimeStretchEngine::new(quick_settings());
        let report = engine.stretch_file(&input, &output, 0.5).await.unwrap();
        assert_eq!(report.frames_written, 44_100);
        assert_eq!(open_for_read(&output).unwrap().format().channels, 2);
    }

    #[tokio::test]
    async fn missing_input_is_a_processing_failure() {
        let dir = tempdir().unwrap();
        let err = TimeStretchEngine::default()
            .stretch_file(&dir.path().join("nope.wav"), &dir.path().join("out.wav"), 0.75)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Processing(_)), "{err}");
    }

    #[tokio::test]
    async fn bad_multiplier_keeps_format_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        write_sine(&input, AudioFormat::pcm16(8_000.0, 1), 800);

        let err = TimeStretchEngine::default()
            .stretch_file(&input, &dir.path().join("out.wav"), -1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Format(FormatError::InvalidMultiplier(_))));
    }

    #[tokio::test]
    async fn hung_source_is_cut_off_at_deadline() {
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let reader = EndlessReader { format: fmt };
        let writer = FailingWriter {
            format: fmt,
            limit: u64::MAX,
            written: 0,
        };

        let engine = TimeStretchEngine::new(quick_settings());
        let started = Instant::now();
        let report = engine
            .stretch_stream(Box::new(reader), Box::new(writer), 0.75)
            .await
            .unwrap();

        // 0.3 s / 0.75 + 0.5 s margin = 0.9 s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
        assert_eq!(report.outcome, ProcessOutcome::Truncated(TruncationReason::Timeout));
        assert!(report.frames_written > 0);
    }

    #[tokio::test]
    async fn blocked_read_does_not_outlast_deadline() {
        /// Serves one block, then stalls inside the next read.
        struct StallingReader {
            format: AudioFormat,
            reads: usize,
        }

        impl AudioReader for StallingReader {
            fn format(&self) -> AudioFormat {
                self.format
            }

            fn total_frames(&self) -> u64 {
                (self.format.sample_rate * 0.3) as u64
            }

            fn read_next(&mut self, capacity: usize) -> Result<FrameBlock, ContainerError> {
                self.reads += 1;
                if self.reads > 1 {
                    std::thread::sleep(Duration::from_secs(6));
                }
                Ok(FrameBlock::from_planes(self.format, vec![vec![0.1; capacity]]))
            }
        }

        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let reader = StallingReader { format: fmt, reads: 0 };
        let writer = FailingWriter {
            format: fmt,
            limit: u64::MAX,
            written: 0,
        };

        let engine = TimeStretchEngine::new(quick_settings());
        let started = Instant::now();
        let report = engine
            .stretch_stream(Box::new(reader), Box::new(writer), 0.75)
            .await
            .unwrap();

        // Deadline is 0.9 s; the stalled read would hold a join for 6 s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
        assert_eq!(report.outcome, ProcessOutcome::Truncated(TruncationReason::Timeout));
        assert!(report.frames_written > 0);
    }

    #[tokio::test]
    async fn write_failure_truncates_instead_of_failing() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        write_sine(&input, AudioFormat::pcm16(16_000.0, 1), 32_000);
        let reader = open_for_read(&input).unwrap();
        let writer = FailingWriter {
            format: reader.format(),
            limit: 4_000,
            written: 0,
        };

        let engine = TimeStretchEngine::new(quick_settings());
        let report = engine
            .stretch_stream(Box::new(reader), Box::new(writer), 0.75)
            .await
            .unwrap();

        assert_eq!(report.outcome, ProcessOutcome::Truncated(TruncationReason::WriteFailed));
        assert!(report.frames_written >= 4_000);
        assert!(report.frames_written < 42_667);
    }

    #[tokio::test]
    async fn zero_length_input_completes_empty() {
        struct Empty(AudioFormat);
        impl AudioReader for Empty {
            fn format(&self) -> AudioFormat {
                self.0
            }
            fn total_frames(&self) -> u64 {
                0
            }
            fn read_next(&mut self, _: usize) -> Result<FrameBlock, ContainerError> {
                Ok(FrameBlock::end_of_stream(self.0))
            }
        }
        let fmt = AudioFormat::pcm16(8_000.0, 1);
        let writer = FailingWriter {
            format: fmt,
            limit: u64::MAX,
            written: 0,
        };
        let report = TimeStretchEngine::new(quick_settings())
            .stretch_stream(Box::new(Empty(fmt)), Box::new(writer), 0.75)
            .await
            .unwrap();
        assert_eq!(report.outcome, ProcessOutcome::Complete);
        assert_eq!(report.frames_written, 0);
    }
}
