//! Job coordinator: accepts slow-down requests and runs each on its own task.
//!
//! # Job flow
//!
//! ```text
//! submit(input_uri)
//!   ├─ multiplier invalid   → Failed(UNSUPPORTED_FORMAT)   [no I/O]
//!   ├─ input missing        → Failed(FILE_NOT_FOUND)       [no output]
//!   ├─ no free output name  → Failed(CANNOT_CREATE)
//!   └─ tokio::spawn ─▶ Running ─▶ engine.transform()
//!                        ├─ Ok + output exists → Completed(output URI)
//!                        └─ Err / strict + truncated → remove output, Failed
//! ```
//!
//! Every job reports exactly one [`CompletionResult`] through its
//! [`JobHandle`]. Nothing is thrown once a job has been accepted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::audio::{validate_multiplier, ContainerError, Strategy};
use crate::config::{AppConfig, ProcessingConfig};
use crate::engine::{
    DirectResampleEngine, EngineError, EngineReport, ProcessOutcome, StretchSettings,
    TimeStretchEngine, TransformEngine, TransformRequest,
};

use super::naming::{parse_input_uri, to_output_uri, OutputNamer};
use super::state::{new_shared_status, JobState, SharedJobStatus};

// ---------------------------------------------------------------------------
// ErrorKind / JobFailure
// ---------------------------------------------------------------------------

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    FileNotFound,
    UnsupportedFormat,
    CannotCreate,
    WriteError,
    ConversionError,
    ProcessingError,
    /// Output was truncated and the coordinator runs in strict mode.
    PartialResult,
}

impl ErrorKind {
    /// Stable code for logs and machine-readable output.
    ///
    /// ```
    /// use slowdown::job::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::FileNotFound.code(), "FILE_NOT_FOUND");
    /// assert_eq!(ErrorKind::PartialResult.code(), "PARTIAL_RESULT");
    /// ```
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorKind::CannotCreate => "CANNOT_CREATE",
            ErrorKind::WriteError => "WRITE_ERROR",
            ErrorKind::ConversionError => "CONVERSION_ERROR",
            ErrorKind::ProcessingError => "PROCESSING_ERROR",
            ErrorKind::PartialResult => "PARTIAL_RESULT",
        }
    }
}

impl From<&EngineError> for ErrorKind {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Container(ContainerError::NotFound(_)) => ErrorKind::FileNotFound,
            EngineError::Container(ContainerError::FormatUnsupported { .. }) => {
                ErrorKind::UnsupportedFormat
            }
            EngineError::Container(ContainerError::CannotCreate { .. }) => ErrorKind::CannotCreate,
            EngineError::Container(
                ContainerError::Write(_) | ContainerError::ChannelMismatch { .. },
            ) => ErrorKind::WriteError,
            EngineError::Container(ContainerError::Read(_)) => ErrorKind::ProcessingError,
            EngineError::Format(_) => ErrorKind::UnsupportedFormat,
            EngineError::Conversion(_) => ErrorKind::ConversionError,
            EngineError::Graph(_) | EngineError::Processing(_) | EngineError::Internal(_) => {
                ErrorKind::ProcessingError
            }
        }
    }
}

/// The failure half of a [`CompletionResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&EngineError> for JobFailure {
    fn from(e: &EngineError) -> Self {
        Self::new(ErrorKind::from(e), e.to_string())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for JobFailure {}

// ---------------------------------------------------------------------------
// CompletedJob / CompletionResult
// ---------------------------------------------------------------------------

/// The success half of a [`CompletionResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedJob {
    pub job_id: u64,
    /// Output reference in the same form (path or `file://` URI) as the input.
    pub output_uri: String,
    #[serde(skip)]
    pub output_path: PathBuf,
    pub strategy: Strategy,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
    pub duration_secs: f64,
    pub outcome: ProcessOutcome,
}

pub type CompletionResult = Result<CompletedJob, JobFailure>;

// ---------------------------------------------------------------------------
// ProcessingJob
// ---------------------------------------------------------------------------

/// One accepted transform request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: u64,
    pub input: PathBuf,
    pub output: PathBuf,
    pub rate_multiplier: f64,
    pub strategy: Strategy,
    /// Whether the input was given as a `file://` URI.
    pub uri_input: bool,
}

impl ProcessingJob {
    fn request(&self) -> TransformRequest {
        TransformRequest {
            input: self.input.clone(),
            output: self.output.clone(),
            rate_multiplier: self.rate_multiplier,
        }
    }
}

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// Caller-side view of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    status: SharedJobStatus,
    result: oneshot::Receiver<CompletionResult>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot of the job's current state.
    pub fn state(&self) -> JobState {
        self.status
            .lock()
            .map(|status| status.state)
            .unwrap_or(JobState::Failed)
    }

    pub fn status(&self) -> SharedJobStatus {
        Arc::clone(&self.status)
    }

    /// Wait for the job's single completion report.
    pub async fn wait(self) -> CompletionResult {
        self.result.await.unwrap_or_else(|_| {
            Err(JobFailure::new(
                ErrorKind::ProcessingError,
                "job ended without reporting a result",
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// JobCoordinator
// ---------------------------------------------------------------------------

/// Dispatches slow-down jobs to the configured engine.
///
/// ```rust,no_run
/// use slowdown::config::AppConfig;
/// use slowdown::job::JobCoordinator;
///
/// # async fn example() {
/// let coordinator = JobCoordinator::from_config(&AppConfig::default());
/// match coordinator.slow_down("file:///tmp/recording.wav").await {
///     Ok(uri) => println!("slowed copy at {uri}"),
///     Err(failure) => eprintln!("{failure}"),
/// }
/// # }
/// ```
pub struct JobCoordinator {
    settings: ProcessingConfig,
    output_dir: PathBuf,
    direct: Arc<dyn TransformEngine>,
    stretch: Arc<dyn TransformEngine>,
    namer: OutputNamer,
    next_id: AtomicU64,
}

impl JobCoordinator {
    /// Create a coordinator with explicit engines.
    ///
    /// # Arguments
    ///
    /// * `settings`: rate multiplier, strategy and strictness for every job.
    /// * `output_dir`: where `processed_<ms>.wav` files are created.
    /// * `direct`: engine for [`Strategy::DirectResample`].
    /// * `stretch`: engine for [`Strategy::TimeStretch`].
    pub fn new(
        settings: ProcessingConfig,
        output_dir: PathBuf,
        direct: Arc<dyn TransformEngine>,
        stretch: Arc<dyn TransformEngine>,
    ) -> Self {
        Self {
            settings,
            output_dir,
            direct,
            stretch,
            namer: OutputNamer::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.processing.clone(),
            config.output_dir(),
            Arc::new(DirectResampleEngine::new(config.processing.block_frames)),
            Arc::new(TimeStretchEngine::new(StretchSettings::from_config(config))),
        )
    }

    pub fn settings(&self) -> &ProcessingConfig {
        &self.settings
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Accept a job and start it on the runtime.
    ///
    /// Must be called from within a tokio runtime. Never fails directly:
    /// rejections arrive through [`JobHandle::wait`].
    pub fn submit(&self, input_uri: &str) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let status = new_shared_status();
        let (tx, rx) = oneshot::channel();
        let handle = JobHandle {
            id,
            status: Arc::clone(&status),
            result: rx,
        };

        let rate_multiplier = self.settings.rate_multiplier;
        if let Err(e) = validate_multiplier(rate_multiplier) {
            reject(id, &status, tx, JobFailure::new(ErrorKind::UnsupportedFormat, e.to_string()));
            return handle;
        }

        let location = parse_input_uri(input_uri);
        if !location.path.is_file() {
            reject(
                id,
                &status,
                tx,
                JobFailure::new(
                    ErrorKind::FileNotFound,
                    format!("Input audio file not found: {}", location.path.display()),
                ),
            );
            return handle;
        }

        let output = match self.namer.reserve_path(&self.output_dir) {
            Ok(path) => path,
            Err(e) => {
                reject(
                    id,
                    &status,
                    tx,
                    JobFailure::new(
                        ErrorKind::CannotCreate,
                        format!("Cannot create output in {}: {e}", self.output_dir.display()),
                    ),
                );
                return handle;
            }
        };

        let job = ProcessingJob {
            id,
            input: location.path,
            output,
            rate_multiplier,
            strategy: self.settings.strategy,
            uri_input: location.had_scheme,
        };
        let engine = match job.strategy {
            Strategy::DirectResample => Arc::clone(&self.direct),
            Strategy::TimeStretch => Arc::clone(&self.stretch),
        };
        let strict = self.settings.strict_completion;

        tokio::spawn(async move {
            let result = run_job(job, engine, status, strict).await;
            if tx.send(result).is_err() {
                log::debug!("job {id}: caller dropped its handle");
            }
        });

        handle
    }

    /// Slow down one file; resolves to the output reference.
    pub async fn slow_down(&self, input_uri: &str) -> Result<String, JobFailure> {
        self.submit(input_uri)
            .wait()
            .await
            .map(|done| done.output_uri)
    }
}

// ---------------------------------------------------------------------------
// Job task
// ---------------------------------------------------------------------------

async fn run_job(
    job: ProcessingJob,
    engine: Arc<dyn TransformEngine>,
    status: SharedJobStatus,
    strict: bool,
) -> CompletionResult {
    set_state(job.id, &status, JobState::Running);
    log::debug!(
        "job {}: {} -> {} ({}, rate {})",
        job.id,
        job.input.display(),
        job.output.display(),
        job.strategy.label(),
        job.rate_multiplier
    );

    // The engine runs on its own task so a panic still ends the job.
    let request = job.request();
    let transform = tokio::spawn(async move { engine.transform(&request).await });
    let result = match transform.await {
        Ok(Ok(report)) => accept(&job, report, strict),
        Ok(Err(e)) => Err(JobFailure::from(&e)),
        Err(e) => Err(JobFailure::new(
            ErrorKind::ProcessingError,
            format!("Engine task aborted: {e}"),
        )),
    };

    match &result {
        Ok(done) => {
            if let Ok(mut st) = status.lock() {
                st.output = Some(done.output_path.clone());
                st.outcome = Some(done.outcome);
            }
            set_state(job.id, &status, JobState::Completed);
            if done.outcome.is_complete() {
                log::info!(
                    "job {}: completed {} ({} frames, {:.3}s)",
                    job.id,
                    done.output_uri,
                    done.frames,
                    done.duration_secs
                );
            } else {
                log::warn!(
                    "job {}: completed with truncated output {} ({:?})",
                    job.id,
                    done.output_uri,
                    done.outcome
                );
            }
        }
        Err(failure) => {
            remove_partial_output(job.id, &job.output).await;
            if let Ok(mut st) = status.lock() {
                st.error_message = Some(failure.message.clone());
            }
            set_state(job.id, &status, JobState::Failed);
            log::error!("job {}: failed: {failure}", job.id);
        }
    }

    result
}

/// Post-conditions on a report the engine called a success.
fn accept(job: &ProcessingJob, report: EngineReport, strict: bool) -> CompletionResult {
    let written = std::fs::metadata(&job.output)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !written {
        return Err(JobFailure::new(
            ErrorKind::ProcessingError,
            "Output file was not created",
        ));
    }
    if strict {
        if let ProcessOutcome::Truncated(reason) = report.outcome {
            return Err(JobFailure::new(
                ErrorKind::PartialResult,
                format!("Output was truncated ({reason:?})"),
            ));
        }
    }

    Ok(CompletedJob {
        job_id: job.id,
        output_uri: to_output_uri(&job.output, job.uri_input),
        output_path: job.output.clone(),
        strategy: report.strategy,
        sample_rate: report.output_format.container_rate(),
        channels: report.output_format.channels,
        frames: report.frames_written,
        duration_secs: report.duration_secs(),
        outcome: report.outcome,
    })
}

fn reject(
    id: u64,
    status: &SharedJobStatus,
    tx: oneshot::Sender<CompletionResult>,
    failure: JobFailure,
) {
    log::warn!("job {id}: rejected: {failure}");
    if let Ok(mut st) = status.lock() {
        st.error_message = Some(failure.message.clone());
    }
    set_state(id, status, JobState::Failed);
    let _ = tx.send(Err(failure));
}

fn set_state(id: u64, status: &SharedJobStatus, next: JobState) {
    if let Ok(mut st) = status.lock() {
        if let Err(e) = st.transition(next) {
            log::error!("job {id}: {e}");
        }
    }
}

async fn remove_partial_output(id: u64, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("job {id}: removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("job {id}: could not remove {}: {e}", path.display()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
