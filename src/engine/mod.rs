//! Transform engines: the two ways a file gets slowed down.
//!
//! | Engine                  | Pitch   | Output rate     | Work happens on          |
//! |-------------------------|---------|-----------------|--------------------------|
//! | [`DirectResampleEngine`]| shifts  | input rate × m  | one blocking task        |
//! | [`TimeStretchEngine`]   | kept    | input rate      | graph threads + a waiter |
//!
//! Both implement [`TransformEngine`] so the job coordinator can hold either
//! behind `Arc<dyn TransformEngine>`.

pub mod direct;
pub mod stretch;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::audio::{AudioFormat, ContainerError, ConversionError, FormatError, Strategy};
use crate::graph::GraphError;

pub use direct::DirectResampleEngine;
pub use stretch::{completion_deadline, StretchSettings, TimeStretchEngine};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors that end a transform without a usable output.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Processing graph failed: {0}")]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Processing(String),

    /// A blocking task panicked or was cancelled.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Internal(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub rate_multiplier: f64,
}

/// Why a time-stretch output ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    /// Completion was not observed before the deadline.
    Timeout,
    /// Appending to the output failed; later audio was dropped.
    WriteFailed,
}

/// Whether the output holds the whole transformed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum ProcessOutcome {
    Complete,
    Truncated(TruncationReason),
}

impl ProcessOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ProcessOutcome::Complete)
    }
}

/// What a finished transform produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    pub strategy: Strategy,
    pub output_format: AudioFormat,
    pub frames_written: u64,
    pub outcome: ProcessOutcome,
}

impl EngineReport {
    pub fn duration_secs(&self) -> f64 {
        self.output_format.frames_to_secs(self.frames_written)
    }
}

// ---------------------------------------------------------------------------
// TransformEngine trait
// ---------------------------------------------------------------------------

/// Turns one input file into one output file at the requested rate.
///
/// Implementors must be `Send + Sync` so they can be shared across jobs
/// (e.g. wrapped in `Arc<dyn TransformEngine>`). Blocking file work must be
/// moved off the async runtime.
#[async_trait]
pub trait TransformEngine: Send + Sync {
    fn strategy(&self) -> Strategy;

    async fn transform(&self, request: &TransformRequest) -> Result<EngineReport, EngineError>;
}
