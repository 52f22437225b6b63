//! Job coordination: the caller-facing boundary of the crate.
//!
//! # Architecture
//!
//! ```text
//! caller ── submit(input_uri) ──▶ JobCoordinator
//!                                   │  validate multiplier, check input exists
//!                                   ▼
//!                           tokio::spawn(run_job)        [Pending → Running]
//!                                   │
//!                                   ├─ DirectResampleEngine (spawn_blocking)
//!                                   └─ TimeStretchEngine    (graph threads)
//!                                   │
//!                                   ▼
//! caller ◀── JobHandle::wait() ── oneshot<CompletionResult>  [Completed | Failed]
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use slowdown::config::AppConfig;
//! use slowdown::job::JobCoordinator;
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = JobCoordinator::from_config(&AppConfig::default());
//!     let handle = coordinator.submit("/tmp/recording.wav");
//!     println!("job {} is {}", handle.id(), handle.state().label());
//!
//!     match handle.wait().await {
//!         Ok(done) => println!("{} ({:.2}s)", done.output_uri, done.duration_secs),
//!         Err(failure) => eprintln!("{failure}"),
//!     }
//! }
//! ```

pub mod naming;
pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use naming::{output_file_name, parse_input_uri, to_output_uri, InputLocation, OutputNamer};
pub use runner::{
    CompletedJob, CompletionResult, ErrorKind, JobCoordinator, JobFailure, JobHandle,
    ProcessingJob,
};
pub use state::{new_shared_status, InvalidTransition, JobState, JobStatus, SharedJobStatus};
