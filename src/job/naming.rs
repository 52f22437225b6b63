//! Input URI parsing and output file naming.
//!
//! Outputs are named `processed_<ms>.wav`, where `<ms>` is wall-clock
//! milliseconds forced to increase strictly per [`OutputNamer`], so two jobs
//! started in the same millisecond never share a file. Across namers (other
//! coordinators, other processes) [`OutputNamer::reserve_path`] claims the
//! name with an exclusive create and moves on to the next stamp if it is taken.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const FILE_SCHEME: &str = "file://";
pub const OUTPUT_PREFIX: &str = "processed_";
pub const OUTPUT_EXTENSION: &str = "wav";

/// Names tried by [`OutputNamer::reserve_path`] before giving up.
const RESERVE_ATTEMPTS: usize = 1_000;

/// A local path plus whether the caller addressed it as a `file://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLocation {
    pub path: PathBuf,
    pub had_scheme: bool,
}

/// Split an input reference into a filesystem path.
///
/// ```
/// use slowdown::job::parse_input_uri;
///
/// let loc = parse_input_uri("file:///tmp/a.wav");
/// assert_eq!(loc.path.to_str(), Some("/tmp/a.wav"));
/// assert!(loc.had_scheme);
///
/// assert!(!parse_input_uri("/tmp/a.wav").had_scheme);
/// ```
pub fn parse_input_uri(uri: &str) -> InputLocation {
    match uri.strip_prefix(FILE_SCHEME) {
        Some(rest) => InputLocation {
            path: PathBuf::from(rest),
            had_scheme: true,
        },
        None => InputLocation {
            path: PathBuf::from(uri),
            had_scheme: false,
        },
    }
}

/// Render `path` the way the input was addressed.
pub fn to_output_uri(path: &Path, with_scheme: bool) -> String {
    if with_scheme {
        format!("{FILE_SCHEME}{}", path.display())
    } else {
        path.display().to_string()
    }
}

pub fn output_file_name(stamp_ms: u64) -> String {
    format!("{OUTPUT_PREFIX}{stamp_ms}.{OUTPUT_EXTENSION}")
}

/// Hands out strictly increasing millisecond stamps.
#[derive(Debug, Default)]
pub struct OutputNamer {
    last_stamp: AtomicU64,
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock millisecond, bumped past the last stamp issued.
    pub fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let previous = self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    pub fn next_path(&self, dir: &Path) -> PathBuf {
        dir.join(output_file_name(self.next_stamp()))
    }

    /// Create an empty file at the next free `processed_<ms>.wav` in `dir`.
    ///
    /// The file is created exclusively, so a name another process already
    /// holds is skipped rather than overwritten.
    pub fn reserve_path(&self, dir: &Path) -> io::Result<PathBuf> {
        for _ in 0..RESERVE_ATTEMPTS {
            let path = self.next_path(dir);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free output name in {}", dir.display()),
        ))
    }
}
