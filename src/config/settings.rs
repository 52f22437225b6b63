//! Application settings structs, defaults and TOML persistence.
//!
//! Every section carries `#[serde(default)]`, so a `settings.toml` only
//! needs the keys it wants to change.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::{validate_multiplier, Strategy, FRAME_BLOCK_CAPACITY};

// ---------------------------------------------------------------------------
// ProcessingConfig
// ---------------------------------------------------------------------------

/// What every job does to its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Playback speed factor; `0.75` plays at three quarters speed.
    pub rate_multiplier: f64,
    /// Whether pitch moves with speed (`DirectResample`) or is kept
    /// (`TimeStretch`).
    pub strategy: Strategy,
    /// Frames per block moved between reader, engine and writer.
    pub block_frames: usize,
    /// Fail jobs whose time-stretch output was truncated instead of
    /// reporting them as completed.
    pub strict_completion: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            rate_multiplier: 0.75,
            strategy: Strategy::default(),
            block_frames: FRAME_BLOCK_CAPACITY,
            strict_completion: false,
        }
    }
}

// ---------------------------------------------------------------------------
// StretchConfig
// ---------------------------------------------------------------------------

/// Tuning for the graph-based time-stretch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchConfig {
    /// Milliseconds to keep the graph alive after the source reports
    /// completion.
    pub grace_ms: u64,
    /// Seconds added to `duration / rate` before the wait is abandoned.
    pub safety_margin_secs: f64,
    /// Grain length of the overlap-add stretcher; a multiple of 4.
    pub window_frames: usize,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            grace_ms: 500,
            safety_margin_secs: 3.0,
            window_frames: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// OutputConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where `processed_<ms>.wav` files are written. `None` means the
    /// system temp dir.
    pub directory: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use slowdown::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// config.validate().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub processing: ProcessingConfig,
    pub stretch: StretchConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values no job could run with.
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = validate_multiplier(self.processing.rate_multiplier) {
            bail!("processing.rate_multiplier: {e}");
        }
        if self.processing.block_frames == 0 {
            bail!("processing.block_frames must be > 0");
        }
        let window = self.stretch.window_frames;
        if window == 0 || window % 4 != 0 {
            bail!("stretch.window_frames must be a positive multiple of 4 (got {window})");
        }
        let margin = self.stretch.safety_margin_secs;
        if !(margin.is_finite() && margin >= 0.0) {
            bail!("stretch.safety_margin_secs must be >= 0 (got {margin})");
        }
        Ok(())
    }

    /// Directory processed files are written to.
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .directory
            .clone()
            .unwrap_or_else(|| AppPaths::new().output_dir)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
