//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), its per-subsystem sections,
//! `AppPaths` for cross-platform directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, OutputConfig, ProcessingConfig, StretchConfig};
