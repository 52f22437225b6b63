//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\slowdown\
//!   macOS:   ~/Library/Application Support/slowdown/
//!   Linux:   ~/.config/slowdown/
//!
//! Processed files go to the system temp dir unless the config names another.

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory for processed output.
    pub output_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "slowdown";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform has no config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
            output_dir: std::env::temp_dir(),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
