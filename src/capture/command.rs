//! OS-level screenshot capture through a platform command
//!
//! The command writes an image to a temporary file (`{path}` in its argv),
//! which is decoded, fitted to the configured bounds and re-encoded as JPEG.
//! The file is removed when the capture finishes or its future is dropped.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

use super::encode::{encode_screenshot, EncodeOptions};
use super::CaptureProvider;
use crate::data::Screenshot;
use crate::error::CaptureError;

const PATH_PLACEHOLDER: &str = "{path}";

/// Desktop capture via an external screenshot tool
#[derive(Debug, Clone)]
pub struct CommandCapture {
    argv: Vec<String>,
    options: EncodeOptions,
    temp_dir: PathBuf,
}

impl CommandCapture {
    /// Build from an explicit argv. Returns `None` for an empty argv.
    pub fn new(argv: Vec<String>, options: EncodeOptions) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self {
            argv,
            options,
            temp_dir: std::env::temp_dir(),
        })
    }

    /// Write command output under `dir` instead of the system temp dir
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// The screenshot command for the current platform, if there is one
    pub fn platform_default(options: EncodeOptions) -> Option<Self> {
        default_argv().and_then(|argv| Self::new(argv, options))
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Reserve a unique output file; it is deleted when the guard drops.
    fn output_path(&self) -> std::io::Result<TempPath> {
        tempfile::Builder::new()
            .prefix("time-tracker-")
            .suffix(".png")
            .tempfile_in(&self.temp_dir)
            .map(|file| file.into_temp_path())
    }

    fn command_for(&self, path: &Path) -> tokio::process::Command {
        let path = path.to_string_lossy();
        let mut command = tokio::process::Command::new(&self.argv[0]);
        command.args(
            self.argv[1..]
                .iter()
                .map(|arg| arg.replace(PATH_PLACEHOLDER, &path)),
        );
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CaptureProvider for CommandCapture {
    fn name(&self) -> &'static str {
        "command"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn capture(&self) -> Result<Option<Screenshot>, CaptureError> {
        let path = self.output_path()?;
        let output = self
            .command_for(&path)
            .output()
            .await
            .map_err(|e| CaptureError::Command {
                program: self.program().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CaptureError::Command {
                program: self.program().to_string(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let bytes = tokio::fs::read(&path).await;
        let shown = path.to_path_buf();
        if let Err(e) = path.close() {
            warn!("Failed to delete temporary screenshot {:?}: {}", shown, e);
        }
        let bytes = bytes?;
        debug!("Screenshot command produced {} bytes", bytes.len());

        let taken_at = Utc::now();
        let options = self.options;
        let shot = tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes).map_err(CaptureError::Decode)?;
            encode_screenshot(&image, options, taken_at)
        })
        .await
        .map_err(|e| CaptureError::Command {
            program: "encoder".to_string(),
            reason: e.to_string(),
        })??;

        Ok(Some(shot))
    }
}

fn default_argv() -> Option<Vec<String>> {
    let argv = platform_argv();
    if argv.is_empty() {
        None
    } else {
        Some(argv.iter().map(|s| s.to_string()).collect())
    }
}

#[cfg(target_os = "macos")]
fn platform_argv() -> &'static [&'static str] {
    &["screencapture", "-x", "-t", "png", PATH_PLACEHOLDER]
}

#[cfg(target_os = "linux")]
fn platform_argv() -> &'static [&'static str] {
    // Check if we're on Wayland
    if std::env::var("XDG_SESSION_TYPE")
        .map(|s| s == "wayland")
        .unwrap_or(false)
    {
        &["grim", PATH_PLACEHOLDER]
    } else {
        &["import", "-window", "root", PATH_PLACEHOLDER]
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn platform_argv() -> &'static [&'static str] {
    &[]
}
