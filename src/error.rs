//! Error types shared across the tracker

use thiserror::Error;

/// Timer configuration rejected by validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("screenshot window is inverted: min delay {min}s > max delay {max}s")]
    InvertedScreenshotWindow { min: u64, max: u64 },

    #[error("{name} ({value}s) exceeds the block length ({block}s)")]
    ExceedsBlock {
        name: &'static str,
        value: u64,
        block: u64,
    },
}

/// Failures from a persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A snapshot exists but cannot be parsed
    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures from a capture provider. Callers treat all of them as "no screenshot".
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture command `{program}` failed: {reason}")]
    Command { program: String, reason: String },

    #[error("failed to decode captured image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode screenshot: {0}")]
    Encode(#[source] image::ImageError),

    #[error("capture I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture timed out after {0}s")]
    Timeout(u64),
}

/// A handle outlived the engine task it talks to
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("timer engine has shut down")]
    Closed,
}
