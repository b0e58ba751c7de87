//! Screenshot capture providers
//!
//! The timer engine never captures pixels itself. When a block's screenshot
//! comes due, the host calls a [`CaptureProvider`] and hands the result back.
//! Two adapters exist:
//! - [`CommandCapture`]: OS-level capture through a platform screenshot tool
//! - [`FrameCapture`]: frame grab from a screen-share stream the host owns
//!
//! Either may decline. A declined, failed or timed-out capture just leaves the
//! block without a screenshot.

mod command;
mod encode;
mod frame;

pub use command::CommandCapture;
pub use encode::{encode_screenshot, EncodeOptions};
pub use frame::{FrameCapture, FrameFeed};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{CaptureConfig, CaptureProviderKind};
use crate::data::Screenshot;
use crate::error::CaptureError;

/// Trait for screenshot sources
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a capture attempt could currently succeed
    fn is_available(&self) -> bool;

    /// Take one screenshot. `Ok(None)` means declined or unavailable.
    async fn capture(&self) -> Result<Option<Screenshot>, CaptureError>;
}

/// Provider for when capture is disabled or declined
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

#[async_trait]
impl CaptureProvider for NoCapture {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn capture(&self) -> Result<Option<Screenshot>, CaptureError> {
        Ok(None)
    }
}

/// Create the capture provider selected by configuration
pub fn create_capture_provider(config: &CaptureConfig) -> Arc<dyn CaptureProvider> {
    if !config.enabled || config.provider == CaptureProviderKind::None {
        info!("Screenshot capture disabled");
        return Arc::new(NoCapture);
    }

    let options = EncodeOptions::from(config);
    let command = match &config.command {
        Some(argv) => CommandCapture::new(argv.clone(), options),
        None => CommandCapture::platform_default(options),
    };

    match command {
        Some(capture) => {
            info!("Using `{}` for screenshot capture", capture.program());
            Arc::new(capture)
        }
        None => {
            warn!("No screenshot command available on this platform, blocks will have no screenshots");
            Arc::new(NoCapture)
        }
    }
}

/// Run one capture with a deadline. Errors and timeouts become `None`.
pub async fn capture_with_timeout(
    provider: &dyn CaptureProvider,
    timeout: Duration,
) -> Option<Screenshot> {
    let result = match tokio::time::timeout(timeout, provider.capture()).await {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(timeout.as_secs())),
    };

    match result {
        Ok(shot) => shot,
        Err(e) => {
            warn!("Screenshot capture via {} failed: {}", provider.name(), e);
            None
        }
    }
}
