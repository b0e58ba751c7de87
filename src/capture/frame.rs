//! Screen-share frame grab
//!
//! The host owns a screen-share stream and pushes decoded frames into a
//! [`FrameFeed`]. Capturing encodes the most recent frame. If the user stops
//! sharing, the stream ends and every capture returns nothing until sharing
//! is granted again.

use async_trait::async_trait;
use chrono::Utc;
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use super::encode::{encode_screenshot, EncodeOptions};
use super::CaptureProvider;
use crate::data::Screenshot;
use crate::error::CaptureError;

#[derive(Debug, Default)]
struct FrameSlot {
    granted: bool,
    latest: Option<DynamicImage>,
}

/// Host side of a screen-share stream
#[derive(Debug, Clone, Default)]
pub struct FrameFeed {
    slot: Arc<Mutex<FrameSlot>>,
}

impl FrameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user granted screen sharing
    pub fn grant(&self) {
        self.slot.lock().granted = true;
        info!("Screen share granted");
    }

    /// Replace the latest frame. Ignored while sharing is not granted.
    pub fn push_frame(&self, frame: DynamicImage) {
        let mut slot = self.slot.lock();
        if slot.granted {
            slot.latest = Some(frame);
        }
    }

    /// The stream ended (e.g. the user pressed "stop sharing")
    pub fn end(&self) {
        let mut slot = self.slot.lock();
        slot.granted = false;
        slot.latest = None;
        info!("Screen share ended");
    }

    pub fn is_granted(&self) -> bool {
        self.slot.lock().granted
    }

    fn latest(&self) -> Option<DynamicImage> {
        let slot = self.slot.lock();
        if slot.granted {
            slot.latest.clone()
        } else {
            None
        }
    }
}

/// Capture provider reading from a [`FrameFeed`]
#[derive(Debug, Clone)]
pub struct FrameCapture {
    feed: FrameFeed,
    options: EncodeOptions,
}

impl FrameCapture {
    pub fn new(feed: FrameFeed, options: EncodeOptions) -> Self {
        Self { feed, options }
    }
}

#[async_trait]
impl CaptureProvider for FrameCapture {
    fn name(&self) -> &'static str {
        "screen-share"
    }

    fn is_available(&self) -> bool {
        self.feed.is_granted()
    }

    async fn capture(&self) -> Result<Option<Screenshot>, CaptureError> {
        let Some(frame) = self.feed.latest() else {
            return Ok(None);
        };
        let options = self.options;
        let taken_at = Utc::now();
        let shot = tokio::task::spawn_blocking(move || encode_screenshot(&frame, options, taken_at))
            .await
            .map_err(|e| CaptureError::Command {
                program: "encoder".to_string(),
                reason: e.to_string(),
            })??;
        Ok(Some(shot))
    }
}
