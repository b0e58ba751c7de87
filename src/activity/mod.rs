//! Input activity: raw signal sources and the per-block sampler

mod sampler;
mod source;
#[cfg(feature = "global-hooks")]
pub(crate) mod rdev_source;

pub use sampler::*;
pub use source::*;

use serde::{Deserialize, Serialize};

use crate::config::ActivityConfig;

/// Kind of raw input signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Keyboard,
    MouseMove,
    Click,
}

/// Drops signal kinds the user disabled
#[derive(Debug, Clone, Copy)]
pub struct ActivityFilter {
    keyboard: bool,
    mouse_move: bool,
    click: bool,
}

impl ActivityFilter {
    pub fn from_config(config: &ActivityConfig) -> Self {
        Self {
            keyboard: config.capture_keyboard,
            mouse_move: config.capture_mouse_move,
            click: config.capture_mouse_click,
        }
    }

    pub fn allows(&self, kind: ActivityKind) -> bool {
        match kind {
            ActivityKind::Keyboard => self.keyboard,
            ActivityKind::MouseMove => self.mouse_move,
            ActivityKind::Click => self.click,
        }
    }
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self::from_config(&ActivityConfig::default())
    }
}
