//! Block timer: engine, events, screenshot timing and crash restore

mod engine;
mod events;
mod restore;
mod screenshot;
#[cfg(test)]
mod testing;

pub use engine::{CaptureRequest, Session, TimerEngine};
pub use events::{EngineEvent, EventBus, TickInfo};
pub use restore::RestoreReport;
pub use screenshot::{ArmedShot, ScreenshotScheduler};
