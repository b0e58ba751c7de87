//! Work-session time tracking
//!
//! A session is cut into fixed-length blocks. Each block carries an activity
//! percentage sampled from input signals and at most one screenshot taken at
//! a random instant. The running state is snapshotted so a crashed or killed
//! process resumes on the same block grid, recording the downtime as missed
//! blocks.

pub mod activity;
pub mod capture;
pub mod clock;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{Config, TimerSettings};
pub use data::{Block, EngineState, Screenshot, Snapshot};
pub use driver::{EngineDriver, EngineHandle, EngineStatus};
pub use error::{CaptureError, ConfigError, DriverError, StoreError};
pub use timer::{EngineEvent, RestoreReport, TimerEngine};
