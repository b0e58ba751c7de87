//! Records produced by the timer engine

mod block;
mod snapshot;

pub use block::*;
pub use snapshot::*;
