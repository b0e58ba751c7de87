//! Activity source trait and selection

use anyhow::Result;
use tokio::sync::mpsc;

use super::ActivityKind;
use crate::config::ActivityConfig;

/// Trait for raw input signal producers
pub trait ActivitySource: Send {
    fn name(&self) -> &'static str;

    /// Start emitting signals into `tx`. Calling it again while started is a no-op.
    fn start(&mut self, tx: mpsc::UnboundedSender<ActivityKind>) -> Result<()>;

    /// Stop emitting signals
    fn stop(&mut self);
}

/// Source for hosts that observe input themselves and forward it through
/// the engine handle (e.g. in-window key and pointer events).
#[derive(Debug, Default)]
pub struct HostFedSource;

impl ActivitySource for HostFedSource {
    fn name(&self) -> &'static str {
        "host-fed"
    }

    fn start(&mut self, _tx: mpsc::UnboundedSender<ActivityKind>) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Create the activity source for this build and configuration.
///
/// Global OS hooks are preferred; without them the host must feed events.
pub fn create_activity_source(config: &ActivityConfig) -> Box<dyn ActivitySource> {
    #[cfg(feature = "global-hooks")]
    {
        if config.global_hooks {
            tracing::info!("Using global input hooks for activity tracking");
            return Box::new(super::rdev_source::RdevSource::new());
        }
    }

    if config.global_hooks {
        tracing::warn!("Global input hooks not compiled in, falling back to host-fed activity");
    } else {
        tracing::info!("Using host-fed activity tracking");
    }
    Box::new(HostFedSource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_fed_source_emits_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut source = HostFedSource;
        source.start(tx).unwrap();
        source.stop();
        assert!(rx.try_recv().is_err());
    }

    #[cfg(not(feature = "global-hooks"))]
    #[test]
    fn test_falls_back_to_host_fed_without_hooks() {
        let source = create_activity_source(&ActivityConfig::default());
        assert_eq!(source.name(), "host-fed");
    }
}
