//! rdev-based global input hooks
//! Works on Windows, macOS, and Linux (X11)

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{ActivityKind, ActivitySource};

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<ActivityKind>>>>;

/// Global keyboard/mouse hook.
///
/// `rdev::listen` cannot be torn down, so the listener thread is spawned once
/// and gated by a flag; stopping just closes the gate.
pub struct RdevSource {
    capturing: Arc<AtomicBool>,
    sender: SharedSender,
    listener_started: bool,
}

impl RdevSource {
    pub fn new() -> Self {
        Self {
            capturing: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(None)),
            listener_started: false,
        }
    }
}

impl Default for RdevSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for RdevSource {
    fn name(&self) -> &'static str {
        "rdev"
    }

    fn start(&mut self, tx: mpsc::UnboundedSender<ActivityKind>) -> Result<()> {
        *self.sender.lock() = Some(tx);
        self.capturing.store(true, Ordering::SeqCst);

        if self.listener_started {
            return Ok(());
        }
        self.listener_started = true;

        let capturing = self.capturing.clone();
        let sender = self.sender.clone();

        thread::spawn(move || {
            info!("rdev activity hooks started");

            let callback = move |event: rdev::Event| {
                if !capturing.load(Ordering::SeqCst) {
                    return;
                }

                let kind = match event.event_type {
                    rdev::EventType::KeyPress(_) => ActivityKind::Keyboard,
                    rdev::EventType::ButtonPress(_) => ActivityKind::Click,
                    rdev::EventType::MouseMove { .. } | rdev::EventType::Wheel { .. } => {
                        ActivityKind::MouseMove
                    }
                    rdev::EventType::KeyRelease(_) | rdev::EventType::ButtonRelease(_) => return,
                };

                if let Some(tx) = sender.lock().as_ref() {
                    if let Err(e) = tx.send(kind) {
                        debug!("Failed to forward activity signal: {}", e);
                    }
                }
            };

            if let Err(e) = rdev::listen(callback) {
                error!("rdev listen error: {:?}", e);
            }

            info!("rdev activity hooks stopped");
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        self.sender.lock().take();
    }
}
