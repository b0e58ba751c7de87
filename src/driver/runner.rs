use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EngineCommand, EngineHandle, EngineStatus};
use crate::activity::{ActivityFilter, ActivityKind, ActivitySource, HostFedSource};
use crate::capture::{capture_with_timeout, CaptureProvider, NoCapture};
use crate::data::Screenshot;
use crate::store::{retry_delay, RetryPending};
use crate::timer::{CaptureRequest, TimerEngine};

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_KEY: &str = "pending-blocks";

type CaptureResult = (CaptureRequest, Option<Screenshot>);

/// Backoff state for draining the pending block queue
struct RetrySchedule {
    pending: Arc<dyn RetryPending>,
    base: Duration,
    max: Duration,
    attempt: u32,
    next_at: Option<Instant>,
}

impl RetrySchedule {
    fn arm_if_needed(&mut self) {
        if self.next_at.is_some() || self.pending.pending_len() == 0 {
            return;
        }
        self.attempt += 1;
        let delay = retry_delay(self.attempt, self.base, self.max, RETRY_KEY);
        debug!(
            "Retrying {} pending blocks in {:?}",
            self.pending.pending_len(),
            delay
        );
        self.next_at = Some(Instant::now() + delay);
    }

    fn run(&mut self) {
        self.next_at = None;
        if self.pending.retry_pending() == 0 {
            self.attempt = 0;
        }
    }
}

/// Owns the engine and runs its event loop
pub struct EngineDriver {
    engine: TimerEngine,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    activity_tx: mpsc::UnboundedSender<ActivityKind>,
    activity_rx: mpsc::UnboundedReceiver<ActivityKind>,
    activity_source: Box<dyn ActivitySource>,
    filter: ActivityFilter,
    capture: Arc<dyn CaptureProvider>,
    capture_timeout: Duration,
    retry: Option<RetrySchedule>,
}

impl EngineDriver {
    /// Wrap `engine`. Defaults: no capture, host-fed activity, no retry queue.
    pub fn new(engine: TimerEngine) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            cmd_tx,
            activity_tx: activity_tx.clone(),
            events: engine.events().clone(),
        };
        let driver = Self {
            engine,
            cmd_rx,
            activity_tx,
            activity_rx,
            activity_source: Box::new(HostFedSource),
            filter: ActivityFilter::default(),
            capture: Arc::new(NoCapture),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            retry: None,
        };
        (driver, handle)
    }

    pub fn with_capture(mut self, provider: Arc<dyn CaptureProvider>, timeout: Duration) -> Self {
        self.capture = provider;
        self.capture_timeout = timeout;
        self
    }

    pub fn with_activity_source(
        mut self,
        source: Box<dyn ActivitySource>,
        filter: ActivityFilter,
    ) -> Self {
        self.activity_source = source;
        self.filter = filter;
        self
    }

    /// Periodically replay blocks that failed to persist
    pub fn with_retry(mut self, pending: Arc<dyn RetryPending>, base: Duration, max: Duration) -> Self {
        self.retry = Some(RetrySchedule {
            pending,
            base,
            max,
            attempt: 0,
            next_at: None,
        });
        self
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            "Timer engine started (capture: {}, activity: {})",
            self.capture.name(),
            self.activity_source.name()
        );

        let (shot_tx, mut shot_rx) = mpsc::unbounded_channel::<CaptureResult>();
        let mut capture_cancel = CancellationToken::new();
        let mut source_running = false;

        loop {
            self.sync_activity_source(&mut source_running, &mut capture_cancel);
            self.dispatch_capture(&shot_tx, &capture_cancel);
            if let Some(retry) = self.retry.as_mut() {
                retry.arm_if_needed();
            }

            let now = self.engine.now();
            let next_timer = self
                .engine
                .next_deadline()
                .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO));
            let next_retry = self.retry.as_ref().and_then(|r| r.next_at);

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("All engine handles dropped");
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }

                Some(kind) = self.activity_rx.recv() => {
                    if self.filter.allows(kind) {
                        self.engine.record_activity(kind);
                    }
                }

                Some((request, shot)) = shot_rx.recv() => {
                    self.engine.attach_screenshot(&request, shot);
                }

                _ = async {
                    match next_timer {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.engine.poll();
                }

                _ = async {
                    match next_retry {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(retry) = self.retry.as_mut() {
                        retry.run();
                    }
                }
            }
        }

        capture_cancel.cancel();
        if source_running {
            self.activity_source.stop();
        }
        info!("Timer engine stopped");
    }

    /// Returns false on shutdown
    fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Start {
                project_ref,
                memo,
                reply,
            } => {
                let _ = reply.send(self.engine.start(project_ref, memo));
            }
            EngineCommand::Stop { reply } => {
                let _ = reply.send(self.engine.stop());
            }
            EngineCommand::Reset { reply } => {
                let _ = reply.send(self.engine.reset());
            }
            EngineCommand::Restore { reply } => {
                let _ = reply.send(self.engine.restore());
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineCommand::CompletedBlocks { reply } => {
                let _ = reply.send(self.engine.completed_blocks().to_vec());
            }
            EngineCommand::Shutdown => {
                info!("Shutdown command received");
                return false;
            }
        }
        true
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.engine.state(),
            session: self.engine.session().cloned(),
            elapsed_seconds: self.engine.elapsed_seconds(),
            block_number: self.engine.block_number(),
            block_elapsed_seconds: self.engine.block_elapsed_seconds(),
            block_progress: self.engine.current_block_progress(),
            completed_blocks: self.engine.completed_blocks().len(),
            pending_blocks: self
                .retry
                .as_ref()
                .map(|r| r.pending.pending_len())
                .unwrap_or(0),
        }
    }

    /// Input hooks run only while a session is running. Leaving the running
    /// state also abandons any capture still in flight.
    fn sync_activity_source(&mut self, source_running: &mut bool, capture_cancel: &mut CancellationToken) {
        let running = self.engine.is_running();
        if running == *source_running {
            return;
        }

        if running {
            match self.activity_source.start(self.activity_tx.clone()) {
                Ok(()) => debug!("Activity source {} started", self.activity_source.name()),
                Err(e) => error!(
                    "Failed to start activity source {}: {}",
                    self.activity_source.name(),
                    e
                ),
            }
        } else {
            self.activity_source.stop();
            capture_cancel.cancel();
            *capture_cancel = CancellationToken::new();
            debug!("Activity source {} stopped", self.activity_source.name());
        }
        *source_running = running;
    }

    fn dispatch_capture(
        &mut self,
        shot_tx: &mpsc::UnboundedSender<CaptureResult>,
        cancel: &CancellationToken,
    ) {
        let Some(request) = self.engine.take_capture_request() else {
            return;
        };
        if !self.capture.is_available() {
            debug!(
                "Capture provider {} unavailable, block {} gets no screenshot",
                self.capture.name(),
                request.block_number
            );
            return;
        }

        let provider = Arc::clone(&self.capture);
        let timeout = self.capture_timeout;
        let shot_tx = shot_tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Capture for block {} abandoned", request.block_number);
                }
                shot = capture_with_timeout(provider.as_ref(), timeout) => {
                    if shot_tx.send((request, shot)).is_err() {
                        warn!("Engine gone before capture finished");
                    }
                }
            }
        });
    }
}
