//! time-tracker Agent
//!
//! Tracks one work session in 10-minute blocks from the command line.
//! Resumes a session left running by a previous process, otherwise starts
//! one for `--project`. Ctrl+C stops the session cleanly.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use time_tracker::activity::{create_activity_source, ActivityFilter};
use time_tracker::capture::{create_capture_provider, CaptureProvider, NoCapture};
use time_tracker::store::{FileStore, QueuedPersistence};
use time_tracker::{logging, Config, EngineDriver, EngineEvent, EngineState, SystemClock, TimerEngine};

const PENDING_QUEUE_FILE: &str = "pending_blocks.json";

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    project: Option<String>,
    memo: String,
    no_capture: bool,
    help: bool,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;
    if options.help {
        print_help();
        return Ok(());
    }

    let _log_guard = logging::init_logging()?;
    info!("time-tracker Agent starting...");

    let config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path());
    let settings = config
        .timer
        .to_settings()
        .context("Invalid timer configuration")?;

    let data_dir = config.data_directory()?;
    info!("Data directory: {:?}", data_dir);
    let store = Arc::new(QueuedPersistence::new(
        FileStore::new(&data_dir),
        data_dir.join(PENDING_QUEUE_FILE),
    ));

    let capture: Arc<dyn CaptureProvider> = if options.no_capture {
        info!("Screenshot capture disabled by --no-capture");
        Arc::new(NoCapture)
    } else {
        create_capture_provider(&config.capture)
    };

    let runtime = tokio::runtime::Runtime::new()?;

    // Ctrl+C may fire more than once; every press just nudges the main task.
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    runtime.block_on(async move {
        let engine = TimerEngine::new(settings, Arc::new(SystemClock), store.clone());
        let (driver, handle) = EngineDriver::new(engine);
        let driver = driver
            .with_capture(capture, Duration::from_secs(config.capture.timeout_secs))
            .with_activity_source(
                create_activity_source(&config.activity),
                ActivityFilter::from_config(&config.activity),
            )
            .with_retry(
                store,
                Duration::from_secs(config.storage.retry_base_secs),
                Duration::from_secs(config.storage.retry_max_secs),
            );

        let logger = tokio::spawn(log_events(handle.subscribe()));
        let engine_task = tokio::spawn(driver.run());

        match handle.restore().await? {
            Some(report) => {
                info!(
                    "Resumed session {} at block {} ({} missed)",
                    report.session_id, report.block_number, report.missed_blocks
                );
                if options.project.is_some() {
                    warn!("Ignoring --project, a session was already running");
                }
            }
            None => match options.project {
                Some(project) => {
                    handle.start(project, options.memo).await?;
                }
                None => info!("No session to resume and no --project given"),
            }
        }

        if handle.status().await?.state == EngineState::Running {
            info!("Tracking. Press Ctrl+C to stop...");
            stop_rx.recv().await;
            info!("Ctrl+C received, stopping session...");

            match handle.stop().await? {
                Some(block) => info!(
                    "Final block {} recorded ({}s, partial: {})",
                    block.block_number, block.duration_seconds, block.is_partial
                ),
                None => info!("Final block too short to record"),
            }
            let status = handle.status().await?;
            info!(
                "Session total: {}s across {} blocks",
                status.elapsed_seconds, status.completed_blocks
            );
            if status.pending_blocks > 0 {
                warn!(
                    "{} blocks are still queued locally and will be retried on next launch",
                    status.pending_blocks
                );
            }
        }

        handle.shutdown().await;
        if let Err(e) = engine_task.await {
            error!("Timer engine task failed: {}", e);
        }
        logger.abort();
        Ok::<_, anyhow::Error>(())
    })?;

    info!("Shutdown complete");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::BlockCompleted { session_id, block }) => info!(
                "Session {} block {}: {}s, activity {}%{}",
                session_id,
                block.block_number,
                block.duration_seconds,
                block.activity_percent,
                if block.is_missed { " (missed)" } else { "" }
            ),
            Ok(EngineEvent::ScreenshotNeeded { block_number, .. }) => {
                debug!("Screenshot due for block {}", block_number)
            }
            Ok(EngineEvent::StateChanged(state)) => info!("Engine is now {}", state),
            Ok(EngineEvent::Tick(tick)) => trace!(
                "{}s elapsed, block {} at {:.0}%",
                tick.total_elapsed_secs,
                tick.block_number,
                tick.block_progress * 100.0
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Event logger skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => options.help = true,
            "--no-capture" => options.no_capture = true,
            "-p" | "--project" => {
                let value = iter.next().context("--project needs a value")?;
                options.project = Some(value.clone());
            }
            "-m" | "--memo" => {
                let value = iter.next().context("--memo needs a value")?;
                options.memo = value.clone();
            }
            other => bail!("Unknown argument: {} (try --help)", other),
        }
    }
    Ok(options)
}

fn print_help() {
    println!("time-tracker Agent - Block-based work session tracking");
    println!();
    println!("USAGE:");
    println!("    time-tracker-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -p, --project <REF>   Start a session for this project");
    println!("    -m, --memo <TEXT>     Free-text note for the session");
    println!("        --no-capture      Do not take screenshots");
    println!("    -h, --help            Print this help message");
    println!();
    println!("A session left running by a crashed or killed process is resumed");
    println!("automatically; --project is ignored in that case.");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                Set log level (e.g., debug, info, warn)");
    println!("    TIME_TRACKER_LOG_PATH   Override the log directory");
}
