//! awaylock - presence-aware workstation auto-lock daemon
//!
//! Locks the session when nobody has been in front of the screen for a
//! while, after a short cancellable warning. Presence comes from an
//! optional detector program plus keyboard and mouse activity.

mod actions;
mod config;
mod detector;
mod input;
mod logging;
mod machine;
mod service;
mod system;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::actions::{ActionDispatcher, SystemWorkstation};
use crate::config::Config;
use crate::input::InputMonitor;
use crate::logging::EventJournal;
use crate::service::{LockHandle, LockService, SignalSource};
use crate::system::SystemMonitor;

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for the dispatcher to drain after the service stops.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands from signal handlers to the control loop.
#[derive(Debug, Clone, Copy)]
enum ControlCommand {
    TogglePause,
    CancelLock,
    Reload,
    Quit,
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    init_tracing(&config.logging.level)?;

    info!("Starting awaylock v{}", VERSION);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(config, config_path))?;

    info!("awaylock shutdown complete");
    Ok(())
}

/// Run the daemon until asked to quit.
async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    info!(
        "Configuration loaded: no-input delay={}s, absence delay={}s, popup timeout={}s",
        config.timing.no_input_active_delay_seconds,
        config.timing.no_person_detected_delay_seconds,
        config.timing.popup_timeout_seconds
    );

    let mut journal = EventJournal::new(config.logging.logs_dir())?;
    journal.log_session_start(VERSION)?;

    if config.detector.command.is_empty() {
        info!("No detector configured, locking on input inactivity alone");
    }
    let detector = detector::from_config(&config.detector);

    let mut sources: Vec<Box<dyn SignalSource>> = Vec::new();
    match InputMonitor::system(config.input.poll_interval()) {
        Ok(monitor) => sources.push(Box::new(monitor)),
        Err(e) => warn!("Input monitoring unavailable: {:#}", e),
    }
    sources.push(Box::new(SystemMonitor::new(
        config.system.poll_interval(),
        config.system.battery_pause,
    )));

    let service = LockService::spawn(config.timing.timings(), detector, sources);
    let handle = service.handle();

    let dispatcher = ActionDispatcher::new(Arc::new(SystemWorkstation), journal);
    let dispatcher_task = tokio::spawn(dispatcher.run(handle.subscribe()));

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ControlCommand>(10);
    spawn_signal_listeners(cmd_tx)?;

    info!("Entering control loop");

    let mut manually_paused = false;
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ControlCommand::TogglePause => {
                manually_paused = !manually_paused;
                info!("Detection {}", if manually_paused { "paused" } else { "resumed" });
                if let Err(e) = handle.set_manual_pause(manually_paused).await {
                    warn!("Failed to toggle pause: {}", e);
                    break;
                }
            }
            ControlCommand::CancelLock => {
                info!("Lock cancelled from the control channel");
                if let Err(e) = handle.cancel_lock_from_user_input().await {
                    warn!("Failed to cancel lock: {}", e);
                    break;
                }
            }
            ControlCommand::Reload => {
                if let Err(e) = reload(&handle, config_path.as_deref()).await {
                    warn!("Failed to reload configuration: {:#}", e);
                }
            }
            ControlCommand::Quit => {
                info!("Quit command received");
                break;
            }
        }
    }

    info!("Shutting down...");
    service.shutdown().await;
    drop(handle);

    match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, dispatcher_task).await {
        Ok(Ok(journal)) => info!("Issued {} locks this session. Goodbye!", journal.locks_issued()),
        Ok(Err(e)) => error!("Action dispatcher failed: {}", e),
        Err(_) => warn!("Action dispatcher did not finish in time"),
    }

    Ok(())
}

/// Re-read the configuration and push the runtime-adjustable settings.
async fn reload(handle: &LockHandle, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    config.validate()?;

    let timing = &config.timing;
    handle
        .set_no_input_active_delay(timing.no_input_active_delay_seconds)
        .await?;
    handle
        .set_no_person_detected_delay(timing.no_person_detected_delay_seconds)
        .await?;
    handle.set_popup_timeout(timing.popup_timeout_seconds).await?;
    handle
        .set_force_camera_feed(config.detector.force_camera_feed)
        .await?;

    info!(
        "Configuration reloaded: no-input delay={}s, absence delay={}s, popup timeout={}s",
        timing.no_input_active_delay_seconds,
        timing.no_person_detected_delay_seconds,
        timing.popup_timeout_seconds
    );
    Ok(())
}

/// Forward process signals to the control loop.
fn spawn_signal_listeners(cmd_tx: mpsc::Sender<ControlCommand>) -> Result<()> {
    let quit_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit_tx.send(ControlCommand::Quit).await;
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut toggle =
            signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
        let mut cancel =
            signal(SignalKind::user_defined2()).context("Failed to install SIGUSR2 handler")?;
        let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

        tokio::spawn(async move {
            loop {
                let cmd = tokio::select! {
                    Some(()) = terminate.recv() => ControlCommand::Quit,
                    Some(()) = toggle.recv() => ControlCommand::TogglePause,
                    Some(()) = cancel.recv() => ControlCommand::CancelLock,
                    Some(()) = hangup.recv() => ControlCommand::Reload,
                    else => break,
                };
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    drop(cmd_tx);

    Ok(())
}

/// Initialize tracing subscriber with the given log level.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
