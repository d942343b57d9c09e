//! gated - vehicle access control daemon
//!
//! This daemon:
//! 1. Loads the gate configuration (file named by GATE_CONFIG, env overrides)
//! 2. Opens the roster store and creates its tables if needed
//! 3. Starts one camera session per configured camera block
//! 4. Asks the operator about unregistered plates (or applies the configured policy)
//! 5. Stops every session on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use plate_gate::{
    config::{GateConfig, UnknownPlatePolicy},
    open_device,
    ui::{ConsolePrompt, Ui},
    AlwaysAllow, AlwaysDeny, DecisionProvider, DetectorRegistry, LogBarrier, Persistence,
    SessionEvent, SessionManager, SessionSpec, SqliteOpener, StoreOpener,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "gated", about = "Run camera sessions and decide gate access")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "GATE_CONFIG", value_name = "PATH")]
    config: Option<String>,

    /// Only start the named camera block (repeatable)
    #[arg(long = "camera", value_name = "NAME")]
    cameras: Vec<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, false);

    if let Some(path) = &args.config {
        std::env::set_var("GATE_CONFIG", path);
    }
    let cfg = {
        let _stage = ui.stage("Load configuration");
        GateConfig::load()?
    };

    let opener = {
        let _stage = ui.stage("Open roster store");
        let opener = SqliteOpener::new(&cfg.db_path)?;
        // Creates the schema once up front; sessions that fail later run degraded.
        if let Err(err) = opener.open() {
            log::error!("roster store {} unavailable: {:#}", opener.describe(), err);
        }
        opener
    };

    let provider: Arc<dyn DecisionProvider> = match cfg.unknown_plates {
        UnknownPlatePolicy::Ask => Arc::new(ConsolePrompt::new()),
        UnknownPlatePolicy::Allow => Arc::new(AlwaysAllow),
        UnknownPlatePolicy::Deny => Arc::new(AlwaysDeny),
    };
    let registry = DetectorRegistry::with_builtin();
    let mut manager = SessionManager::new(
        Arc::new(opener),
        provider,
        Arc::new(LogBarrier),
        cfg.capture,
        cfg.voting,
    );

    let mut loggers = Vec::new();
    for camera in &cfg.cameras {
        if !args.cameras.is_empty() && !args.cameras.contains(&camera.name) {
            continue;
        }
        let spec = open_device(&camera.device, &cfg.capture).and_then(|device| {
            Ok(SessionSpec {
                name: camera.name.clone(),
                device,
                detector: registry.create_configured(&cfg.detector)?,
                direction: camera.direction,
            })
        });
        let started = spec.and_then(|spec| manager.start(spec));
        match started {
            Ok((id, events)) => {
                log::info!("{}: camera {} ({})", id, camera.name, camera.direction);
                loggers.push(spawn_event_logger(camera.name.clone(), events)?);
            }
            Err(err) => log::error!("camera {} not started: {:#}", camera.name, err),
        }
    }
    if manager.is_empty() {
        return Err(anyhow!("no camera session could be started"));
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!(
        "gated running with {} session(s). waiting for shutdown signal (Ctrl-C)...",
        manager.len()
    );
    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                for info in manager.list() {
                    if info.healthy {
                        log::debug!(
                            "{} {}: captured={} submitted={} failures={}",
                            info.id,
                            info.name,
                            info.stats.frames_captured,
                            info.stats.frames_submitted,
                            info.stats.read_failures
                        );
                    } else {
                        log::warn!(
                            "{} {}: device {} is not delivering frames",
                            info.id,
                            info.name,
                            info.device
                        );
                    }
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping sessions...");
    manager.stop_all()?;
    for logger in loggers {
        if logger.join().is_err() {
            log::error!("event logger panicked");
        }
    }
    Ok(())
}

fn spawn_event_logger(name: String, events: Receiver<SessionEvent>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name(format!("events-{}", name))
        .spawn(move || {
            for event in events {
                log_event(&name, event);
            }
        })?;
    Ok(handle)
}

fn log_event(camera: &str, event: SessionEvent) {
    match event {
        SessionEvent::Reading(reading) => log::debug!("{}: frame -> {}", camera, reading),
        SessionEvent::DecisionChanged(reading) => {
            log::info!("{}: decided plate {}", camera, reading)
        }
        SessionEvent::Access(outcome) => {
            let employee = outcome
                .employee_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let stored = match &outcome.persistence {
                Persistence::Recorded(id) => format!("crossing #{}", id),
                Persistence::Skipped => "not recorded".to_string(),
                Persistence::Unavailable => "no store".to_string(),
                Persistence::Failed(_) => "write failed".to_string(),
            };
            log::info!(
                "{}: {} {} ({}) employee={} {}",
                camera,
                outcome.verdict,
                outcome.plate,
                outcome.direction,
                employee,
                stored
            );
        }
        SessionEvent::StoreUnavailable(message) | SessionEvent::StoreError(message) => {
            log::warn!("{}: {}", camera, message)
        }
    }
}
