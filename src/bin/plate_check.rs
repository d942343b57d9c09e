//! plate_check - run one recognition cycle on a still image.
//!
//! Loads a photo, pushes it through the same inference worker the camera
//! sessions use, and prints the selected plate (or "unrecognized").

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::time::Duration;

use plate_gate::{config::GateConfig, ui::Ui, DetectorRegistry, Frame, InferenceWorker};

#[derive(Parser, Debug)]
#[command(name = "plate_check", about = "Recognize the plate in a still image")]
struct Args {
    /// Image file (JPEG or PNG)
    #[arg(value_name = "PATH")]
    image: String,

    /// Detector backend (defaults to the configured one)
    #[arg(long, value_name = "NAME")]
    detector: Option<String>,

    /// Command for the process backend
    #[arg(long, value_name = "PATH")]
    command: Option<String>,

    /// Seconds to wait for the detector
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut settings = GateConfig::load()?.detector;
    if let Some(detector) = args.detector {
        settings.backend = detector;
    }
    if args.command.is_some() {
        settings.command = args.command;
    }

    let frame = {
        let _stage = ui.stage("Load image");
        Frame::load(&args.image)?
    };
    println!(
        "plate_check: {} ({}x{})",
        args.image,
        frame.width(),
        frame.height()
    );

    let detector = {
        let _stage = ui.stage("Load detector");
        DetectorRegistry::with_builtin().create_configured(&settings)?
    };
    let reading = {
        let _stage = ui.stage("Recognize");
        let (mut worker, results) = InferenceWorker::spawn(detector)?;
        worker.submit(frame)?;
        let reading = results.recv_timeout(Duration::from_secs(args.timeout));
        worker.stop()?;
        reading.map_err(|_| anyhow!("detector gave no result within {}s", args.timeout))?
    };

    println!("result: {}", reading);
    Ok(())
}
