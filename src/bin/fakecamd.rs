//! fakecamd - camera upload watcher and stream injector
//!
//! This daemon:
//! 1. Watches today's (and, around midnight, yesterday's) upload directory
//! 2. Waits for each new clip's upload to settle
//! 3. Plays settled clips one at a time through the composer
//! 4. Falls back to an error scene and alerts when the composer fails
//! 5. Sweeps old uploads and checks the supporting containers

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

use fakecam::{
    AlertSink, FakecamConfig, LogAlertSink, MailAlertSink, MemorySceneController, Monitor,
    ObsEndpoint, ObsSceneController, SceneController, TickTime, ValidationReport,
    DEFAULT_CONFIG_PATH,
};

const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Play camera uploads into a live stream")]
struct Args {
    /// Configuration file.
    #[arg(long, env = "FAKECAM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    test_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if args.test_config {
        println!("Config: {}", args.config.display());
    }
    let cfg = match FakecamConfig::load(Some(args.config.as_path())) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: failed to load {}: {:#}", args.config.display(), e);
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    if args.test_config {
        return Ok(test_config(&cfg.validate()));
    }

    init_logging(cfg.monitor.log_file.as_deref())?;
    log::info!("fakecamd {} starting", env!("CARGO_PKG_VERSION"));
    log::info!("config: {}", args.config.display());

    let report = cfg.validate();
    for warning in &report.warnings {
        log::warn!("config: {}", warning);
    }
    if !report.is_ok() {
        for error in &report.errors {
            log::error!("config: {}", error);
            eprintln!("ERROR: {}", error);
        }
        return Ok(ExitCode::from(EXIT_CONFIG));
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting signal handler: {}", e))?;

    let mut monitor = Monitor::new(&cfg, scene_controller(&cfg)?, alert_sink(&cfg));
    loop {
        monitor.tick(TickTime::now());
        let sleep = monitor.sleep_for(Instant::now());
        match rx.recv_timeout(sleep) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    log::info!("shutdown signal received");
    monitor.shutdown();
    Ok(ExitCode::SUCCESS)
}

fn test_config(report: &ValidationReport) -> ExitCode {
    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }
    for error in &report.errors {
        println!("ERROR: {}", error);
    }
    if report.is_ok() {
        println!("OK");
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CONFIG)
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn scene_controller(cfg: &FakecamConfig) -> Result<Box<dyn SceneController>> {
    // stub:// keeps the loop running without a composer (dry runs).
    if cfg.obs.host.starts_with("stub://") {
        log::warn!("composer host {} is a stub; no stream output", cfg.obs.host);
        return Ok(Box::new(MemorySceneController::new(&cfg.obs.scene_standby)));
    }
    let port = u16::try_from(cfg.obs.port)
        .map_err(|_| anyhow!("obs.port out of range: {}", cfg.obs.port))?;
    Ok(Box::new(ObsSceneController::new(ObsEndpoint {
        host: cfg.obs.host.clone(),
        port,
        password: cfg.obs.password.clone(),
        timeout: cfg.obs.timeout,
    })))
}

fn alert_sink(cfg: &FakecamConfig) -> Box<dyn AlertSink> {
    let send_to = cfg.monitor.send_to.trim();
    if send_to.is_empty() {
        Box::new(LogAlertSink)
    } else {
        Box::new(MailAlertSink::new(send_to))
    }
}
