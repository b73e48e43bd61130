//! garudad - Garuda Watch surveillance daemon
//!
//! This daemon:
//! 1. Loads process configuration (GARUDA_CONFIG file plus GARUDA_* overrides)
//! 2. Registers the configured detector backend
//! 3. Starts the alert workers and the HTTP control surface
//! 4. Optionally starts a session from the command line
//! 5. Runs until Ctrl-C, then stops the API, the session and the alert workers

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::sync::Arc;

use garuda_watch::session::NumberOrText;
use garuda_watch::{
    AlertDispatcher, ApiServer, BackendRegistry, Controller, GarudaConfig, StartRequest,
    StubBackend, TelegramTransport,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Time-windowed camera/video surveillance with rate-limited alerts"
)]
struct Args {
    /// Start a camera session on this device index at launch.
    #[arg(long, conflicts_with = "file")]
    camera: Option<u32>,

    /// Start a looping file session on this video at launch.
    #[arg(long)]
    file: Option<String>,

    /// Start of the daily active window (HH:MM:SS).
    #[arg(long)]
    from: Option<String>,

    /// End of the daily active window (HH:MM:SS).
    #[arg(long)]
    to: Option<String>,

    /// File playback speed multiplier (clamped to 0.1..=10).
    #[arg(long)]
    speed: Option<f64>,

    /// Target output frame rate (clamped to 1..=30).
    #[arg(long)]
    fps: Option<f64>,

    /// Telegram bot token for alerts.
    #[arg(long, env = "GARUDA_TELEGRAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Telegram chat id for alerts.
    #[arg(long, env = "GARUDA_TELEGRAM_CHAT_ID")]
    chat_id: Option<String>,
}

impl Args {
    fn start_request(&self) -> Option<StartRequest> {
        let input_type = match (&self.camera, &self.file) {
            (Some(_), _) => "Camera",
            (None, Some(_)) => "File",
            (None, None) => return None,
        };
        Some(StartRequest {
            input_type: Some(input_type.to_string()),
            camera_index: self.camera,
            source_path: self.file.clone(),
            token: self.token.clone(),
            chat_id: self.chat_id.clone(),
            from_time: self.from.clone(),
            to_time: self.to.clone(),
            playback_speed: self.speed.map(NumberOrText::Number),
            target_fps: self.fps.map(NumberOrText::Number),
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = GarudaConfig::load()?;

    let registry = build_registry(&config)?;
    registry.warm_up_all()?;
    let detector = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    log::info!(
        "detector backend: {}",
        registry.default_name().unwrap_or("none")
    );

    let transport = Arc::new(TelegramTransport::new(
        config.alert.api_base.clone(),
        config.alert.timeout,
        config.stream.jpeg_quality,
    ));
    let dispatcher = Arc::new(AlertDispatcher::new(
        transport,
        config.alert.workers,
        config.alert.queue_depth,
    )?);
    let controller = Arc::new(Controller::new(&config, detector, dispatcher)?);
    let api_handle = ApiServer::new(config.api_addr.clone(), controller.clone()).spawn()?;

    if let Some(request) = args.start_request() {
        match controller.start(&request) {
            Ok(response) => {
                for adjustment in &response.adjustments {
                    log::warn!("start: {}", adjustment);
                }
            }
            Err(err) => log::error!("start from command line failed: {}", err),
        }
    }

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("garudad waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    if let Some(report) = controller.shutdown() {
        log::info!(
            "last session: frames={} inferences={} detections={} alerts={} emitted={}",
            report.frames,
            report.inferences,
            report.detections,
            report.alerts_queued,
            report.emitted
        );
    }
    Ok(())
}

fn build_registry(config: &GarudaConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match config.detector.backend.as_str() {
        "stub" => registry.register(StubBackend::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = config
                .detector
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("detector backend 'tract' requires a model_path"))?;
            let backend = garuda_watch::detect::TractBackend::new(model_path, config.detector.input_size)?
                .with_threshold(config.detector.confidence);
            registry.register(backend);
        }
        other => bail!(
            "detector backend '{}' is not available in this build",
            other
        ),
    }
    Ok(registry)
}
