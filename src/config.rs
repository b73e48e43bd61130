use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::DEFAULT_API_BASE;
use crate::ingest::CaptureSettings;
use crate::pipeline::schedule::DEFAULT_DETECTION_STRIDE;
use crate::pipeline::{Clock, PipelineTuning, SystemClock};
use crate::session::{SessionConfig, StartRequest};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video{index}";
const DEFAULT_INFERENCE_WIDTH: u32 = 640;
const DEFAULT_LIVE_RETRY_MS: u64 = 100;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_TARGET_CLASS: usize = 0;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_ALERT_WORKERS: usize = 2;
const DEFAULT_ALERT_QUEUE_DEPTH: usize = 4;
const DEFAULT_ALERT_CAPTION: &str = "Person detected!";
const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct GarudaConfigFile {
    api: Option<ApiConfigFile>,
    capture: Option<CaptureConfigFile>,
    detector: Option<DetectorConfigFile>,
    alert: Option<AlertConfigFile>,
    stream: Option<StreamConfigFile>,
    clock: Option<ClockConfigFile>,
    session: Option<StartRequest>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    camera_device: Option<String>,
    inference_width: Option<u32>,
    live_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    target_class: Option<usize>,
    stride: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    workers: Option<usize>,
    queue_depth: Option<usize>,
    api_base: Option<String>,
    caption: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    placeholder_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ClockConfigFile {
    utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct GarudaConfig {
    pub api_addr: String,
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub alert: AlertConfig,
    pub stream: StreamConfig,
    /// Fixed zone for the active window; the host zone when unset.
    pub utc_offset_minutes: Option<i32>,
    pub session: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub camera_device: String,
    pub inference_width: u32,
    pub live_retry: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence: f32,
    pub target_class: usize,
    pub stride: u64,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub cooldown: Duration,
    pub workers: usize,
    pub queue_depth: usize,
    pub api_base: String,
    pub caption: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub jpeg_quality: u8,
    pub placeholder_path: Option<PathBuf>,
}

impl GarudaConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GARUDA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GarudaConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        let session = match file.session {
            Some(request) => {
                let (session, adjustments) =
                    SessionConfig::from_request(&request, &SessionConfig::default());
                for adjustment in adjustments {
                    log::warn!("config: session default {}", adjustment);
                }
                session
            }
            None => SessionConfig::default(),
        };

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            capture: CaptureConfig {
                camera_device: capture
                    .camera_device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                inference_width: capture.inference_width.unwrap_or(DEFAULT_INFERENCE_WIDTH),
                live_retry: Duration::from_millis(
                    capture.live_retry_ms.unwrap_or(DEFAULT_LIVE_RETRY_MS),
                ),
            },
            detector: DetectorConfig {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                target_class: detector.target_class.unwrap_or(DEFAULT_TARGET_CLASS),
                stride: detector.stride.unwrap_or(DEFAULT_DETECTION_STRIDE),
            },
            alert: AlertConfig {
                cooldown: Duration::from_secs(
                    alert.cooldown_secs.unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
                ),
                workers: alert.workers.unwrap_or(DEFAULT_ALERT_WORKERS),
                queue_depth: alert.queue_depth.unwrap_or(DEFAULT_ALERT_QUEUE_DEPTH),
                api_base: alert
                    .api_base
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                caption: alert
                    .caption
                    .unwrap_or_else(|| DEFAULT_ALERT_CAPTION.to_string()),
                timeout: Duration::from_secs(
                    alert.timeout_secs.unwrap_or(DEFAULT_ALERT_TIMEOUT_SECS),
                ),
            },
            stream: StreamConfig {
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                placeholder_path: stream.placeholder_path,
            },
            utc_offset_minutes: file.clock.and_then(|clock| clock.utc_offset_minutes),
            session,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("GARUDA_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = env_value("GARUDA_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_value("GARUDA_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(device) = env_value("GARUDA_CAMERA_DEVICE") {
            self.capture.camera_device = device;
        }
        if let Some(base) = env_value("GARUDA_ALERT_API_BASE") {
            self.alert.api_base = base;
        }
        if let Some(cooldown) = env_value("GARUDA_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("GARUDA_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(seconds);
        }
        if let Some(offset) = env_value("GARUDA_UTC_OFFSET_MINUTES") {
            let minutes: i32 = offset
                .parse()
                .map_err(|_| anyhow!("GARUDA_UTC_OFFSET_MINUTES must be an integer"))?;
            self.utc_offset_minutes = Some(minutes);
        }
        if let Some(path) = env_value("GARUDA_PLACEHOLDER_PATH") {
            self.stream.placeholder_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("api addr '{}' is not a socket address", self.api_addr))?;

        self.detector.backend = self.detector.backend.trim().to_lowercase();
        match self.detector.backend.as_str() {
            "stub" => {}
            "tract" => {
                if self.detector.model_path.is_none() {
                    return Err(anyhow!("detector backend 'tract' requires a model_path"));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("detector confidence must be within 0..=1"));
        }
        if self.detector.input_size == 0 || self.capture.inference_width == 0 {
            return Err(anyhow!("detector input size and inference width must be non-zero"));
        }
        if self.alert.workers == 0 {
            return Err(anyhow!("alert workers must be greater than zero"));
        }
        if self.alert.queue_depth == 0 {
            return Err(anyhow!("alert queue depth must be greater than zero"));
        }
        if self.stream.jpeg_quality == 0 || self.stream.jpeg_quality > 100 {
            return Err(anyhow!("stream jpeg_quality must be within 1..=100"));
        }
        if let Some(minutes) = self.utc_offset_minutes {
            if SystemClock::with_utc_offset_minutes(minutes).is_none() {
                return Err(anyhow!("utc offset {} minutes is out of range", minutes));
            }
        }
        Ok(())
    }

    /// Capture settings for one session.
    pub fn capture_settings(&self, session: &SessionConfig) -> CaptureSettings {
        CaptureSettings {
            camera_device: self.capture.camera_device.clone(),
            live_retry: self.capture.live_retry,
            playback_speed: session.playback_speed,
            target_fps: session.target_fps,
        }
    }

    pub fn pipeline_tuning(&self) -> PipelineTuning {
        PipelineTuning {
            inference_width: self.capture.inference_width,
            target_class: self.detector.target_class,
            detection_stride: self.detector.stride,
            jpeg_quality: self.stream.jpeg_quality,
            alert_caption: self.alert.caption.clone(),
            alert_cooldown: self.alert.cooldown,
            ..PipelineTuning::default()
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        let clock = self
            .utc_offset_minutes
            .and_then(SystemClock::with_utc_offset_minutes)
            .unwrap_or_else(SystemClock::local);
        Arc::new(clock)
    }

    /// The idle placeholder: the configured JPEG file, or the built-in card.
    pub fn placeholder_jpeg(&self) -> Result<Vec<u8>> {
        match &self.stream.placeholder_path {
            Some(path) => std::fs::read(path)
                .map_err(|e| anyhow!("failed to read placeholder {}: {}", path.display(), e)),
            None => crate::annotate::placeholder_jpeg(self.stream.jpeg_quality),
        }
    }
}

impl Default for GarudaConfig {
    fn default() -> Self {
        Self::from_file(GarudaConfigFile::default())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<GarudaConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
