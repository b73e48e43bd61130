//! Session configuration and the control-surface payloads.
//!
//! A session is configured wholesale on every start request. Numeric input is
//! never rejected: out-of-range values are clamped and unparsable ones fall
//! back to defaults, and each such adjustment is reported back to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::GarudaError;
use crate::ingest::rate::{
    clamp_playback_speed, clamp_target_fps, DEFAULT_PLAYBACK_SPEED, DEFAULT_TARGET_FPS,
};

pub const DEFAULT_FROM_TIME: &str = "00:00:00";
pub const DEFAULT_TO_TIME: &str = "23:59:59";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    Camera,
    File,
}

impl InputKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "camera" => Some(InputKind::Camera),
            "file" | "video" => Some(InputKind::File),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceRef {
    Camera(u32),
    File(PathBuf),
}

impl SourceRef {
    pub fn kind(&self) -> InputKind {
        match self {
            SourceRef::Camera(_) => InputKind::Camera,
            SourceRef::File(_) => InputKind::File,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Camera(index) => write!(f, "camera:{}", index),
            SourceRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Bot token plus destination chat. Alerting is disabled unless both are set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AlertCredential {
    pub token: String,
    pub chat_id: String,
}

impl AlertCredential {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty() && !self.chat_id.trim().is_empty()
    }
}

// The token is a secret; keep it out of debug logs.
impl fmt::Debug for AlertCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertCredential")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Daily `[from, to]` window as entered. Parsing happens in the gate, which
/// fails closed on malformed values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub from: String,
    pub to: String,
}

impl ActiveWindow {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self::new(DEFAULT_FROM_TIME, DEFAULT_TO_TIME)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub source: SourceRef,
    pub credential: AlertCredential,
    pub window: ActiveWindow,
    pub playback_speed: f64,
    pub target_fps: f64,
}

impl SessionConfig {
    pub fn input_kind(&self) -> InputKind {
        self.source.kind()
    }

    /// Build the next session from a start request.
    ///
    /// `previous` supplies the fallback source when a file session is requested
    /// without a path. Returns every adjustment that was applied.
    pub fn from_request(
        request: &StartRequest,
        previous: &SessionConfig,
    ) -> (SessionConfig, Vec<GarudaError>) {
        let mut adjustments = Vec::new();

        let kind = match request.input_type.as_deref() {
            None => InputKind::Camera,
            Some(raw) => InputKind::parse(raw).unwrap_or_else(|| {
                adjustments.push(GarudaError::invalid_config("input_type", raw, "Camera"));
                InputKind::Camera
            }),
        };

        let source = match kind {
            InputKind::Camera => SourceRef::Camera(request.camera_index.unwrap_or(0)),
            InputKind::File => match request.source_path.as_deref().map(str::trim) {
                Some(path) if !path.is_empty() => SourceRef::File(PathBuf::from(path)),
                _ => {
                    adjustments.push(GarudaError::invalid_config(
                        "source_path",
                        "",
                        &previous.source,
                    ));
                    previous.source.clone()
                }
            },
        };

        let playback_speed = clamp_field(
            "playback_speed",
            request.playback_speed.as_ref(),
            DEFAULT_PLAYBACK_SPEED,
            clamp_playback_speed,
            &mut adjustments,
        );
        let target_fps = clamp_field(
            "target_fps",
            request.target_fps.as_ref(),
            DEFAULT_TARGET_FPS,
            clamp_target_fps,
            &mut adjustments,
        );

        let config = SessionConfig {
            source,
            credential: AlertCredential::new(
                request.token.clone().unwrap_or_default(),
                request.chat_id.clone().unwrap_or_default(),
            ),
            window: ActiveWindow::new(
                request
                    .from_time
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FROM_TIME.to_string()),
                request
                    .to_time
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TO_TIME.to_string()),
            ),
            playback_speed,
            target_fps,
        };
        (config, adjustments)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source: SourceRef::Camera(0),
            credential: AlertCredential::default(),
            window: ActiveWindow::default(),
            playback_speed: DEFAULT_PLAYBACK_SPEED,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

fn clamp_field(
    field: &'static str,
    raw: Option<&NumberOrText>,
    default: f64,
    clamp: fn(f64) -> f64,
    adjustments: &mut Vec<GarudaError>,
) -> f64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.as_f64() {
        Some(value) if value.is_finite() => {
            let clamped = clamp(value);
            if clamped != value {
                adjustments.push(GarudaError::invalid_config(field, value, clamped));
            }
            clamped
        }
        _ => {
            adjustments.push(GarudaError::invalid_config(field, raw, default));
            default
        }
    }
}

/// Form fields arrive as text from browsers and as numbers from scripts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NumberOrText::Number(value) => Some(*value),
            NumberOrText::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl fmt::Display for NumberOrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrText::Number(value) => write!(f, "{}", value),
            NumberOrText::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Start command payload. Every field is optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub input_type: Option<String>,
    pub camera_index: Option<u32>,
    pub source_path: Option<String>,
    pub token: Option<String>,
    pub chat_id: Option<String>,
    pub from_time: Option<String>,
    pub to_time: Option<String>,
    pub playback_speed: Option<NumberOrText>,
    pub target_fps: Option<NumberOrText>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub message: String,
    pub adjustments: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub input_type: InputKind,
    pub from_time: String,
    pub to_time: String,
    pub playback_speed: f64,
    pub target_fps: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> StartRequest {
        StartRequest {
            input_type: Some("File".to_string()),
            source_path: Some("clips/yard.mp4".to_string()),
            ..StartRequest::default()
        }
    }

    #[test]
    fn numeric_fields_are_clamped_not_rejected() {
        let mut req = request();
        req.playback_speed = Some(NumberOrText::Number(25.0));
        req.target_fps = Some(NumberOrText::Text("0.2".to_string()));

        let (cfg, adjustments) = SessionConfig::from_request(&req, &SessionConfig::default());

        assert_eq!(cfg.playback_speed, 10.0);
        assert_eq!(cfg.target_fps, 1.0);
        assert_eq!(adjustments.len(), 2);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let mut req = request();
        req.playback_speed = Some(NumberOrText::Text("fast".to_string()));
        req.target_fps = Some(NumberOrText::Text("".to_string()));

        let (cfg, adjustments) = SessionConfig::from_request(&req, &SessionConfig::default());

        assert_eq!(cfg.playback_speed, 1.0);
        assert_eq!(cfg.target_fps, 15.0);
        assert!(adjustments
            .iter()
            .all(|a| matches!(a, GarudaError::InvalidConfiguration { .. })));
    }

    #[test]
    fn file_session_without_path_keeps_previous_source() {
        let previous = SessionConfig {
            source: SourceRef::File(PathBuf::from("uploads/gate.mp4")),
            ..SessionConfig::default()
        };
        let req = StartRequest {
            input_type: Some("File".to_string()),
            ..StartRequest::default()
        };

        let (cfg, adjustments) = SessionConfig::from_request(&req, &previous);

        assert_eq!(cfg.source, previous.source);
        assert_eq!(adjustments.len(), 1);
    }

    #[test]
    fn camera_defaults_match_process_defaults() {
        let (cfg, adjustments) =
            SessionConfig::from_request(&StartRequest::default(), &SessionConfig::default());
        assert_eq!(cfg, SessionConfig::default());
        assert!(adjustments.is_empty());
        assert!(!cfg.credential.is_complete());
    }

    #[test]
    fn credential_requires_both_fields() {
        assert!(!AlertCredential::new("123:abc", "").is_complete());
        assert!(!AlertCredential::new(" ", "42").is_complete());
        assert!(AlertCredential::new("123:abc", "42").is_complete());
    }

    #[test]
    fn credential_debug_redacts_token() {
        let rendered = format!("{:?}", AlertCredential::new("123:secret", "42"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("42"));
    }

    #[test]
    fn start_request_accepts_form_style_strings() -> anyhow::Result<()> {
        let req: StartRequest = serde_json::from_str(
            r#"{"input_type":"Camera","playback_speed":"2.5","target_fps":12}"#,
        )?;
        let (cfg, _) = SessionConfig::from_request(&req, &SessionConfig::default());
        assert_eq!(cfg.playback_speed, 2.5);
        assert_eq!(cfg.target_fps, 12.0);
        Ok(())
    }
}
