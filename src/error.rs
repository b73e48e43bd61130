use thiserror::Error;

/// Failure kinds the pipeline has to tell apart.
///
/// Only `SourceUnavailable` ever escapes a session start. The rest are
/// contained to the acquisition cycle or loop iteration that produced them
/// and are surfaced through logs (or, for configuration, as adjustments in
/// the start response).
#[derive(Debug, Error)]
pub enum GarudaError {
    #[error("source {source_ref} unavailable: {reason}")]
    SourceUnavailable { source_ref: String, reason: String },
    #[error("transient acquisition failure: {0}")]
    TransientAcquisition(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("alert dispatch failed: {0}")]
    AlertDispatch(String),
    #[error("invalid {field} '{value}', using {applied}")]
    InvalidConfiguration {
        field: &'static str,
        value: String,
        applied: String,
    },
}

impl GarudaError {
    pub fn source_unavailable(source_ref: impl ToString, err: &anyhow::Error) -> Self {
        GarudaError::SourceUnavailable {
            source_ref: source_ref.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub fn invalid_config(
        field: &'static str,
        value: impl ToString,
        applied: impl ToString,
    ) -> Self {
        GarudaError::InvalidConfiguration {
            field,
            value: value.to_string(),
            applied: applied.to_string(),
        }
    }
}
