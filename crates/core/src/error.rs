//! Error taxonomy for the assist pipeline
//!
//! - [`ValidationError`]: raised by `validate()` before a run starts, never mid-run
//! - [`StageError`]: raised by a stage during `execute()`, always mirrored by an
//!   `error` event
//! - [`PipelineError`]: what callers of the entry operation receive
//! - [`EngineError`]: what external engines return to their stage adapter

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::stage::PipelineStage;

/// Result alias used across the assist crates
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Precondition failures detected before any stage runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("start stage {start} is after end stage {end}")]
    InvalidStageWindow {
        start: PipelineStage,
        end: PipelineStage,
    },

    #[error("pipeline {pipeline_id} has no {stage} engine configured")]
    EngineMissing {
        stage: PipelineStage,
        pipeline_id: String,
    },

    #[error("{stage} engine '{engine}' not found")]
    EngineNotFound {
        stage: PipelineStage,
        engine: String,
    },

    #[error("{stage} engine '{engine}' does not support language '{language}'")]
    UnsupportedLanguage {
        stage: PipelineStage,
        engine: String,
        language: String,
    },

    #[error("{stage} engine '{engine}' does not support {detail}")]
    UnsupportedFormat {
        stage: PipelineStage,
        engine: String,
        detail: String,
    },

    #[error("wake word engine '{engine}' cannot listen for '{wake_word_id}'")]
    UnsupportedWakeWord {
        engine: String,
        wake_word_id: String,
    },

    #[error("malformed audio metadata: {0}")]
    MalformedMetadata(String),

    #[error("missing input for {stage} stage: {detail}")]
    MissingInput {
        stage: PipelineStage,
        detail: String,
    },

    #[error("invalid {stage} setting {field}: {detail}")]
    InvalidSetting {
        stage: PipelineStage,
        field: String,
        detail: String,
    },
}

impl ValidationError {
    /// Stage that caused the failure, if one can be named
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::InvalidStageWindow { start, .. } => Some(*start),
            Self::EngineMissing { stage, .. }
            | Self::EngineNotFound { stage, .. }
            | Self::UnsupportedLanguage { stage, .. }
            | Self::UnsupportedFormat { stage, .. }
            | Self::MissingInput { stage, .. }
            | Self::InvalidSetting { stage, .. } => Some(*stage),
            Self::UnsupportedWakeWord { .. } => Some(PipelineStage::WakeWord),
            Self::MalformedMetadata(_) => Some(PipelineStage::Stt),
        }
    }
}

/// Failures raised by a stage while the run executes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("no wake word detected within {0:?}")]
    WakeWordTimeout(Duration),

    #[error("wake word detection failed: {0}")]
    WakeStreamFailed(String),

    #[error("speech-to-text timed out after {0:?}")]
    SttTimeout(Duration),

    #[error("speech-to-text stream failed: {0}")]
    SttStreamError(String),

    #[error("no text recognized")]
    SttNoTextRecognized,

    #[error("intent recognition timed out after {0:?}")]
    IntentTimeout(Duration),

    #[error("intent recognition failed: {0}")]
    IntentRecognitionError(String),

    #[error("text-to-speech timed out after {0:?}")]
    TtsTimeout(Duration),

    #[error("text-to-speech failed: {0}")]
    TtsError(String),
}

impl StageError {
    /// Stage this error belongs to
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::WakeWordTimeout(_) | Self::WakeStreamFailed(_) => PipelineStage::WakeWord,
            Self::SttTimeout(_) | Self::SttStreamError(_) | Self::SttNoTextRecognized => {
                PipelineStage::Stt
            }
            Self::IntentTimeout(_) | Self::IntentRecognitionError(_) => PipelineStage::Intent,
            Self::TtsTimeout(_) | Self::TtsError(_) => PipelineStage::Tts,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::WakeWordTimeout(_) => ErrorCode::WakeWordTimeout,
            Self::WakeStreamFailed(_) => ErrorCode::WakeStreamFailed,
            Self::SttTimeout(_) => ErrorCode::SttTimeout,
            Self::SttStreamError(_) => ErrorCode::SttStreamFailed,
            Self::SttNoTextRecognized => ErrorCode::SttNoTextRecognized,
            Self::IntentTimeout(_) => ErrorCode::IntentTimeout,
            Self::IntentRecognitionError(_) => ErrorCode::IntentFailed,
            Self::TtsTimeout(_) => ErrorCode::TtsTimeout,
            Self::TtsError(_) => ErrorCode::TtsFailed,
        }
    }

    /// Timeout variant for a stage
    pub fn timeout(stage: PipelineStage, after: Duration) -> Self {
        match stage {
            PipelineStage::WakeWord => Self::WakeWordTimeout(after),
            PipelineStage::Stt => Self::SttTimeout(after),
            PipelineStage::Intent => Self::IntentTimeout(after),
            PipelineStage::Tts => Self::TtsTimeout(after),
        }
    }
}

/// Top-level error returned by the entry operation and `execute()`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("pipeline timed out after {0:?}")]
    RunTimeout(Duration),

    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Code carried by the terminal `error` event.
    ///
    /// `None` for errors raised before the run starts, which never produce events.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotFound(_) | Self::Validation(_) => None,
            Self::Stage(e) => Some(e.code()),
            Self::RunTimeout(_) => Some(ErrorCode::PipelineTimeout),
            Self::Cancelled => Some(ErrorCode::Cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error reported by an external engine to its stage adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

/// Stable error codes carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    WakeWordTimeout,
    WakeStreamFailed,
    SttTimeout,
    SttStreamFailed,
    SttNoTextRecognized,
    IntentTimeout,
    IntentFailed,
    TtsTimeout,
    TtsFailed,
    PipelineTimeout,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WakeWordTimeout => "wake-word-timeout",
            Self::WakeStreamFailed => "wake-stream-failed",
            Self::SttTimeout => "stt-timeout",
            Self::SttStreamFailed => "stt-stream-failed",
            Self::SttNoTextRecognized => "stt-no-text-recognized",
            Self::IntentTimeout => "intent-timeout",
            Self::IntentFailed => "intent-failed",
            Self::TtsTimeout => "tts-timeout",
            Self::TtsFailed => "tts-failed",
            Self::PipelineTimeout => "pipeline-timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_codes() {
        let err = StageError::timeout(PipelineStage::Stt, Duration::from_secs(5));
        assert_eq!(err.code(), ErrorCode::SttTimeout);
        assert_eq!(err.stage(), PipelineStage::Stt);
        assert_eq!(err.code().as_str(), "stt-timeout");

        let err = StageError::TtsError("engine offline".to_string());
        assert_eq!(err.stage(), PipelineStage::Tts);
        assert_eq!(err.to_string(), "text-to-speech failed: engine offline");
    }

    #[test]
    fn test_pipeline_error_codes() {
        assert_eq!(PipelineError::Cancelled.error_code(), Some(ErrorCode::Cancelled));
        assert_eq!(
            PipelineError::RunTimeout(Duration::from_secs(1)).error_code(),
            Some(ErrorCode::PipelineTimeout)
        );
        assert_eq!(PipelineError::NotFound("x".into()).error_code(), None);

        let err: PipelineError = StageError::SttNoTextRecognized.into();
        assert_eq!(err.error_code(), Some(ErrorCode::SttNoTextRecognized));
    }

    #[test]
    fn test_error_code_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorCode::WakeWordTimeout).unwrap();
        assert_eq!(json, "\"wake-word-timeout\"");
    }

    #[test]
    fn test_validation_error_names_stage() {
        let err = ValidationError::UnsupportedLanguage {
            stage: PipelineStage::Tts,
            engine: "piper".into(),
            language: "xx".into(),
        };
        assert_eq!(err.stage(), Some(PipelineStage::Tts));
        assert!(err.to_string().contains("piper"));
    }
}
