//! Pipeline events
//!
//! Every run reports its progress as a strictly ordered sequence of
//! `PipelineEvent`s: `run-start` first, then `<stage>-start` / `<stage>-end`
//! pairs for each stage of the window (with optional sub-events in between),
//! and finally `run-end` or a single `error`.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::audio::SpeechMetadata;
use crate::conversation::ConversationResult;
use crate::error::ErrorCode;
use crate::stage::PipelineStage;
use crate::traits::{SpeechResult, WakeWordDetection};

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineEventType {
    #[serde(rename = "run-start")]
    RunStart,
    #[serde(rename = "run-end")]
    RunEnd,
    #[serde(rename = "wake_word-start")]
    WakeWordStart,
    #[serde(rename = "wake_word-end")]
    WakeWordEnd,
    #[serde(rename = "stt-start")]
    SttStart,
    #[serde(rename = "stt-vad-start")]
    SttVadStart,
    #[serde(rename = "stt-vad-end")]
    SttVadEnd,
    #[serde(rename = "stt-end")]
    SttEnd,
    #[serde(rename = "intent-start")]
    IntentStart,
    #[serde(rename = "intent-end")]
    IntentEnd,
    #[serde(rename = "tts-start")]
    TtsStart,
    #[serde(rename = "tts-end")]
    TtsEnd,
    #[serde(rename = "error")]
    Error,
}

impl PipelineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "run-start",
            Self::RunEnd => "run-end",
            Self::WakeWordStart => "wake_word-start",
            Self::WakeWordEnd => "wake_word-end",
            Self::SttStart => "stt-start",
            Self::SttVadStart => "stt-vad-start",
            Self::SttVadEnd => "stt-vad-end",
            Self::SttEnd => "stt-end",
            Self::IntentStart => "intent-start",
            Self::IntentEnd => "intent-end",
            Self::TtsStart => "tts-start",
            Self::TtsEnd => "tts-end",
            Self::Error => "error",
        }
    }

    /// Stage whose start this event marks
    pub fn started_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::WakeWordStart => Some(PipelineStage::WakeWord),
            Self::SttStart => Some(PipelineStage::Stt),
            Self::IntentStart => Some(PipelineStage::Intent),
            Self::TtsStart => Some(PipelineStage::Tts),
            _ => None,
        }
    }

    /// Stage whose end this event marks
    pub fn ended_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::WakeWordEnd => Some(PipelineStage::WakeWord),
            Self::SttEnd => Some(PipelineStage::Stt),
            Self::IntentEnd => Some(PipelineStage::Intent),
            Self::TtsEnd => Some(PipelineStage::Tts),
            _ => None,
        }
    }

    /// `run-end` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunEnd | Self::Error)
    }
}

impl fmt::Display for PipelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata reported by `run-start`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStartData {
    pub run_id: String,
    pub pipeline_id: String,
    pub language: String,
    pub trace_id: String,
    pub start_stage: PipelineStage,
    pub end_stage: PipelineStage,
    pub conversation_id: Option<String>,
    pub device_id: Option<String>,
}

/// Wake word stage output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakeWordOutput {
    /// `None` when detection was skipped by the cooldown window
    pub detection: Option<WakeWordDetection>,
    pub skipped_by_cooldown: bool,
}

/// Text-to-speech stage output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsOutput {
    pub media_id: String,
    pub token: String,
    pub url: String,
    pub mime_type: String,
}

/// Outputs of every stage that completed, reported by `run-end`
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_word: Option<WakeWordOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt: Option<SpeechResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<ConversationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOutput>,
}

/// Typed payload of an event, one variant per event type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineEventData {
    RunStart(RunStartData),
    RunEnd {
        outputs: RunOutputs,
    },
    WakeWordStart {
        engine: String,
        metadata: SpeechMetadata,
        timeout_secs: Option<f64>,
    },
    WakeWordEnd {
        wake_word_output: WakeWordOutput,
    },
    SttStart {
        engine: String,
        metadata: SpeechMetadata,
    },
    SttVadStart {
        timestamp_ms: u64,
    },
    SttVadEnd {
        timestamp_ms: u64,
    },
    SttEnd {
        stt_output: SpeechResult,
    },
    IntentStart {
        engine: String,
        language: String,
        intent_input: String,
        conversation_id: Option<String>,
        device_id: Option<String>,
    },
    IntentEnd {
        intent_output: ConversationResult,
    },
    TtsStart {
        engine: String,
        language: String,
        voice: Option<String>,
        tts_input: String,
    },
    TtsEnd {
        tts_output: TtsOutput,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl PipelineEventData {
    pub fn event_type(&self) -> PipelineEventType {
        match self {
            Self::RunStart(_) => PipelineEventType::RunStart,
            Self::RunEnd { .. } => PipelineEventType::RunEnd,
            Self::WakeWordStart { .. } => PipelineEventType::WakeWordStart,
            Self::WakeWordEnd { .. } => PipelineEventType::WakeWordEnd,
            Self::SttStart { .. } => PipelineEventType::SttStart,
            Self::SttVadStart { .. } => PipelineEventType::SttVadStart,
            Self::SttVadEnd { .. } => PipelineEventType::SttVadEnd,
            Self::SttEnd { .. } => PipelineEventType::SttEnd,
            Self::IntentStart { .. } => PipelineEventType::IntentStart,
            Self::IntentEnd { .. } => PipelineEventType::IntentEnd,
            Self::TtsStart { .. } => PipelineEventType::TtsStart,
            Self::TtsEnd { .. } => PipelineEventType::TtsEnd,
            Self::Error { .. } => PipelineEventType::Error,
        }
    }
}

/// Immutable record of one run transition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub data: PipelineEventData,
}

impl PipelineEvent {
    pub fn new(data: PipelineEventData) -> Self {
        Self {
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn event_type(&self) -> PipelineEventType {
        self.data.event_type()
    }

    /// Error code if this is an `error` event
    pub fn error_code(&self) -> Option<ErrorCode> {
        match &self.data {
            PipelineEventData::Error { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl Serialize for PipelineEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PipelineEvent", 3)?;
        state.serialize_field("type", self.event_type().as_str())?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}
