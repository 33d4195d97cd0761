//! Pipeline definition
//!
//! A `Pipeline` is created by the registry that owns persisted definitions and
//! is read-only to everything in this workspace.

use serde::{Deserialize, Serialize};

use crate::stage::PipelineStage;

/// Named stage configuration for the assist pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    /// Default language for every stage
    pub language: String,

    /// Conversation agent handling the intent stage
    pub conversation_engine: String,
    #[serde(default)]
    pub conversation_language: Option<String>,

    #[serde(default)]
    pub stt_engine: Option<String>,
    #[serde(default)]
    pub stt_language: Option<String>,

    #[serde(default)]
    pub tts_engine: Option<String>,
    #[serde(default)]
    pub tts_language: Option<String>,
    #[serde(default)]
    pub tts_voice: Option<String>,

    #[serde(default)]
    pub wake_word_engine: Option<String>,
    /// Wake word model / phrase the engine should listen for
    #[serde(default)]
    pub wake_word_id: Option<String>,
}

impl Pipeline {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
        conversation_engine: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            conversation_engine: conversation_engine.into(),
            conversation_language: None,
            stt_engine: None,
            stt_language: None,
            tts_engine: None,
            tts_language: None,
            tts_voice: None,
            wake_word_engine: None,
            wake_word_id: None,
        }
    }

    pub fn with_stt(mut self, engine: impl Into<String>) -> Self {
        self.stt_engine = Some(engine.into());
        self
    }

    pub fn with_tts(mut self, engine: impl Into<String>, voice: Option<String>) -> Self {
        self.tts_engine = Some(engine.into());
        self.tts_voice = voice;
        self
    }

    pub fn with_wake_word(mut self, engine: impl Into<String>, wake_word_id: Option<String>) -> Self {
        self.wake_word_engine = Some(engine.into());
        self.wake_word_id = wake_word_id;
        self
    }

    /// Engine configured for a stage
    pub fn engine_for(&self, stage: PipelineStage) -> Option<&str> {
        match stage {
            PipelineStage::WakeWord => self.wake_word_engine.as_deref(),
            PipelineStage::Stt => self.stt_engine.as_deref(),
            PipelineStage::Intent => Some(self.conversation_engine.as_str()),
            PipelineStage::Tts => self.tts_engine.as_deref(),
        }
    }

    /// Language for a stage, falling back to the pipeline language
    pub fn language_for(&self, stage: PipelineStage) -> &str {
        let specific = match stage {
            PipelineStage::WakeWord => None,
            PipelineStage::Stt => self.stt_language.as_deref(),
            PipelineStage::Intent => self.conversation_language.as_deref(),
            PipelineStage::Tts => self.tts_language.as_deref(),
        };
        specific.unwrap_or(&self.language)
    }
}
