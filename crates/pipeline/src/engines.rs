//! Engine registry
//!
//! Holds the engines a deployment has loaded, keyed by id per stage kind,
//! and answers capability queries from their declared languages and formats.

use std::collections::HashMap;
use std::sync::Arc;

use assist_core::{
    CapabilityProvider, ConversationAgent, FormatRequirement, PipelineStage, SpeechToTextEngine,
    TextToSpeechEngine, WakeWordEngine,
};

#[derive(Default, Clone)]
pub struct EngineRegistry {
    wake_word: HashMap<String, Arc<dyn WakeWordEngine>>,
    stt: HashMap<String, Arc<dyn SpeechToTextEngine>>,
    conversation: HashMap<String, Arc<dyn ConversationAgent>>,
    tts: HashMap<String, Arc<dyn TextToSpeechEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wake_word(mut self, id: impl Into<String>, engine: Arc<dyn WakeWordEngine>) -> Self {
        self.wake_word.insert(id.into(), engine);
        self
    }

    pub fn with_stt(mut self, id: impl Into<String>, engine: Arc<dyn SpeechToTextEngine>) -> Self {
        self.stt.insert(id.into(), engine);
        self
    }

    pub fn with_conversation(
        mut self,
        id: impl Into<String>,
        agent: Arc<dyn ConversationAgent>,
    ) -> Self {
        self.conversation.insert(id.into(), agent);
        self
    }

    pub fn with_tts(mut self, id: impl Into<String>, engine: Arc<dyn TextToSpeechEngine>) -> Self {
        self.tts.insert(id.into(), engine);
        self
    }

    pub fn wake_word(&self, id: &str) -> Option<Arc<dyn WakeWordEngine>> {
        self.wake_word.get(id).cloned()
    }

    pub fn stt(&self, id: &str) -> Option<Arc<dyn SpeechToTextEngine>> {
        self.stt.get(id).cloned()
    }

    pub fn conversation(&self, id: &str) -> Option<Arc<dyn ConversationAgent>> {
        self.conversation.get(id).cloned()
    }

    pub fn tts(&self, id: &str) -> Option<Arc<dyn TextToSpeechEngine>> {
        self.tts.get(id).cloned()
    }

    /// Ids registered for a stage, sorted
    pub fn engine_ids(&self, stage: PipelineStage) -> Vec<String> {
        let mut ids: Vec<String> = match stage {
            PipelineStage::WakeWord => self.wake_word.keys().cloned().collect(),
            PipelineStage::Stt => self.stt.keys().cloned().collect(),
            PipelineStage::Intent => self.conversation.keys().cloned().collect(),
            PipelineStage::Tts => self.tts.keys().cloned().collect(),
        };
        ids.sort();
        ids
    }
}

impl CapabilityProvider for EngineRegistry {
    fn contains(&self, stage: PipelineStage, engine_id: &str) -> bool {
        match stage {
            PipelineStage::WakeWord => self.wake_word.contains_key(engine_id),
            PipelineStage::Stt => self.stt.contains_key(engine_id),
            PipelineStage::Intent => self.conversation.contains_key(engine_id),
            PipelineStage::Tts => self.tts.contains_key(engine_id),
        }
    }

    fn supports(
        &self,
        stage: PipelineStage,
        engine_id: &str,
        language: &str,
        format: Option<&FormatRequirement>,
    ) -> bool {
        match stage {
            // Wake word models are language independent; the wake word id is
            // checked separately
            PipelineStage::WakeWord => self.wake_word.contains_key(engine_id),
            PipelineStage::Stt => {
                let Some(engine) = self.stt.get(engine_id) else {
                    return false;
                };
                if !engine.supports_language(language) {
                    return false;
                }
                match format {
                    Some(FormatRequirement::Speech(metadata)) => {
                        engine.supported_formats().check(metadata).is_ok()
                    },
                    _ => true,
                }
            },
            PipelineStage::Intent => self
                .conversation
                .get(engine_id)
                .is_some_and(|agent| agent.supports_language(language)),
            PipelineStage::Tts => {
                let Some(engine) = self.tts.get(engine_id) else {
                    return false;
                };
                if !engine.supports_language(language) {
                    return false;
                }
                match format {
                    Some(FormatRequirement::TtsOutput(output)) => {
                        engine.supports_output_format(output)
                    },
                    _ => true,
                }
            },
        }
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("wake_word", &self.engine_ids(PipelineStage::WakeWord))
            .field("stt", &self.engine_ids(PipelineStage::Stt))
            .field("conversation", &self.engine_ids(PipelineStage::Intent))
            .field("tts", &self.engine_ids(PipelineStage::Tts))
            .finish()
    }
}
