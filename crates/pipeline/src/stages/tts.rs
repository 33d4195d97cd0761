//! Text-to-speech stage

use std::sync::Arc;
use std::time::Duration;

use assist_core::{
    PipelineEventData, PipelineStage, StageError, TextToSpeechEngine, TtsOutput, TtsRequest,
};

use super::{StageContext, StageFailure};

/// URL prefix the synthesized audio is served under
pub const TTS_PROXY_PATH: &str = "/api/tts_proxy";

pub struct TtsStage {
    engine: Arc<dyn TextToSpeechEngine>,
    engine_id: String,
    language: String,
    voice: Option<String>,
    output_format: String,
    timeout: Option<Duration>,
}

impl TtsStage {
    pub fn new(
        engine: Arc<dyn TextToSpeechEngine>,
        engine_id: impl Into<String>,
        language: impl Into<String>,
        output_format: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            engine_id: engine_id.into(),
            language: language.into(),
            voice: None,
            output_format: output_format.into(),
            timeout,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }

    pub fn start_event(&self, message: &str) -> PipelineEventData {
        PipelineEventData::TtsStart {
            engine: self.engine_id.clone(),
            language: self.language.clone(),
            voice: self.voice.clone(),
            tts_input: message.to_string(),
        }
    }

    pub async fn run(&self, ctx: &StageContext, message: &str) -> Result<TtsOutput, StageFailure> {
        if message.trim().is_empty() {
            return Err(StageError::TtsError("no text to synthesize".to_string()).into());
        }

        let request = TtsRequest {
            message: message.to_string(),
            language: self.language.clone(),
            voice: self.voice.clone(),
            output_format: self.output_format.clone(),
        };

        let synthesize = async {
            self.engine
                .synthesize(&request)
                .await
                .map_err(|e| StageError::TtsError(e.to_string()))
        };

        let audio = ctx
            .bounded(PipelineStage::Tts, self.timeout, synthesize)
            .await?;

        tracing::info!(
            run_id = %ctx.run_id(),
            engine = %self.engine.model_name(),
            token = %audio.token,
            "Speech synthesized"
        );

        Ok(TtsOutput {
            media_id: format!("media-source://tts/{}/{}", self.engine_id, audio.token),
            url: format!("{}/{}", TTS_PROXY_PATH, audio.token),
            token: audio.token,
            mime_type: audio.mime_type,
        })
    }
}
