//! Assist pipeline run engine
//!
//! Features:
//! - Audio stream adapter with enhancement, VAD gating and a debug recording tap
//! - Wake word cooldown shared by every run of a deployment
//! - Stage adapters for wake word, speech-to-text, intent and text-to-speech
//! - Run state machine with strictly ordered events and run/stage deadlines
//! - Entry operation resolving a pipeline and driving one run

pub mod audio;
pub mod cooldown;
pub mod engines;
pub mod events;
pub mod input;
pub mod registry;
pub mod run;
pub mod stages;
pub mod testing;

pub use audio::{AudioSource, AudioStream, DebugRecorder, StreamSummary};
pub use cooldown::{DetectionRecord, WakeWordCooldown};
pub use engines::EngineRegistry;
pub use events::{event_channel, event_stream, PipelineEventCallback};
pub use input::{AudioInput, PipelineInput, ValidatedInput};
pub use registry::{resolve_pipeline, InMemoryPipelineStore, PipelineRegistry};
pub use run::{PipelineRun, RunServices};
pub use stages::{StageFailure, TTS_PROXY_PATH};

use futures::Stream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use assist_config::{ConfigError, PipelineConfig};
use assist_core::{
    AudioSettings, PipelineError, PipelineStage, RunContext, RunOutputs, SpeechMetadata,
    WakeWordSettings,
};

/// Everything one invocation of the entry operation needs
pub struct PipelineRequest {
    callback: PipelineEventCallback,
    context: RunContext,
    start_stage: PipelineStage,
    end_stage: PipelineStage,
    pipeline_id: Option<String>,
    conversation_id: Option<String>,
    device_id: Option<String>,
    tts_audio_output: Option<String>,
    wake_word_settings: WakeWordSettings,
    audio_settings: AudioSettings,
    language: Option<String>,
    cancel: Option<CancellationToken>,
    audio: Option<AudioInput>,
    intent_input: Option<String>,
    tts_input: Option<String>,
}

impl PipelineRequest {
    /// Request for the default STT..TTS window of the preferred pipeline
    pub fn new(callback: PipelineEventCallback) -> Self {
        Self {
            callback,
            context: RunContext::new(),
            start_stage: PipelineStage::Stt,
            end_stage: PipelineStage::Tts,
            pipeline_id: None,
            conversation_id: None,
            device_id: None,
            tts_audio_output: None,
            wake_word_settings: WakeWordSettings::default(),
            audio_settings: AudioSettings::default(),
            language: None,
            cancel: None,
            audio: None,
            intent_input: None,
            tts_input: None,
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_stages(mut self, start: PipelineStage, end: PipelineStage) -> Self {
        self.start_stage = start;
        self.end_stage = end;
        self
    }

    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Requested TTS container, e.g. "wav" or "mp3"
    pub fn with_tts_audio_output(mut self, format: impl Into<String>) -> Self {
        self.tts_audio_output = Some(format.into());
        self
    }

    pub fn with_wake_word_settings(mut self, settings: WakeWordSettings) -> Self {
        self.wake_word_settings = settings;
        self
    }

    pub fn with_audio_settings(mut self, settings: AudioSettings) -> Self {
        self.audio_settings = settings;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_audio<S>(mut self, metadata: SpeechMetadata, stream: S) -> Self
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        self.audio = Some(AudioInput::new(metadata, stream));
        self
    }

    pub fn with_intent_input(mut self, text: impl Into<String>) -> Self {
        self.intent_input = Some(text.into());
        self
    }

    pub fn with_tts_input(mut self, text: impl Into<String>) -> Self {
        self.tts_input = Some(text.into());
        self
    }
}

/// Entry point shared by every caller of a deployment
#[derive(Clone)]
pub struct AssistPipeline {
    registry: Arc<dyn PipelineRegistry>,
    services: RunServices,
}

impl AssistPipeline {
    /// Fails when the config does not pass `PipelineConfig::validate()`
    pub fn new(
        config: PipelineConfig,
        registry: Arc<dyn PipelineRegistry>,
        engines: EngineRegistry,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            registry,
            services: RunServices::new(config, engines)?,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.services.config
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.services.engines
    }

    /// Cooldown shared by every run started here
    pub fn cooldown(&self) -> &Arc<WakeWordCooldown> {
        &self.services.cooldown
    }

    /// Resolve the pipeline and build the run's input without starting it
    pub fn prepare(&self, request: PipelineRequest) -> Result<PipelineInput, PipelineError> {
        let pipeline = resolve_pipeline(self.registry.as_ref(), request.pipeline_id.as_deref())?;

        let mut run = PipelineRun::new(pipeline, request.callback, self.services.clone())
            .with_context(request.context)
            .with_stages(request.start_stage, request.end_stage)
            .with_audio_settings(request.audio_settings)
            .with_wake_word_settings(request.wake_word_settings)
            .with_tts_audio_output(request.tts_audio_output)
            .with_language(request.language);
        if let Some(token) = request.cancel {
            run = run.with_cancellation(token);
        }

        let mut input = PipelineInput::new(run)
            .with_conversation_id(request.conversation_id)
            .with_device_id(request.device_id);
        if let Some(audio) = request.audio {
            input = input.with_audio(audio);
        }
        if let Some(text) = request.intent_input {
            input = input.with_intent_input(text);
        }
        if let Some(text) = request.tts_input {
            input = input.with_tts_input(text);
        }
        Ok(input)
    }

    /// Resolve, validate and execute one run.
    ///
    /// Lookup and validation failures return before any event is emitted.
    pub async fn run(&self, request: PipelineRequest) -> Result<RunOutputs, PipelineError> {
        let input = self.prepare(request)?;
        let validated = input.validate().map_err(|e| {
            tracing::warn!(error = %e, "Pipeline input rejected");
            PipelineError::from(e)
        })?;
        validated.execute().await
    }

    /// Run a pipeline over an audio stream
    pub async fn run_from_audio_stream<S>(
        &self,
        metadata: SpeechMetadata,
        stream: S,
        request: PipelineRequest,
    ) -> Result<RunOutputs, PipelineError>
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        self.run(request.with_audio(metadata, stream)).await
    }
}

impl std::fmt::Debug for AssistPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistPipeline")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
