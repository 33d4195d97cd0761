//! Pipeline input
//!
//! Bundles one [`PipelineRun`] with its audio stream and text inputs.
//! `validate()` checks every precondition and resolves the engines, returning
//! a [`ValidatedInput`]; only a validated input can be executed.

use futures::Stream;
use std::fmt;

use assist_core::{
    CapabilityProvider, FormatRequirement, PipelineError, PipelineStage, RunOutputs,
    SpeechMetadata, StageWindow, ValidationError,
};

use crate::audio::{AudioSource, SegmenterConfig};
use crate::run::PipelineRun;
use crate::stages::{IntentStage, PreparedStage, SttStage, TtsStage, WakeWordStage};

/// Audio stream and its description
pub struct AudioInput {
    pub metadata: SpeechMetadata,
    pub source: AudioSource,
}

impl AudioInput {
    pub fn new<S>(metadata: SpeechMetadata, source: S) -> Self
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        Self {
            metadata,
            source: Box::pin(source),
        }
    }
}

impl fmt::Debug for AudioInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioInput")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Text and conversation inputs of a run
#[derive(Debug, Clone, Default)]
pub(crate) struct RunInputs {
    pub conversation_id: Option<String>,
    pub device_id: Option<String>,
    pub intent_input: Option<String>,
    pub tts_input: Option<String>,
}

/// Entry object for one invocation
#[derive(Debug)]
pub struct PipelineInput {
    run: PipelineRun,
    audio: Option<AudioInput>,
    inputs: RunInputs,
}

impl PipelineInput {
    pub fn new(run: PipelineRun) -> Self {
        Self {
            run,
            audio: None,
            inputs: RunInputs::default(),
        }
    }

    pub fn with_audio(mut self, audio: AudioInput) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Text for the intent stage when the window starts there
    pub fn with_intent_input(mut self, text: impl Into<String>) -> Self {
        self.inputs.intent_input = Some(text.into());
        self
    }

    /// Text for the TTS stage when the window starts there
    pub fn with_tts_input(mut self, text: impl Into<String>) -> Self {
        self.inputs.tts_input = Some(text.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.inputs.conversation_id = conversation_id;
        self
    }

    pub fn with_device_id(mut self, device_id: Option<String>) -> Self {
        self.inputs.device_id = device_id;
        self
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// Check the stage window, inputs, engines, languages and formats.
    ///
    /// Emits no events; a failed input is discarded.
    pub fn validate(self) -> Result<ValidatedInput, ValidationError> {
        let run = &self.run;
        let window = StageWindow::new(run.start_stage(), run.end_stage())?;

        let metadata = self.validate_inputs(window)?;

        let mut plan = Vec::new();
        for stage in window.stages() {
            plan.push(self.prepare_stage(stage, metadata.as_ref())?);
        }

        tracing::debug!(
            run_id = %run.run_id(),
            pipeline_id = %run.pipeline().id,
            stages = ?plan,
            "Pipeline input validated"
        );

        Ok(ValidatedInput {
            run: self.run,
            plan,
            audio: self.audio,
            inputs: self.inputs,
        })
    }

    /// Inputs required by the first stage; returns the STT metadata with the
    /// resolved language when audio is used
    fn validate_inputs(&self, window: StageWindow) -> Result<Option<SpeechMetadata>, ValidationError> {
        let start = window.start();

        if start.consumes_audio() {
            let audio = self.audio.as_ref().ok_or_else(|| ValidationError::MissingInput {
                stage: start,
                detail: "an audio stream is required".to_string(),
            })?;
            let mut metadata = audio.metadata.clone();
            metadata.validate()?;
            if window.contains(PipelineStage::Stt) {
                metadata.language = self.run.stage_language(PipelineStage::Stt).to_string();
            }
            return Ok(Some(metadata));
        }

        let required = match start {
            PipelineStage::Intent => Some(("intent", self.inputs.intent_input.as_deref())),
            PipelineStage::Tts => Some(("tts", self.inputs.tts_input.as_deref())),
            _ => None,
        };
        if let Some((name, text)) = required {
            if text.map_or(true, |t| t.trim().is_empty()) {
                return Err(ValidationError::MissingInput {
                    stage: start,
                    detail: format!("{} input text is required", name),
                });
            }
        }

        Ok(None)
    }

    fn prepare_stage(
        &self,
        stage: PipelineStage,
        metadata: Option<&SpeechMetadata>,
    ) -> Result<PreparedStage, ValidationError> {
        let run = &self.run;
        let pipeline = run.pipeline();
        let services = run.services();
        let engines = services.engines.as_ref();
        let config = services.config.as_ref();

        let engine_id = pipeline
            .engine_for(stage)
            .ok_or_else(|| ValidationError::EngineMissing {
                stage,
                pipeline_id: pipeline.id.clone(),
            })?;
        if !engines.contains(stage, engine_id) {
            return Err(ValidationError::EngineNotFound {
                stage,
                engine: engine_id.to_string(),
            });
        }

        let language = run.stage_language(stage);
        if !engines.supports(stage, engine_id, language, None) {
            return Err(ValidationError::UnsupportedLanguage {
                stage,
                engine: engine_id.to_string(),
                language: language.to_string(),
            });
        }

        let not_found = || ValidationError::EngineNotFound {
            stage,
            engine: engine_id.to_string(),
        };
        let missing_audio = || ValidationError::MissingInput {
            stage,
            detail: "an audio stream is required".to_string(),
        };

        let prepared = match stage {
            PipelineStage::WakeWord => {
                let engine = engines.wake_word(engine_id).ok_or_else(not_found)?;
                if let Some(wake_word_id) = pipeline.wake_word_id.as_deref() {
                    if !engine.supports_wake_word(wake_word_id) {
                        return Err(ValidationError::UnsupportedWakeWord {
                            engine: engine_id.to_string(),
                            wake_word_id: wake_word_id.to_string(),
                        });
                    }
                }
                let timeout = run
                    .wake_word_settings()
                    .timeout_duration()?
                    .unwrap_or_else(|| config.wake_word_timeout());
                PreparedStage::WakeWord(WakeWordStage::new(
                    engine,
                    engine_id,
                    pipeline.id.clone(),
                    pipeline.wake_word_id.clone(),
                    timeout,
                    services.cooldown.clone(),
                ))
            },
            PipelineStage::Stt => {
                let metadata = metadata.ok_or_else(missing_audio)?;
                let engine = engines.stt(engine_id).ok_or_else(not_found)?;
                let requirement = FormatRequirement::Speech(metadata.clone());
                if !engines.supports(stage, engine_id, language, Some(&requirement)) {
                    let detail = engine
                        .supported_formats()
                        .check(metadata)
                        .err()
                        .unwrap_or_else(|| metadata.to_string());
                    return Err(ValidationError::UnsupportedFormat {
                        stage,
                        engine: engine_id.to_string(),
                        detail,
                    });
                }

                let mut stt = SttStage::new(engine, engine_id, metadata.clone(), config.stt_timeout());
                if run.audio_settings().is_vad_enabled && metadata.is_pcm16() {
                    stt = stt.with_segmenter(SegmenterConfig::from_pipeline(config));
                }
                PreparedStage::Stt(stt)
            },
            PipelineStage::Intent => {
                let agent = engines.conversation(engine_id).ok_or_else(not_found)?;
                PreparedStage::Intent(IntentStage::new(
                    agent,
                    engine_id,
                    language,
                    config.intent_timeout(),
                ))
            },
            PipelineStage::Tts => {
                let engine = engines.tts(engine_id).ok_or_else(not_found)?;
                let output_format = run
                    .tts_audio_output()
                    .map(str::to_string)
                    .unwrap_or_else(|| engine.default_output_format().to_string());
                let requirement = FormatRequirement::TtsOutput(output_format.clone());
                if !engines.supports(stage, engine_id, language, Some(&requirement)) {
                    return Err(ValidationError::UnsupportedFormat {
                        stage,
                        engine: engine_id.to_string(),
                        detail: format!("output format '{}'", output_format),
                    });
                }
                PreparedStage::Tts(
                    TtsStage::new(engine, engine_id, language, output_format, config.tts_timeout())
                        .with_voice(pipeline.tts_voice.clone()),
                )
            },
        };

        Ok(prepared)
    }
}

/// A validated input, ready to execute once
#[derive(Debug)]
pub struct ValidatedInput {
    run: PipelineRun,
    plan: Vec<PreparedStage>,
    audio: Option<AudioInput>,
    inputs: RunInputs,
}

impl ValidatedInput {
    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    /// Stages that will run, in order
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.plan.iter().map(PreparedStage::stage).collect()
    }

    /// Run the state machine to completion.
    ///
    /// Every failure is also reported as a terminal `error` event.
    pub async fn execute(self) -> Result<RunOutputs, PipelineError> {
        self.run.execute(self.plan, self.audio, self.inputs).await
    }
}
