//! Pipeline run state machine
//!
//! One `PipelineRun` per invocation:
//! `NotStarted -> Running(stage) -> { Done, Error }`.
//!
//! Events are emitted in strict order: `run-start`, then for each stage of
//! the window `<stage>-start`, optional sub-events, `<stage>-end`, and
//! finally exactly one of `run-end` or `error`.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use assist_config::{ConfigError, PipelineConfig};
use assist_core::{
    AudioSettings, Pipeline, PipelineError, PipelineEventData, PipelineStage, RunContext,
    RunOutputs, RunStartData, RunState, StageError, WakeWordSettings,
};

use crate::audio::{AudioStream, AudioStreamConfig, DebugRecorder};
use crate::cooldown::WakeWordCooldown;
use crate::engines::EngineRegistry;
use crate::events::{EventEmitter, PipelineEventCallback};
use crate::input::{AudioInput, RunInputs};
use crate::stages::{IntentRequest, PreparedStage, StageContext, StageFailure};

/// Shared services every run of a deployment uses
#[derive(Clone, Debug)]
pub struct RunServices {
    pub config: Arc<PipelineConfig>,
    pub engines: Arc<EngineRegistry>,
    pub cooldown: Arc<WakeWordCooldown>,
}

impl RunServices {
    /// Fails when the config does not pass `PipelineConfig::validate()`
    pub fn new(config: PipelineConfig, engines: EngineRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let cooldown = Arc::new(WakeWordCooldown::new(config.wake_word_cooldown()));
        Ok(Self {
            config: Arc::new(config),
            engines: Arc::new(engines),
            cooldown,
        })
    }
}

/// One end-to-end execution of a pipeline
pub struct PipelineRun {
    run_id: String,
    pipeline: Arc<Pipeline>,
    context: RunContext,
    start_stage: PipelineStage,
    end_stage: PipelineStage,
    events: EventEmitter,
    audio_settings: AudioSettings,
    wake_word_settings: WakeWordSettings,
    tts_audio_output: Option<String>,
    language: Option<String>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RunState>>,
    services: RunServices,
}

impl PipelineRun {
    pub fn new(
        pipeline: Arc<Pipeline>,
        event_callback: PipelineEventCallback,
        services: RunServices,
    ) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        let (state, _) = watch::channel(RunState::NotStarted);
        Self {
            events: EventEmitter::new(event_callback, &run_id),
            run_id,
            pipeline,
            context: RunContext::new(),
            start_stage: PipelineStage::Stt,
            end_stage: PipelineStage::Tts,
            audio_settings: AudioSettings::default(),
            wake_word_settings: WakeWordSettings::default(),
            tts_audio_output: None,
            language: None,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            services,
        }
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    /// Requested stage window; checked by validation, not here
    pub fn with_stages(mut self, start: PipelineStage, end: PipelineStage) -> Self {
        self.start_stage = start;
        self.end_stage = end;
        self
    }

    pub fn with_audio_settings(mut self, settings: AudioSettings) -> Self {
        self.audio_settings = settings;
        self
    }

    pub fn with_wake_word_settings(mut self, settings: WakeWordSettings) -> Self {
        self.wake_word_settings = settings;
        self
    }

    pub fn with_tts_audio_output(mut self, format: Option<String>) -> Self {
        self.tts_audio_output = format;
        self
    }

    /// Override the language of every stage
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn start_stage(&self) -> PipelineStage {
        self.start_stage
    }

    pub fn end_stage(&self) -> PipelineStage {
        self.end_stage
    }

    pub fn audio_settings(&self) -> &AudioSettings {
        &self.audio_settings
    }

    pub fn wake_word_settings(&self) -> &WakeWordSettings {
        &self.wake_word_settings
    }

    pub fn tts_audio_output(&self) -> Option<&str> {
        self.tts_audio_output.as_deref()
    }

    /// Run language: the override, else the pipeline language
    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(&self.pipeline.language)
    }

    /// Language for one stage: the override, else the stage's own setting
    pub fn stage_language(&self, stage: PipelineStage) -> &str {
        match self.language.as_deref() {
            Some(language) => language,
            None => self.pipeline.language_for(stage),
        }
    }

    pub(crate) fn services(&self) -> &RunServices {
        &self.services
    }

    /// Token that aborts the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Observe state transitions, including the terminal state after
    /// `execute()` has consumed the run
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RunState) {
        self.state.send_replace(state);
    }

    /// Drive the prepared stages to completion
    pub(crate) async fn execute(
        self,
        plan: Vec<PreparedStage>,
        audio: Option<AudioInput>,
        inputs: RunInputs,
    ) -> Result<RunOutputs, PipelineError> {
        let config = self.services.config.clone();
        let ctx = StageContext::new(
            &self.run_id,
            self.events.clone(),
            self.cancel.clone(),
            config.pipeline_timeout(),
        );
        let mut guard = RunGuard {
            run_id: self.run_id.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            armed: true,
        };

        self.events.emit(PipelineEventData::RunStart(RunStartData {
            run_id: self.run_id.clone(),
            pipeline_id: self.pipeline.id.clone(),
            language: self.language().to_string(),
            trace_id: self.context.trace_id.clone(),
            start_stage: self.start_stage,
            end_stage: self.end_stage,
            conversation_id: inputs.conversation_id.clone(),
            device_id: inputs.device_id.clone(),
        }));
        tracing::info!(
            run_id = %self.run_id,
            pipeline_id = %self.pipeline.id,
            trace_id = %self.context.trace_id,
            start_stage = %self.start_stage,
            end_stage = %self.end_stage,
            "Pipeline run started"
        );

        let needs_audio = plan.iter().any(|stage| stage.stage().consumes_audio());
        let (mut stream, recorder) = match audio {
            Some(input) if needs_audio => {
                let (stream, recorder) = self.open_audio(input, &config);
                (Some(stream), recorder)
            },
            _ => (None, None),
        };

        let result = self.drive(&ctx, &plan, stream.as_mut(), &inputs).await;

        // Release audio before reporting the outcome
        if let Some(stream) = stream.take() {
            let summary = stream.close().await;
            tracing::debug!(
                run_id = %self.run_id,
                received = summary.received,
                forwarded = summary.forwarded,
                gated = summary.gated,
                debug_dropped = summary.debug_dropped,
                "Audio stream closed"
            );
        }
        if let Some(recorder) = recorder {
            recorder.finish().await;
        }

        guard.armed = false;
        match result {
            Ok(outputs) => {
                self.set_state(RunState::Done);
                self.events.emit(PipelineEventData::RunEnd {
                    outputs: outputs.clone(),
                });
                tracing::info!(run_id = %self.run_id, "Pipeline run finished");
                Ok(outputs)
            },
            Err(failure) => {
                self.set_state(RunState::Error);
                self.events.emit(PipelineEventData::Error {
                    code: failure.code(),
                    message: failure.to_string(),
                });
                tracing::warn!(
                    run_id = %self.run_id,
                    code = %failure.code(),
                    error = %failure,
                    "Pipeline run failed"
                );
                Err(failure.into())
            },
        }
    }

    fn open_audio(
        &self,
        input: AudioInput,
        config: &PipelineConfig,
    ) -> (AudioStream, Option<DebugRecorder>) {
        let recorder = config.debug_recording_dir.as_ref().map(|dir| {
            DebugRecorder::start(
                dir,
                &self.pipeline.id,
                &self.run_id,
                &input.metadata,
                config.debug_queue_capacity,
            )
        });

        let stream_config = AudioStreamConfig {
            metadata: input.metadata,
            settings: self.audio_settings.clone(),
            vad_threshold_db: config.vad_energy_threshold_db,
            primary_capacity: config.audio_queue_capacity,
        };
        let stream = AudioStream::spawn(
            input.source,
            stream_config,
            recorder.as_ref().and_then(DebugRecorder::sender),
            self.cancel.child_token(),
        );
        (stream, recorder)
    }

    async fn drive(
        &self,
        ctx: &StageContext,
        plan: &[PreparedStage],
        mut audio: Option<&mut AudioStream>,
        inputs: &RunInputs,
    ) -> Result<RunOutputs, StageFailure> {
        let mut outputs = RunOutputs::default();
        let mut conversation_id = inputs.conversation_id.clone();
        let mut intent_text = inputs.intent_input.clone();
        let mut tts_text = inputs.tts_input.clone();

        for prepared in plan {
            let stage = prepared.stage();
            ctx.check_boundary()?;
            self.set_state(RunState::Running(stage));
            tracing::debug!(run_id = %self.run_id, stage = %stage, "Stage started");

            match prepared {
                PreparedStage::WakeWord(wake_word) => {
                    let audio = audio.as_deref_mut().ok_or_else(|| {
                        StageError::WakeStreamFailed("no audio stream".to_string())
                    })?;
                    ctx.emit(wake_word.start_event(audio.metadata()));
                    let output = wake_word.run(ctx, audio).await?;
                    ctx.emit(PipelineEventData::WakeWordEnd {
                        wake_word_output: output.clone(),
                    });
                    outputs.wake_word = Some(output);
                },
                PreparedStage::Stt(stt) => {
                    let audio = audio.as_deref_mut().ok_or_else(|| {
                        StageError::SttStreamError("no audio stream".to_string())
                    })?;
                    ctx.emit(stt.start_event());
                    let result = stt.run(ctx, audio).await?;
                    ctx.emit(PipelineEventData::SttEnd {
                        stt_output: result.clone(),
                    });
                    intent_text = Some(result.text.clone());
                    outputs.stt = Some(result);
                },
                PreparedStage::Intent(intent) => {
                    let text = intent_text.clone().ok_or_else(|| {
                        StageError::IntentRecognitionError("no text to process".to_string())
                    })?;
                    let request = IntentRequest {
                        text: &text,
                        conversation_id: conversation_id.as_deref(),
                        device_id: inputs.device_id.as_deref(),
                        context: &self.context,
                    };
                    ctx.emit(intent.start_event(&request));
                    let result = intent.run(ctx, request).await?;
                    if result.conversation_id.is_some() {
                        conversation_id = result.conversation_id.clone();
                    }
                    ctx.emit(PipelineEventData::IntentEnd {
                        intent_output: result.clone(),
                    });
                    tts_text = Some(result.response.speech.clone());
                    outputs.intent = Some(result);
                },
                PreparedStage::Tts(tts) => {
                    let message = tts_text.clone().unwrap_or_default();
                    ctx.emit(tts.start_event(&message));
                    let output = tts.run(ctx, &message).await?;
                    ctx.emit(PipelineEventData::TtsEnd {
                        tts_output: output.clone(),
                    });
                    outputs.tts = Some(output);
                },
            }

            tracing::debug!(run_id = %self.run_id, stage = %stage, "Stage finished");
        }

        Ok(outputs)
    }
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("run_id", &self.run_id)
            .field("pipeline_id", &self.pipeline.id)
            .field("start_stage", &self.start_stage)
            .field("end_stage", &self.end_stage)
            .field("state", &self.state())
            .finish()
    }
}

/// Reports `cancelled` if the execute future is dropped before it finishes
struct RunGuard {
    run_id: String,
    events: EventEmitter,
    state: Arc<watch::Sender<RunState>>,
    armed: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed || self.events.is_finished() {
            return;
        }
        tracing::warn!(run_id = %self.run_id, "Pipeline run dropped before finishing");
        self.state.send_replace(RunState::Error);
        self.events.emit(PipelineEventData::Error {
            code: assist_core::ErrorCode::Cancelled,
            message: "pipeline run cancelled".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn run(pipeline: Pipeline) -> PipelineRun {
        let (callback, _rx) = event_channel();
        PipelineRun::new(
            Arc::new(pipeline),
            callback,
            RunServices::new(PipelineConfig::default(), EngineRegistry::new()).unwrap(),
        )
    }

    #[test]
    fn test_language_resolution() {
        let mut pipeline = Pipeline::new("p", "Kitchen", "en", "agent");
        pipeline.tts_language = Some("en-GB".to_string());

        let default_run = run(pipeline.clone());
        assert_eq!(default_run.language(), "en");
        assert_eq!(default_run.stage_language(PipelineStage::Tts), "en-GB");

        let override_run = run(pipeline).with_language(Some("de".to_string()));
        assert_eq!(override_run.language(), "de");
        assert_eq!(override_run.stage_language(PipelineStage::Tts), "de");
    }

    #[test]
    fn test_new_run_defaults() {
        let run = run(Pipeline::new("p", "Kitchen", "en", "agent"));
        assert_eq!(run.state(), RunState::NotStarted);
        assert_eq!(run.start_stage(), PipelineStage::Stt);
        assert_eq!(run.end_stage(), PipelineStage::Tts);
        assert_eq!(run.run_id().len(), 32);
        assert!(!run.cancel_token().is_cancelled());
    }
}
