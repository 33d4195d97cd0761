//! Wake word stage

use std::sync::Arc;
use std::time::Duration;

use assist_core::{
    PipelineEventData, PipelineStage, SpeechMetadata, StageError, WakeWordEngine, WakeWordOutput,
};

use super::{StageContext, StageFailure};
use crate::audio::AudioStream;
use crate::cooldown::{DetectionRecord, WakeWordCooldown};

pub struct WakeWordStage {
    engine: Arc<dyn WakeWordEngine>,
    engine_id: String,
    pipeline_id: String,
    wake_word_id: Option<String>,
    timeout: Duration,
    cooldown: Arc<WakeWordCooldown>,
}

impl WakeWordStage {
    pub fn new(
        engine: Arc<dyn WakeWordEngine>,
        engine_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        wake_word_id: Option<String>,
        timeout: Duration,
        cooldown: Arc<WakeWordCooldown>,
    ) -> Self {
        Self {
            engine,
            engine_id: engine_id.into(),
            pipeline_id: pipeline_id.into(),
            wake_word_id,
            timeout,
            cooldown,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start_event(&self, metadata: &SpeechMetadata) -> PipelineEventData {
        PipelineEventData::WakeWordStart {
            engine: self.engine_id.clone(),
            metadata: metadata.clone(),
            timeout_secs: Some(self.timeout.as_secs_f64()),
        }
    }

    /// Wait for a wake word, or skip detection inside the cooldown window
    pub async fn run(
        &self,
        ctx: &StageContext,
        audio: &mut AudioStream,
    ) -> Result<WakeWordOutput, StageFailure> {
        if self.cooldown.in_cooldown(&self.pipeline_id) {
            tracing::info!(
                run_id = %ctx.run_id(),
                pipeline_id = %self.pipeline_id,
                "Wake word cooldown active, skipping detection"
            );
            return Ok(WakeWordOutput {
                detection: None,
                skipped_by_cooldown: true,
            });
        }

        let wake_word_id = self.wake_word_id.as_deref();
        let detect = async {
            match self.engine.detect(audio.chunks(), wake_word_id).await {
                Ok(Some(detection)) => Ok(detection),
                Ok(None) => Err(StageError::WakeStreamFailed(
                    "audio stream ended before a wake word was detected".to_string(),
                )),
                Err(e) => Err(StageError::WakeStreamFailed(e.to_string())),
            }
        };

        let detection = ctx
            .bounded(PipelineStage::WakeWord, Some(self.timeout), detect)
            .await?;

        let skipped_by_cooldown = match self.cooldown.record_detection(&self.pipeline_id) {
            DetectionRecord::Fresh => false,
            DetectionRecord::Duplicate => {
                tracing::info!(
                    run_id = %ctx.run_id(),
                    pipeline_id = %self.pipeline_id,
                    "Duplicate wake word detection inside cooldown window"
                );
                true
            },
        };

        tracing::info!(
            run_id = %ctx.run_id(),
            engine = %self.engine.model_name(),
            wake_word = %detection.wake_word_id,
            timestamp_ms = detection.timestamp_ms,
            "Wake word detected"
        );

        Ok(WakeWordOutput {
            detection: Some(detection),
            skipped_by_cooldown,
        })
    }
}
