//! Speech-to-text stage

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use assist_core::{
    ChunkStream, PipelineEventData, PipelineStage, SpeechMetadata, SpeechResult,
    SpeechToTextEngine, StageError,
};

use super::{StageContext, StageFailure};
use crate::audio::{AudioStream, SegmentEvent, SegmenterConfig, VoiceCommandSegmenter};

pub struct SttStage {
    engine: Arc<dyn SpeechToTextEngine>,
    engine_id: String,
    metadata: SpeechMetadata,
    timeout: Option<Duration>,
    /// Set when VAD is enabled for PCM audio
    segmenter: Option<SegmenterConfig>,
}

impl SttStage {
    pub fn new(
        engine: Arc<dyn SpeechToTextEngine>,
        engine_id: impl Into<String>,
        metadata: SpeechMetadata,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            engine_id: engine_id.into(),
            metadata,
            timeout,
            segmenter: None,
        }
    }

    pub fn with_segmenter(mut self, config: SegmenterConfig) -> Self {
        self.segmenter = Some(config);
        self
    }

    pub fn metadata(&self) -> &SpeechMetadata {
        &self.metadata
    }

    pub fn start_event(&self) -> PipelineEventData {
        PipelineEventData::SttStart {
            engine: self.engine_id.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Transcribe the remaining audio
    pub async fn run(
        &self,
        ctx: &StageContext,
        audio: &mut AudioStream,
    ) -> Result<SpeechResult, StageFailure> {
        let chunks = match self.segmenter {
            Some(config) => self.segmented(ctx, audio, config),
            None => audio.chunks(),
        };

        let transcribe = async {
            let result = self
                .engine
                .process_audio_stream(&self.metadata, chunks)
                .await
                .map_err(|e| StageError::SttStreamError(e.to_string()))?;

            if result.text.trim().is_empty() {
                return Err(StageError::SttNoTextRecognized);
            }
            Ok(result)
        };

        let result = ctx
            .bounded(PipelineStage::Stt, self.timeout, transcribe)
            .await?;

        tracing::info!(
            run_id = %ctx.run_id(),
            engine = %self.engine.model_name(),
            chars = result.text.len(),
            "Speech recognized"
        );
        Ok(result)
    }

    /// Chunks up to the end of the voice command, emitting VAD sub-events
    fn segmented<'a>(
        &self,
        ctx: &StageContext,
        audio: &'a mut AudioStream,
        config: SegmenterConfig,
    ) -> ChunkStream<'a> {
        let events = ctx.emitter().clone();
        let bytes_per_ms = self.metadata.bytes_per_ms().unwrap_or(0.0);
        let mut segmenter = VoiceCommandSegmenter::new(config);

        Box::pin(async_stream::stream! {
            let mut chunks = audio.chunks();
            while let Some(chunk) = chunks.next().await {
                let duration_ms = if bytes_per_ms > 0.0 {
                    chunk.len() as f64 / bytes_per_ms
                } else {
                    0.0
                };

                match segmenter.process(duration_ms, chunk.is_speech == Some(true)) {
                    Some(SegmentEvent::CommandStarted) => {
                        events.emit(PipelineEventData::SttVadStart {
                            timestamp_ms: chunk.timestamp_ms,
                        });
                    },
                    Some(SegmentEvent::CommandEnded) => {
                        events.emit(PipelineEventData::SttVadEnd {
                            timestamp_ms: chunk.timestamp_ms + duration_ms as u64,
                        });
                        yield chunk;
                        // Consumed enough; the engine sees end of stream
                        break;
                    },
                    None => {},
                }
                yield chunk;
            }
        })
    }
}
