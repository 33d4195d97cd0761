//! Scripted engines and helpers for tests and the replay tool
//!
//! The engines follow a fixed script instead of running models, so a run's
//! event trace is fully determined by its input audio and settings.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assist_config::constants::audio::PCM16_SCALE;
use assist_core::{
    ChunkStream, ConversationAgent, ConversationInput, ConversationResult, EngineError,
    ErrorCode, IntentResponse, PipelineEvent, PipelineEventType, SpeechFormats, SpeechMetadata,
    SpeechResult, SpeechToTextEngine, SynthesizedAudio, TextToSpeechEngine, TtsRequest,
    WakeWordDetection, WakeWordEngine,
};

use crate::events::PipelineEventCallback;

/// Sample rate used by the PCM helpers
pub const TEST_SAMPLE_RATE: u32 = 16_000;

/// Wake word engine that detects after a fixed number of chunks
pub struct ScriptedWakeWord {
    wake_word_id: String,
    after_chunks: usize,
    supported: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedWakeWord {
    pub fn new(wake_word_id: impl Into<String>) -> Self {
        Self {
            wake_word_id: wake_word_id.into(),
            after_chunks: 1,
            supported: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Detect once this many chunks have been read
    pub fn with_after_chunks(mut self, chunks: usize) -> Self {
        self.after_chunks = chunks.max(1);
        self
    }

    pub fn with_supported(mut self, wake_words: &[&str]) -> Self {
        self.supported = wake_words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Number of times `detect` was called
    pub fn detect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeWordEngine for ScriptedWakeWord {
    async fn detect(
        &self,
        mut audio: ChunkStream<'_>,
        wake_word_id: Option<&str>,
    ) -> Result<Option<WakeWordDetection>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut seen = 0;
        while let Some(chunk) = audio.next().await {
            seen += 1;
            if seen >= self.after_chunks {
                let duration_ms = chunk.len() as u64 * 1000 / (TEST_SAMPLE_RATE as u64 * 2);
                return Ok(Some(WakeWordDetection {
                    wake_word_id: wake_word_id.unwrap_or(&self.wake_word_id).to_string(),
                    wake_word_phrase: Some(self.wake_word_id.replace('_', " ")),
                    timestamp_ms: chunk.timestamp_ms + duration_ms,
                }));
            }
        }
        Ok(None)
    }

    fn supported_wake_words(&self) -> &[String] {
        &self.supported
    }

    fn model_name(&self) -> &str {
        "scripted-wake-word"
    }
}

/// Speech-to-text engine that reads the whole stream and returns fixed text
pub struct ScriptedStt {
    text: String,
    languages: Vec<String>,
    formats: SpeechFormats,
    delay: Option<Duration>,
    failure: Option<String>,
    received: Mutex<Vec<usize>>,
}

impl ScriptedStt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            languages: Vec::new(),
            formats: SpeechFormats::pcm16_mono(),
            delay: None,
            failure: None,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_formats(mut self, formats: SpeechFormats) -> Self {
        self.formats = formats;
        self
    }

    /// Wait this long after the stream ends
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every request with this message
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Byte length of every chunk received so far
    pub fn received_chunks(&self) -> Vec<usize> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl SpeechToTextEngine for ScriptedStt {
    async fn process_audio_stream(
        &self,
        metadata: &SpeechMetadata,
        mut audio: ChunkStream<'_>,
    ) -> Result<SpeechResult, EngineError> {
        while let Some(chunk) = audio.next().await {
            self.received.lock().push(chunk.len());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(EngineError::Stream(message.clone()));
        }
        Ok(SpeechResult {
            text: self.text.clone(),
            language: Some(metadata.language.clone()),
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }

    fn supported_formats(&self) -> &SpeechFormats {
        &self.formats
    }

    fn model_name(&self) -> &str {
        "scripted-stt"
    }
}

/// Conversation agent that repeats its input
pub struct EchoAgent {
    languages: Vec<String>,
    delay: Option<Duration>,
    conversation_id: Option<String>,
    inputs: Mutex<Vec<ConversationInput>>,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self {
            languages: Vec::new(),
            delay: None,
            conversation_id: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Conversation id returned when the input has none
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn inputs(&self) -> Vec<ConversationInput> {
        self.inputs.lock().clone()
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationAgent for EchoAgent {
    async fn process(&self, input: &ConversationInput) -> Result<ConversationResult, EngineError> {
        self.inputs.lock().push(input.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ConversationResult {
            response: IntentResponse::speech(input.text.clone()),
            conversation_id: input
                .conversation_id
                .clone()
                .or_else(|| self.conversation_id.clone()),
            continue_conversation: false,
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }

    fn agent_name(&self) -> &str {
        "echo"
    }
}

/// Text-to-speech engine returning sequential tokens
pub struct ScriptedTts {
    languages: Vec<String>,
    formats: Vec<String>,
    delay: Option<Duration>,
    counter: AtomicUsize,
    requests: Mutex<Vec<TtsRequest>>,
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self {
            languages: Vec::new(),
            formats: vec!["wav".to_string(), "mp3".to_string()],
            delay: None,
            counter: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<TtsRequest> {
        self.requests.lock().clone()
    }
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeechEngine for ScriptedTts {
    async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio, EngineError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mime_type = match request.output_format.to_ascii_lowercase().as_str() {
            "mp3" => "audio/mpeg",
            _ => "audio/wav",
        };
        Ok(SynthesizedAudio {
            token: format!("tts-{}.{}", n, request.output_format),
            mime_type: mime_type.to_string(),
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }

    fn supported_output_formats(&self) -> &[String] {
        &self.formats
    }

    fn model_name(&self) -> &str {
        "scripted-tts"
    }
}

/// Collects every event of a run for assertions
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> PipelineEventCallback {
        let events = self.events.clone();
        Arc::new(move |event| events.lock().push(event))
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<PipelineEventType> {
        self.events.lock().iter().map(PipelineEvent::event_type).collect()
    }

    pub fn error_codes(&self) -> Vec<ErrorCode> {
        self.events.lock().iter().filter_map(PipelineEvent::error_code).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// 16kHz mono PCM16 sine tone
pub fn pcm_tone(duration_ms: u32, amplitude: f32) -> Vec<u8> {
    let samples = (TEST_SAMPLE_RATE * duration_ms / 1000) as usize;
    let amplitude = amplitude.clamp(0.0, 1.0) * PCM16_SCALE;
    (0..samples)
        .flat_map(|i| {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            let sample = (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
            sample.to_le_bytes()
        })
        .collect()
}

/// 16kHz mono PCM16 silence
pub fn pcm_silence(duration_ms: u32) -> Vec<u8> {
    vec![0; (TEST_SAMPLE_RATE * duration_ms / 1000) as usize * 2]
}

/// Stream the chunks, then end
pub fn chunk_stream(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Vec<u8>> + Send + 'static {
    futures::stream::iter(chunks)
}

/// Stream the chunks, then stay open without producing more audio
pub fn open_chunk_stream(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Vec<u8>> + Send + 'static {
    futures::stream::iter(chunks).chain(futures::stream::pending())
}
