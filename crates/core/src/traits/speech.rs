//! Speech engine traits
//!
//! The pipeline never recognises or synthesises speech itself; it drives
//! engines implementing these traits.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use super::capability::language_supported;
use crate::audio::{AudioChunk, AudioCodec, AudioFormat, BitDepth, Channels, SampleRate, SpeechMetadata};
use crate::error::EngineError;

/// Borrowed, single-pass stream of audio chunks handed to an engine
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = AudioChunk> + Send + 'a>>;

/// A wake word detection reported by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeWordDetection {
    pub wake_word_id: String,
    /// Phrase that was heard, if the engine knows it
    #[serde(default)]
    pub wake_word_phrase: Option<String>,
    /// Offset into the audio stream where the wake word ended
    pub timestamp_ms: u64,
}

/// Wake word detection interface
#[async_trait]
pub trait WakeWordEngine: Send + Sync + 'static {
    /// Consume audio until a wake word is heard.
    ///
    /// Returns `Ok(None)` when the stream ends without a detection. The engine
    /// must stop reading as soon as it detects, so the remaining audio is left
    /// for the speech-to-text stage.
    async fn detect(
        &self,
        audio: ChunkStream<'_>,
        wake_word_id: Option<&str>,
    ) -> Result<Option<WakeWordDetection>, EngineError>;

    /// Wake word ids the engine can listen for; empty means any
    fn supported_wake_words(&self) -> &[String];

    /// Get model name for logging
    fn model_name(&self) -> &str;

    fn supports_wake_word(&self, wake_word_id: &str) -> bool {
        let supported = self.supported_wake_words();
        supported.is_empty() || supported.iter().any(|w| w == wake_word_id)
    }
}

/// Result of a speech-to-text pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechResult {
    pub text: String,
    /// Language the engine detected, if it reports one
    #[serde(default)]
    pub language: Option<String>,
}

/// Audio formats a speech-to-text engine accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechFormats {
    pub formats: Vec<AudioFormat>,
    pub codecs: Vec<AudioCodec>,
    pub bit_rates: Vec<BitDepth>,
    pub sample_rates: Vec<SampleRate>,
    pub channels: Vec<Channels>,
}

impl SpeechFormats {
    /// 16kHz mono PCM16 WAV only
    pub fn pcm16_mono() -> Self {
        Self {
            formats: vec![AudioFormat::Wav],
            codecs: vec![AudioCodec::Pcm],
            bit_rates: vec![BitDepth::Bits16],
            sample_rates: vec![SampleRate::Hz16000],
            channels: vec![Channels::Mono],
        }
    }

    /// Describe the first unsupported property of `metadata`
    pub fn check(&self, metadata: &SpeechMetadata) -> Result<(), String> {
        if !self.formats.contains(&metadata.format) {
            return Err(format!("audio format {:?}", metadata.format));
        }
        if !self.codecs.contains(&metadata.codec) {
            return Err(format!("audio codec {:?}", metadata.codec));
        }
        if !self.bit_rates.contains(&metadata.bit_rate) {
            return Err(format!("bit depth {}", metadata.bit_rate.bits()));
        }
        if !self.sample_rates.contains(&metadata.sample_rate) {
            return Err(format!("sample rate {}", metadata.sample_rate.as_u32()));
        }
        if !self.channels.contains(&metadata.channel) {
            return Err(format!("channel count {}", metadata.channel.count()));
        }
        Ok(())
    }
}

/// Speech-to-Text interface
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn SpeechToTextEngine> = Arc::new(WhisperEngine::new(config));
/// let result = stt.process_audio_stream(&metadata, Box::pin(chunks)).await?;
/// println!("Transcribed: {}", result.text);
/// ```
#[async_trait]
pub trait SpeechToTextEngine: Send + Sync + 'static {
    /// Transcribe the stream until it ends
    async fn process_audio_stream(
        &self,
        metadata: &SpeechMetadata,
        audio: ChunkStream<'_>,
    ) -> Result<SpeechResult, EngineError>;

    /// Get supported languages; empty means any
    fn supported_languages(&self) -> &[String];

    fn supported_formats(&self) -> &SpeechFormats;

    /// Get model name for logging
    fn model_name(&self) -> &str;

    /// Check if a specific language is supported
    fn supports_language(&self, language: &str) -> bool {
        language_supported(self.supported_languages(), language)
    }
}

/// Request handed to a text-to-speech engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsRequest {
    pub message: String,
    pub language: String,
    #[serde(default)]
    pub voice: Option<String>,
    /// Output container, e.g. "wav" or "mp3"
    pub output_format: String,
}

/// Handle to synthesised audio held by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAudio {
    /// Opaque token the audio can be fetched with
    pub token: String,
    pub mime_type: String,
}

/// Text-to-Speech interface
#[async_trait]
pub trait TextToSpeechEngine: Send + Sync + 'static {
    /// Synthesize text and return a retrievable handle
    async fn synthesize(&self, request: &TtsRequest) -> Result<SynthesizedAudio, EngineError>;

    /// Get supported languages; empty means any
    fn supported_languages(&self) -> &[String];

    /// Output formats the engine can produce
    fn supported_output_formats(&self) -> &[String];

    /// Format used when the caller does not request one
    fn default_output_format(&self) -> &str {
        self.supported_output_formats()
            .first()
            .map(String::as_str)
            .unwrap_or("wav")
    }

    /// Get model name for logging
    fn model_name(&self) -> &str;

    fn supports_language(&self, language: &str) -> bool {
        language_supported(self.supported_languages(), language)
    }

    fn supports_output_format(&self, format: &str) -> bool {
        self.supported_output_formats()
            .iter()
            .any(|f| f.eq_ignore_ascii_case(format))
    }
}
