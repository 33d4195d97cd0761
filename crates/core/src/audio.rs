//! Audio metadata, chunks and per-run audio options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ValidationError;
use crate::stage::PipelineStage;

/// Container format of the incoming stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Ogg,
}

/// Codec of the incoming stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Signed little-endian PCM
    #[default]
    Pcm,
    /// Opus (WebRTC / browser clients)
    Opus,
}

/// Bits per sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BitDepth {
    #[serde(rename = "8")]
    Bits8,
    #[default]
    #[serde(rename = "16")]
    Bits16,
    #[serde(rename = "24")]
    Bits24,
    #[serde(rename = "32")]
    Bits32,
}

impl BitDepth {
    pub fn bits(&self) -> u16 {
        match self {
            BitDepth::Bits8 => 8,
            BitDepth::Bits16 => 16,
            BitDepth::Bits24 => 24,
            BitDepth::Bits32 => 32,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }
}

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    #[serde(rename = "8000")]
    Hz8000,
    #[serde(rename = "11000")]
    Hz11000,
    /// 16kHz - Standard speech recognition
    #[default]
    #[serde(rename = "16000")]
    Hz16000,
    #[serde(rename = "18900")]
    Hz18900,
    /// 22kHz - TTS output
    #[serde(rename = "22000")]
    Hz22000,
    #[serde(rename = "32000")]
    Hz32000,
    #[serde(rename = "37800")]
    Hz37800,
    /// 44.1kHz - CD quality
    #[serde(rename = "44100")]
    Hz44100,
    /// 48kHz - Professional audio
    #[serde(rename = "48000")]
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz11000 => 11000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz18900 => 18900,
            SampleRate::Hz22000 => 22000,
            SampleRate::Hz32000 => 32000,
            SampleRate::Hz37800 => 37800,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Get samples per millisecond
    pub fn samples_per_ms(&self) -> f64 {
        self.as_u32() as f64 / 1000.0
    }
}

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    #[serde(rename = "1")]
    Mono,
    #[serde(rename = "2")]
    Stereo,
}

impl Channels {
    pub fn count(&self) -> u16 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Description of the audio handed to the speech-to-text stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechMetadata {
    pub language: String,
    pub format: AudioFormat,
    pub codec: AudioCodec,
    pub bit_rate: BitDepth,
    pub sample_rate: SampleRate,
    pub channel: Channels,
}

impl SpeechMetadata {
    /// 16kHz mono 16-bit PCM in a WAV container, the common satellite format
    pub fn pcm16_mono(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            format: AudioFormat::Wav,
            codec: AudioCodec::Pcm,
            bit_rate: BitDepth::Bits16,
            sample_rate: SampleRate::Hz16000,
            channel: Channels::Mono,
        }
    }

    pub fn is_pcm16(&self) -> bool {
        self.codec == AudioCodec::Pcm && self.bit_rate == BitDepth::Bits16
    }

    /// Bytes of audio per millisecond; `None` for compressed codecs
    pub fn bytes_per_ms(&self) -> Option<f64> {
        match self.codec {
            AudioCodec::Pcm => Some(
                self.sample_rate.samples_per_ms()
                    * self.bit_rate.bytes() as f64
                    * self.channel.count() as f64,
            ),
            AudioCodec::Opus => None,
        }
    }

    /// Reject internally inconsistent metadata
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.language.trim().is_empty() {
            return Err(ValidationError::MalformedMetadata(
                "language must not be empty".to_string(),
            ));
        }
        if self.codec == AudioCodec::Opus && self.format != AudioFormat::Ogg {
            return Err(ValidationError::MalformedMetadata(
                "opus audio must be carried in an ogg container".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SpeechMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?} {}Hz {}bit {}ch ({})",
            self.format,
            self.codec,
            self.sample_rate.as_u32(),
            self.bit_rate.bits(),
            self.channel.count(),
            self.language
        )
    }
}

/// One chunk of the audio stream after enhancement
#[derive(Clone)]
pub struct AudioChunk {
    /// Raw bytes in the stream's codec
    pub audio: Arc<[u8]>,
    /// Chunk sequence number for ordering
    pub sequence: u64,
    /// Offset of the chunk start from the beginning of the stream
    pub timestamp_ms: u64,
    /// VAD verdict when gating is enabled
    pub is_speech: Option<bool>,
}

impl fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChunk")
            .field("audio_len", &self.audio.len())
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("is_speech", &self.is_speech)
            .finish()
    }
}

impl AudioChunk {
    pub fn new(audio: Vec<u8>, sequence: u64, timestamp_ms: u64) -> Self {
        Self {
            audio: audio.into(),
            sequence,
            timestamp_ms,
            is_speech: None,
        }
    }

    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }
}

/// Decode little-endian PCM16 bytes; a trailing odd byte is ignored
pub fn pcm16_samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
}

/// RMS energy of PCM16 audio in dBFS
pub fn pcm16_energy_db(bytes: &[u8]) -> f32 {
    const PCM16_NORMALIZE: f32 = 32768.0;

    let mut count = 0usize;
    let mut sum_squares = 0.0f32;
    for sample in pcm16_samples(bytes) {
        let s = sample as f32 / PCM16_NORMALIZE;
        sum_squares += s * s;
        count += 1;
    }

    if count == 0 {
        return -96.0; // Minimum dB (silence)
    }

    let rms = (sum_squares / count as f32).sqrt();
    if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        -96.0
    }
}

/// What to do with chunks the VAD classifies as non-speech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatePolicy {
    /// Drop the chunk from the primary stream
    Drop,
    /// Replace the chunk with zeroed audio of equal length
    #[default]
    Silence,
}

/// Audio pre-processing options for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Noise suppression level, 0 (off) to 4 (max)
    pub noise_suppression_level: u8,
    /// Auto gain target in dBFS below full scale, 0 (off) to 31
    pub auto_gain_dbfs: u8,
    /// Fixed volume multiplier applied before everything else
    pub volume_multiplier: f32,
    /// Gate non-speech chunks with voice activity detection
    pub is_vad_enabled: bool,
    pub gate_policy: GatePolicy,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            noise_suppression_level: 0,
            auto_gain_dbfs: 0,
            volume_multiplier: 1.0,
            is_vad_enabled: true,
            gate_policy: GatePolicy::Silence,
        }
    }
}

impl AudioSettings {
    /// Whether any sample-level transform is configured
    pub fn needs_processing(&self) -> bool {
        self.noise_suppression_level > 0
            || self.auto_gain_dbfs > 0
            || (self.volume_multiplier - 1.0).abs() > f32::EPSILON
    }
}

/// Wake word options for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WakeWordSettings {
    /// Seconds to wait for a detection, `None` uses the configured default
    pub timeout: Option<f64>,
}

impl WakeWordSettings {
    pub fn with_timeout(timeout_secs: f64) -> Self {
        Self {
            timeout: Some(timeout_secs),
        }
    }

    /// Timeout as a duration.
    ///
    /// Non-positive values fall back to the configured default; NaN, infinite
    /// or unrepresentable values are rejected.
    pub fn timeout_duration(&self) -> Result<Option<Duration>, ValidationError> {
        let Some(secs) = self.timeout else {
            return Ok(None);
        };
        if secs <= 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| ValidationError::InvalidSetting {
                stage: PipelineStage::WakeWord,
                field: "timeout".to_string(),
                detail: format!("{} seconds: {}", secs, e),
            })
    }
}
