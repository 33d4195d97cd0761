//! Core traits and types for the assist pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Pipeline definitions and the ordered stage enumeration
//! - Audio metadata, chunks and per-run audio options
//! - Typed pipeline events
//! - Error taxonomy
//! - Traits for pluggable engines (wake word, STT, conversation, TTS)

pub mod audio;
pub mod context;
pub mod conversation;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod stage;
pub mod traits;

pub use audio::{
    pcm16_energy_db, pcm16_samples, AudioChunk, AudioCodec, AudioFormat, AudioSettings, BitDepth,
    Channels, GatePolicy, SampleRate, SpeechMetadata, WakeWordSettings,
};
pub use context::RunContext;
pub use conversation::{ConversationInput, ConversationResult, IntentResponse, ResponseType};
pub use error::{EngineError, ErrorCode, PipelineError, Result, StageError, ValidationError};
pub use event::{
    PipelineEvent, PipelineEventData, PipelineEventType, RunOutputs, RunStartData, TtsOutput,
    WakeWordOutput,
};
pub use pipeline::Pipeline;
pub use stage::{PipelineStage, RunState, StageWindow};

// Trait re-exports
pub use traits::{
    language_supported,
    CapabilityProvider,
    ChunkStream,
    // Conversation
    ConversationAgent,
    FormatRequirement,
    SpeechFormats,
    SpeechResult,
    // Speech
    SpeechToTextEngine,
    SynthesizedAudio,
    TextToSpeechEngine,
    TtsRequest,
    WakeWordDetection,
    WakeWordEngine,
};
