//! Traits for pluggable engines
//!
//! - `speech`: wake word, speech-to-text and text-to-speech engines
//! - `conversation`: the intent stage's conversation agent
//! - `capability`: engine lookup by stage, language and format

pub mod capability;
pub mod conversation;
pub mod speech;

pub use capability::{language_supported, CapabilityProvider, FormatRequirement};
pub use conversation::ConversationAgent;
pub use speech::{
    ChunkStream, SpeechFormats, SpeechResult, SpeechToTextEngine, SynthesizedAudio,
    TextToSpeechEngine, TtsRequest, WakeWordDetection, WakeWordEngine,
};
