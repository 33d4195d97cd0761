//! Stage capability queries

use crate::audio::SpeechMetadata;
use crate::stage::PipelineStage;

/// Format a stage must handle, checked alongside the language
#[derive(Debug, Clone, PartialEq)]
pub enum FormatRequirement {
    /// Incoming audio for wake word / STT engines
    Speech(SpeechMetadata),
    /// Output container requested from a TTS engine
    TtsOutput(String),
}

/// Answers whether an engine can serve a stage for a language and format
pub trait CapabilityProvider: Send + Sync {
    /// Whether an engine with this id is known for the stage
    fn contains(&self, stage: PipelineStage, engine_id: &str) -> bool;

    fn supports(
        &self,
        stage: PipelineStage,
        engine_id: &str,
        language: &str,
        format: Option<&FormatRequirement>,
    ) -> bool;
}

/// Language match used by every engine kind.
///
/// An empty list or `"*"` accepts anything. Otherwise the requested tag must
/// match exactly or share its primary subtag ("en-US" matches "en").
pub fn language_supported(supported: &[String], requested: &str) -> bool {
    if supported.is_empty() || supported.iter().any(|l| l == "*") {
        return true;
    }

    let primary = |tag: &str| {
        tag.split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    let requested_primary = primary(requested);

    supported.iter().any(|lang| {
        lang.eq_ignore_ascii_case(requested) || primary(lang) == requested_primary
    })
}
