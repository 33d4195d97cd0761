//! Conversation agent trait

use async_trait::async_trait;

use super::capability::language_supported;
use crate::conversation::{ConversationInput, ConversationResult};
use crate::error::EngineError;

/// Resolves a transcript to a response (intent stage backend)
#[async_trait]
pub trait ConversationAgent: Send + Sync + 'static {
    async fn process(&self, input: &ConversationInput) -> Result<ConversationResult, EngineError>;

    /// Languages the agent understands; empty or `"*"` means any
    fn supported_languages(&self) -> &[String];

    /// Get agent name for logging
    fn agent_name(&self) -> &str;

    fn supports_language(&self, language: &str) -> bool {
        language_supported(self.supported_languages(), language)
    }
}
