//! Conversation (intent stage) request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input handed to a conversation agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInput {
    pub text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    pub language: String,
    /// Caller identity and trace id of the run
    pub context: crate::RunContext,
}

/// Kind of answer the agent produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    ActionDone,
    QueryAnswer,
    Error,
}

/// Spoken response plus structured data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IntentResponse {
    /// Utterance handed to the TTS stage
    pub speech: String,
    pub response_type: ResponseType,
    #[serde(default)]
    pub data: Value,
}

impl IntentResponse {
    pub fn speech(text: impl Into<String>) -> Self {
        Self {
            speech: text.into(),
            ..Default::default()
        }
    }
}

/// What a conversation agent returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationResult {
    pub response: IntentResponse,
    /// Conversation id to continue with; agents may mint a new one
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub continue_conversation: bool,
}
