//! Intent (conversation) stage

use std::sync::Arc;
use std::time::Duration;

use assist_core::{
    ConversationAgent, ConversationInput, ConversationResult, PipelineEventData, PipelineStage,
    RunContext, StageError,
};

use super::{StageContext, StageFailure};

pub struct IntentStage {
    agent: Arc<dyn ConversationAgent>,
    engine_id: String,
    language: String,
    timeout: Option<Duration>,
}

/// What the intent stage is asked to process
#[derive(Debug, Clone)]
pub struct IntentRequest<'a> {
    pub text: &'a str,
    pub conversation_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub context: &'a RunContext,
}

impl IntentStage {
    pub fn new(
        agent: Arc<dyn ConversationAgent>,
        engine_id: impl Into<String>,
        language: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            agent,
            engine_id: engine_id.into(),
            language: language.into(),
            timeout,
        }
    }

    pub fn start_event(&self, request: &IntentRequest<'_>) -> PipelineEventData {
        PipelineEventData::IntentStart {
            engine: self.engine_id.clone(),
            language: self.language.clone(),
            intent_input: request.text.to_string(),
            conversation_id: request.conversation_id.map(str::to_string),
            device_id: request.device_id.map(str::to_string),
        }
    }

    pub async fn run(
        &self,
        ctx: &StageContext,
        request: IntentRequest<'_>,
    ) -> Result<ConversationResult, StageFailure> {
        let input = ConversationInput {
            text: request.text.to_string(),
            conversation_id: request.conversation_id.map(str::to_string),
            device_id: request.device_id.map(str::to_string),
            language: self.language.clone(),
            context: request.context.clone(),
        };

        let process = async {
            self.agent
                .process(&input)
                .await
                .map_err(|e| StageError::IntentRecognitionError(e.to_string()))
        };

        let result = ctx
            .bounded(PipelineStage::Intent, self.timeout, process)
            .await?;

        tracing::info!(
            run_id = %ctx.run_id(),
            agent = %self.agent.agent_name(),
            response_type = ?result.response.response_type,
            "Intent processed"
        );
        Ok(result)
    }
}
