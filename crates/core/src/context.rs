//! Caller identity attached to every run

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who started a run and the trace id its events and logs carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub trace_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RunContext {
    /// Fresh context with a random trace id
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
