//! Request and response shapes for the conversation API.

use chrono::{DateTime, Utc};
use codemend_common::{
    AgentName, ConversationMessage, RunMode, WorkflowState, WorkflowStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub requirement: String,
    pub repo_url: String,
    /// "scaffold" or "maintain"; defaults to maintain
    #[serde(default)]
    pub mode: Option<RunMode>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub conversation_id: String,
    pub status: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Redacted view of a workflow state for API consumers
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub conversation_id: String,
    pub status: WorkflowStatus,
    pub mode: RunMode,
    pub repo_url: String,
    pub current_agent: Option<AgentName>,
    pub build_attempts: u32,
    pub messages: Vec<ConversationMessage>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowState> for ConversationView {
    fn from(state: WorkflowState) -> Self {
        let pr_url = state
            .scratch
            .get("pr_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Self {
            conversation_id: state.conversation_id.to_string(),
            status: state.status,
            mode: state.mode,
            repo_url: state.repo_url,
            current_agent: state.current_agent,
            build_attempts: state.build_attempts,
            messages: state.messages,
            pr_url,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
