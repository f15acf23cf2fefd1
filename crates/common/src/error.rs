use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Graph store error: {0}")]
    GraphStore(String),

    #[error("Snapshot store error: {0}")]
    Snapshot(String),

    #[error("Working copy error: {0}")]
    WorkingCopy(String),

    #[error("Parse error in {file}: {message}")]
    SourceParse { file: String, message: String },

    #[error("Invalid model output: {0}")]
    ModelOutput(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Build attempt budget exhausted after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream server error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Store consistency: {0}")]
    StoreConsistency(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse fault classification driving retry and propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with exponential backoff up to the attempt budget.
    Transient,
    /// Malformed input (usually model output); one corrective re-prompt, else surface.
    Input,
    /// Missing endpoint / never-seen state; log, treat as absence, proceed.
    StoreConsistency,
    /// Compile failures inside the attempt budget; feed the fix loop.
    UserRecoverable,
    /// Stop the workflow and surface.
    Fatal,
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) => ErrorClass::Transient,
            Self::Upstream { status, .. } if *status >= 500 => ErrorClass::Transient,
            Self::ModelOutput(_) | Self::InvalidPatch(_) | Self::UnknownAgent(_) => {
                ErrorClass::Input
            }
            Self::StoreConsistency(_) => ErrorClass::StoreConsistency,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Server-side faults only (5xx); rate limits and timeouts are excluded.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Upstream { status, .. } if *status >= 500)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
