use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Unique identifier for conversations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical repository identity: clean clone URL plus branch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey {
    pub url: String,
    pub branch: String,
}

impl RepoKey {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }

    /// Stable store-facing name, e.g. `github.com/acme/shop@main`
    pub fn name(&self) -> String {
        let trimmed = self
            .url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("git@")
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .replace(':', "/");
        format!("{}@{}", trimmed, self.branch)
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Repository registry record, mutated only by the indexer after a successful sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub key: RepoKey,
    pub local_path: Option<PathBuf>,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub language: String,
    pub domain_tags: Vec<String>,
}

/// Kind of a parsed code entity / vector chunk
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Class,
    Interface,
    Enum,
    Method,
    Constructor,
    Field,
    Annotation,
}

impl EntityKind {
    /// Parent kinds own DECLARES edges to their members
    pub fn is_type(&self) -> bool {
        matches!(self, Self::Class | Self::Interface | Self::Enum)
    }
}

/// Closed set of graph relationship kinds.
///
/// This enum is the ONLY value ever interpolated into graph query text;
/// everything else travels as a named parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    Extends,
    Implements,
    Declares,
    Calls,
    Injects,
    Returns,
    Accepts,
    Throws,
    Uses,
    AnnotatedBy,
    TypeDependency,
}

/// A parsed code entity with its source span and optional embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    pub id: String,
    pub repo_name: String,
    pub kind: EntityKind,
    pub name: String,
    pub fqn: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub source: String,
    pub summary: Option<String>,
    pub annotations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CodeEntity {
    /// Content-addressed stable id: sha-256 of repository id, fqn and kind
    pub fn stable_id(repo_name: &str, fqn: &str, kind: EntityKind) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repo_name.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(fqn.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(kind.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-repository sync marker, persisted inside the vector index itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub last_indexed_commit: String,
    pub last_indexed_at: DateTime<Utc>,
    pub vector_count: usize,
}

/// Payload `type` value marking the IndexState point
pub const INDEX_METADATA_TYPE: &str = "INDEX_METADATA";

impl IndexState {
    /// Deterministic point id so a fresh process can recover without any other store
    pub fn point_id(repo_name: &str) -> String {
        format!("__metadata__:{repo_name}:index_state")
    }
}

/// A single file-level change between two commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub relative_path: String,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

/// Outcome of a knowledge-index sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum SyncOutcome {
    InitialFull,
    Incremental,
    NoChanges,
    ForcedFull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub files_analyzed: usize,
    pub files_changed: usize,
    pub chunks_deleted: usize,
    pub chunks_created: usize,
    pub embed_ms: u64,
    pub total_ms: u64,
}

impl SyncReport {
    pub fn unchanged() -> Self {
        Self {
            outcome: SyncOutcome::NoChanges,
            files_analyzed: 0,
            files_changed: 0,
            chunks_deleted: 0,
            chunks_created: 0,
            embed_ms: 0,
            total_ms: 0,
        }
    }
}

/// Workflow lifecycle status; monotonic except AwaitingUser -> Running on resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    AwaitingUser,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Closed set of workflow agents
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum AgentName {
    RequirementAnalyzer,
    RetrievalPlanner,
    CodeGenerator,
    PatchApplier,
    BuildVerifier,
    FixGenerator,
    Publisher,
}

/// How the code generator treats the target repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Empty repository: generate a project skeleton
    Scaffold,
    /// Existing codebase: targeted modification
    Maintain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Message in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Output of the requirement analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementAnalysis {
    pub task_type: TaskType,
    pub domain: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    BugFix,
    Refactor,
    Scaffold,
    Test,
    Docs,
    Other,
}

/// Ordered retrieval strategies emitted by the planner model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub strategies: Vec<RetrievalStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    #[serde(rename = "type")]
    pub strategy: StrategyType,
    /// Typed per-strategy parameter bag; shape depends on `strategy`
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub target_repos: Vec<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub reasoning: String,
}

fn default_max_results() -> usize {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StrategyType {
    Semantic,
    Metadata,
    Graph,
    FullText,
    FilePath,
}

/// One retrieved code record, deduplicated by entity id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeContext {
    pub id: String,
    pub score: f32,
    pub chunk_type: EntityKind,
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub file_path: String,
    pub content: String,
}

/// Score-ordered, bounded retrieval output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub items: Vec<CodeContext>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// LLM-emitted set of file edits targeting a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub branch_name: String,
    #[serde(default)]
    pub edits: Vec<FileEdit>,
    #[serde(default)]
    pub tests_added: Vec<FileEdit>,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub op: EditOp,
    /// Absent for deletes
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    Create,
    Modify,
    Delete,
}

/// Structured outcome of a compile attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub duration_ms: u64,
    pub raw_log: String,
    pub errors: Vec<BuildError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildError {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub kind: BuildErrorKind,
}

impl BuildError {
    /// Stable signature for no-progress detection across repair attempts
    pub fn signature(&self) -> String {
        format!("{}:{}:{}:{}", self.file, self.line, self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildErrorKind {
    SymbolNotFound,
    TypeMismatch,
    MissingPackage,
    SyntaxError,
    MissingReturn,
    AccessViolation,
    Unknown,
}

/// Decision returned by every agent step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    /// None means terminal
    pub next_agent: Option<AgentName>,
    pub kind: DecisionKind,
    pub message: String,
    #[serde(default)]
    pub scratch: serde_json::Map<String, serde_json::Value>,
}

impl AgentDecision {
    pub fn advance(next: AgentName, message: impl Into<String>) -> Self {
        Self {
            next_agent: Some(next),
            kind: DecisionKind::Continue,
            message: message.into(),
            scratch: serde_json::Map::new(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            next_agent: None,
            kind: DecisionKind::Complete,
            message: message.into(),
            scratch: serde_json::Map::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            next_agent: None,
            kind: DecisionKind::Fail,
            message: message.into(),
            scratch: serde_json::Map::new(),
        }
    }

    pub fn suspend(message: impl Into<String>) -> Self {
        Self {
            next_agent: None,
            kind: DecisionKind::SuspendForInput,
            message: message.into(),
            scratch: serde_json::Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            next_agent: None,
            kind: DecisionKind::Error,
            message: message.into(),
            scratch: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Continue,
    SuspendForInput,
    Complete,
    Fail,
    Error,
}

/// Immutable per-transition snapshot of a conversation's workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub conversation_id: ConversationId,
    pub user_id: Option<String>,
    pub repo_url: String,
    pub mode: RunMode,
    pub current_agent: Option<AgentName>,
    pub status: WorkflowStatus,
    pub messages: Vec<ConversationMessage>,
    pub analysis: Option<RequirementAnalysis>,
    pub plan: Option<RetrievalPlan>,
    pub context: Option<ContextBundle>,
    pub patch: Option<Patch>,
    pub build_result: Option<BuildResult>,
    pub last_decision: Option<AgentDecision>,
    pub build_attempts: u32,
    /// Error signatures of the previous failed build, for no-progress detection
    #[serde(default)]
    pub previous_error_signatures: Vec<String>,
    #[serde(default)]
    pub scratch: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(requirement: impl Into<String>, repo_url: impl Into<String>, mode: RunMode) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: ConversationId::new(),
            user_id: None,
            repo_url: repo_url.into(),
            mode,
            current_agent: Some(AgentName::RequirementAnalyzer),
            status: WorkflowStatus::Running,
            messages: vec![ConversationMessage::user(requirement)],
            analysis: None,
            plan: None,
            context: None,
            patch: None,
            build_result: None,
            last_decision: None,
            build_attempts: 0,
            previous_error_signatures: vec![],
            scratch: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The first user message is the original requirement
    pub fn requirement(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now();
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self.touched()
    }

    pub fn with_current_agent(mut self, agent: Option<AgentName>) -> Self {
        self.current_agent = agent;
        self.touched()
    }

    pub fn with_message(mut self, message: ConversationMessage) -> Self {
        self.messages.push(message);
        self.touched()
    }

    pub fn with_analysis(mut self, analysis: RequirementAnalysis) -> Self {
        self.analysis = Some(analysis);
        self.touched()
    }

    pub fn with_plan(mut self, plan: RetrievalPlan, context: ContextBundle) -> Self {
        self.plan = Some(plan);
        self.context = Some(context);
        self.touched()
    }

    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patch = Some(patch);
        self.touched()
    }

    pub fn with_build_result(mut self, result: BuildResult) -> Self {
        self.build_result = Some(result);
        self.touched()
    }

    pub fn with_decision(mut self, decision: AgentDecision) -> Self {
        for (key, value) in decision.scratch.clone() {
            self.scratch.insert(key, value);
        }
        self.last_decision = Some(decision);
        self.touched()
    }

    pub fn with_build_attempt(mut self) -> Self {
        self.build_attempts += 1;
        self.touched()
    }

    pub fn with_error_signatures(mut self, signatures: Vec<String>) -> Self {
        self.previous_error_signatures = signatures;
        self.touched()
    }
}

/// SSE event published on every workflow milestone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub conversation_id: String,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

impl WorkflowEvent {
    pub fn status_only(
        conversation_id: &ConversationId,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status,
            agent: None,
            message: message.into(),
            tool: None,
            content: None,
            progress: None,
        }
    }

    pub fn agent_progress(
        conversation_id: &ConversationId,
        agent: AgentName,
        message: impl Into<String>,
        progress: f32,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            status: EventStatus::Running,
            agent: Some(agent.to_string()),
            message: message.into(),
            tool: None,
            content: None,
            progress: Some(progress.clamp(0.0, 1.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Connected,
    Running,
    Thinking,
    Tool,
    Partial,
    Complete,
    Error,
}
