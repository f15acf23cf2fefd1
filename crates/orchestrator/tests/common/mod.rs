//! Shared fakes and fixtures for orchestrator tests.

use async_trait::async_trait;
use codemend_common::llm::{ChatModel, ChatOptions, Embedder};
use codemend_common::{Result, StorageBackend, SystemConfig};
use codemend_indexing::{JavaParser, KnowledgeIndexer};
use codemend_orchestrator::build::{CompilerDriver, CompilerOutput};
use codemend_orchestrator::publish::{PullRequest, PullRequestClient};
use codemend_orchestrator::{Services, StreamMultiplexer};
use codemend_retrieval::{RetrievalEngine, RetrievalPlanner};
use codemend_storage::Stores;
use codemend_workspace::WorkingCopyManager;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const DIMENSION: usize = 2;

pub struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.to_lowercase().contains("refund") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Pops one canned reply per chat call
pub struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedChat {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, _system: &str, _user: &str, _options: &ChatOptions) -> Result<String> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "{}".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Pops one canned compiler outcome per build; defaults to success
pub struct ScriptedCompiler {
    outputs: Mutex<VecDeque<CompilerOutput>>,
}

impl ScriptedCompiler {
    pub fn new(outputs: Vec<CompilerOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().collect()),
        }
    }

    pub fn success() -> CompilerOutput {
        CompilerOutput {
            success: true,
            raw_log: "[INFO] BUILD SUCCESS".to_string(),
            duration_ms: 5,
        }
    }

    pub fn failure(log: &str) -> CompilerOutput {
        CompilerOutput {
            success: false,
            raw_log: log.to_string(),
            duration_ms: 5,
        }
    }
}

#[async_trait]
impl CompilerDriver for ScriptedCompiler {
    async fn compile(&self, _workdir: &Path) -> Result<CompilerOutput> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Self::success))
    }
}

pub struct RecordingPrClient {
    pub calls: Mutex<Vec<(String, PullRequest)>>,
}

impl RecordingPrClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl PullRequestClient for RecordingPrClient {
    async fn open_pull_request(&self, repo_url: &str, request: &PullRequest) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((repo_url.to_string(), request.clone()));
        Ok("https://github.com/acme/shop/pull/42".to_string())
    }
}

/// Ephemeral-store services wired with scripted collaborators
pub fn test_services(
    workdir_root: &Path,
    chat_responses: Vec<&str>,
    compiler_outputs: Vec<CompilerOutput>,
) -> (Arc<Services>, Arc<RecordingPrClient>) {
    let mut config = SystemConfig::default();
    config.storage.backend = StorageBackend::Ephemeral;
    config.embedding.dimension = DIMENSION;
    config.git.workdir_root = workdir_root.to_path_buf();

    let stores = Stores::ephemeral(DIMENSION);
    let chat: Arc<dyn ChatModel> = Arc::new(ScriptedChat::new(chat_responses));
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let pr_client = Arc::new(RecordingPrClient::new());

    let indexer = Arc::new(KnowledgeIndexer::new(
        stores.vectors.clone(),
        stores.graph.clone(),
        embedder.clone(),
        Arc::new(JavaParser::new()),
        config.indexing.clone(),
    ));
    let retrieval = Arc::new(RetrievalEngine::new(
        stores.vectors.clone(),
        stores.graph.clone(),
        embedder.clone(),
        RetrievalPlanner::new(chat.clone()),
        config.retrieval.clone(),
    ));
    let workspace = Arc::new(WorkingCopyManager::new(config.git.clone()));
    let events = Arc::new(StreamMultiplexer::new(config.server.stream_buffer_capacity));

    let services = Services {
        config,
        chat,
        embedder,
        stores,
        indexer,
        retrieval,
        workspace,
        compiler: Arc::new(ScriptedCompiler::new(compiler_outputs)),
        pr_client: pr_client.clone(),
        events,
    };
    (Arc::new(services), pr_client)
}

pub const ANALYZER_REPLY: &str =
    r#"{"task_type": "feature", "domain": "payments", "summary": "Add a refund endpoint"}"#;

pub const PLANNER_REPLY: &str = r#"{"strategies": [
    {"type": "semantic", "parameters": {"query": "refund payment"}, "priority": 1, "max_results": 10}
]}"#;

pub const GENERATOR_REPLY: &str = r#"{
  "branch_name": "feat/refund-endpoint",
  "edits": [
    {"path": "src/main/java/com/acme/RefundController.java", "op": "create",
     "content": "public class RefundController {}"}
  ],
  "tests_added": [
    {"path": "src/test/java/com/acme/RefundControllerTest.java", "op": "create",
     "content": "public class RefundControllerTest {}"}
  ],
  "explanation": "Adds the refund endpoint controller."
}"#;

pub const FIX_REPLY: &str = r#"{
  "branch_name": "feat/refund-endpoint",
  "edits": [
    {"path": "src/main/java/com/acme/RefundController.java", "op": "modify",
     "content": "public class RefundController { /* fixed */ }"}
  ],
  "tests_added": [],
  "explanation": "Fixes the unresolved symbol."
}"#;

pub const FAILING_BUILD_LOG: &str =
    "[ERROR] /work/src/main/java/com/acme/RefundController.java:[3,10] cannot find symbol";

pub const FAILING_BUILD_LOG_OTHER: &str =
    "[ERROR] /work/src/main/java/com/acme/RefundController.java:[9,2] incompatible types: int cannot be converted to String";
