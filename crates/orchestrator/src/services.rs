//! Composition root: every collaborator the agents consume, constructed once
//! and passed around explicitly.

use codemend_common::llm::{chat_model_from_config, embedder_from_config, ChatModel, Embedder};
use codemend_common::{CoreError, RepoKey, Result, SystemConfig, WorkflowState};
use codemend_indexing::{JavaParser, KnowledgeIndexer};
use codemend_retrieval::{RetrievalEngine, RetrievalPlanner};
use codemend_storage::Stores;
use codemend_workspace::{parse_remote_url, WorkingCopyManager};
use git2::Repository;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::build::{CommandCompiler, CompilerDriver};
use crate::publish::{GithubPrClient, PullRequestClient};
use crate::stream::StreamMultiplexer;

#[derive(Clone)]
pub struct Services {
    pub config: SystemConfig,
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
    pub stores: Stores,
    pub indexer: Arc<KnowledgeIndexer>,
    pub retrieval: Arc<RetrievalEngine>,
    pub workspace: Arc<WorkingCopyManager>,
    pub compiler: Arc<dyn CompilerDriver>,
    pub pr_client: Arc<dyn PullRequestClient>,
    pub events: Arc<StreamMultiplexer>,
}

impl Services {
    pub async fn initialize(config: SystemConfig) -> Result<Self> {
        config.validate()?;
        let chat = chat_model_from_config(&config.llm)?;
        let embedder = embedder_from_config(&config.embedding);
        let stores = Stores::connect(&config).await?;

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
        let compiler: Arc<dyn CompilerDriver> = Arc::new(CommandCompiler::new(
            config.orchestrator.build_command.clone(),
            Duration::from_secs(config.orchestrator.build_timeout_secs),
        ));
        let pr_client: Arc<dyn PullRequestClient> = Arc::new(GithubPrClient::new(
            config.git.pr_api_base.clone(),
            config.git.token.clone(),
        ));
        let events = Arc::new(StreamMultiplexer::new(config.server.stream_buffer_capacity));

        info!(provider = chat.name(), "services initialized");
        Ok(Self {
            config,
            chat,
            embedder,
            stores,
            indexer,
            retrieval,
            workspace,
            compiler,
            pr_client,
            events,
        })
    }

    /// Open the conversation's working copy, cloning it on first use. The
    /// directory is owned by exactly one conversation (keyed by its id).
    pub fn working_copy(&self, state: &WorkflowState) -> Result<(Repository, RepoKey, PathBuf)> {
        let conversation_id = state.conversation_id.to_string();
        let dir = self.workspace.workdir_for(&conversation_id);

        if dir.join(".git").exists() {
            let repo = self.workspace.open(&dir)?;
            let (clean_url, url_branch) = parse_remote_url(&state.repo_url)?;
            let branch = current_branch(&repo)
                .or(url_branch)
                .unwrap_or_else(|| "main".to_string());
            return Ok((repo, RepoKey::new(clean_url, branch), dir));
        }

        let (repo, clean_url, branch) = self
            .workspace
            .clone_for_conversation(&state.repo_url, &conversation_id)?;
        let branch = branch
            .or_else(|| current_branch(&repo))
            .unwrap_or_else(|| "main".to_string());
        Ok((repo, RepoKey::new(clean_url, branch), dir))
    }

    pub fn workdir(&self, state: &WorkflowState) -> Result<PathBuf> {
        let dir = self
            .workspace
            .workdir_for(&state.conversation_id.to_string());
        if !dir.exists() {
            return Err(CoreError::WorkingCopy(format!(
                "no working copy for conversation {}",
                state.conversation_id
            )));
        }
        Ok(dir)
    }
}

fn current_branch(repo: &Repository) -> Option<String> {
    repo.head()
        .ok()
        .and_then(|head| head.shorthand().map(str::to_string))
}
