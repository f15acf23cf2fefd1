//! Per-conversation lifecycle: creation, resumption, cancellation and async
//! execution on a bounded worker pool.

use codemend_common::{
    ConversationId, ConversationMessage, CoreError, EventStatus, Result, RunMode, WorkflowEvent,
    WorkflowState, WorkflowStatus,
};
use codemend_storage::SnapshotStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runtime::AgentRuntime;
use crate::services::Services;

pub struct WorkflowSupervisor {
    services: Arc<Services>,
    runtime: Arc<AgentRuntime>,
    /// Bounded worker pool: at most `worker_count` conversations in flight
    workers: Arc<Semaphore>,
    /// Per-conversation serialization of start/resume legs
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    cancellations: Arc<DashMap<String, CancellationToken>>,
    cache: Arc<DashMap<String, WorkflowState>>,
}

impl WorkflowSupervisor {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_runtime(services, Arc::new(AgentRuntime::new()))
    }

    pub fn with_runtime(services: Arc<Services>, runtime: Arc<AgentRuntime>) -> Self {
        let worker_count = services.config.orchestrator.worker_count.max(1);
        Self {
            services,
            runtime,
            workers: Arc::new(Semaphore::new(worker_count)),
            locks: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Create a conversation, snapshot it and submit it to the pool. Returns
    /// immediately with the initial RUNNING state.
    pub async fn start(
        &self,
        requirement: &str,
        repo_url: &str,
        mode: RunMode,
        user_id: Option<String>,
    ) -> Result<WorkflowState> {
        let mut state = WorkflowState::new(requirement, repo_url, mode);
        state.user_id = user_id;
        let conversation_id = state.conversation_id.to_string();

        self.services.stores.snapshots.save_snapshot(&state).await?;
        self.services
            .stores
            .snapshots
            .append_messages(&state.conversation_id, &state.messages)
            .await?;
        self.cache.insert(conversation_id.clone(), state.clone());

        self.services.events.publish(
            &conversation_id,
            WorkflowEvent::status_only(
                &state.conversation_id,
                EventStatus::Connected,
                "Conversation created",
            ),
        );

        info!(%conversation_id, mode = %mode, "conversation started");
        self.submit(state.clone());
        Ok(state)
    }

    /// Append the user's message to an AWAITING_USER conversation and resume
    /// it at the suspended agent.
    pub async fn resume(&self, conversation_id: &ConversationId, content: &str) -> Result<WorkflowState> {
        let state = self
            .get(conversation_id)
            .await?
            .ok_or_else(|| CoreError::ConversationNotFound(conversation_id.to_string()))?;
        if state.status != WorkflowStatus::AwaitingUser {
            return Err(CoreError::InvalidTransition(format!(
                "conversation {conversation_id} is {} and cannot be resumed",
                state.status
            )));
        }

        let message = ConversationMessage::user(content);
        let state = state
            .with_message(message.clone())
            .with_status(WorkflowStatus::Running);

        self.services.stores.snapshots.save_snapshot(&state).await?;
        self.services
            .stores
            .snapshots
            .append_messages(&state.conversation_id, &[message])
            .await?;
        self.cache
            .insert(conversation_id.to_string(), state.clone());

        info!(%conversation_id, "conversation resumed");
        self.submit(state.clone());
        Ok(state)
    }

    /// In-memory cache first, then the persistent snapshot store
    pub async fn get(&self, conversation_id: &ConversationId) -> Result<Option<WorkflowState>> {
        if let Some(state) = self.cache.get(&conversation_id.to_string()) {
            return Ok(Some(state.clone()));
        }
        self.services
            .stores
            .snapshots
            .load_latest(conversation_id)
            .await
    }

    /// Sets the cancellation flag; a running conversation observes it at the
    /// next transition boundary. A suspended conversation finalizes here.
    pub async fn cancel(&self, conversation_id: &ConversationId) -> Result<()> {
        let key = conversation_id.to_string();
        self.cancellations
            .entry(key.clone())
            .or_insert_with(CancellationToken::new)
            .cancel();

        if let Some(state) = self.get(conversation_id).await? {
            if state.status == WorkflowStatus::AwaitingUser {
                let state = state.with_status(WorkflowStatus::Cancelled);
                self.services.stores.snapshots.save_snapshot(&state).await?;
                self.cache.insert(key.clone(), state.clone());
                self.services.events.publish(
                    &key,
                    WorkflowEvent::status_only(
                        conversation_id,
                        EventStatus::Complete,
                        "Conversation cancelled",
                    ),
                );
                self.services.events.finish(&key);
            } else if state.status.is_terminal() {
                warn!(%conversation_id, status = %state.status, "cancel on terminal conversation ignored");
            }
        }
        info!(%conversation_id, "cancellation requested");
        Ok(())
    }

    fn submit(&self, state: WorkflowState) {
        let conversation_id = state.conversation_id.to_string();
        let lock = self
            .locks
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let cancel = self
            .cancellations
            .entry(conversation_id.clone())
            .or_insert_with(CancellationToken::new)
            .clone();
        let workers = self.workers.clone();
        let runtime = self.runtime.clone();
        let services = self.services.clone();
        let cache = self.cache.clone();
        let cancellations = self.cancellations.clone();

        tokio::spawn(async move {
            // worker slot, then the conversation's own lock
            let Ok(_permit) = workers.acquire().await else {
                warn!(%conversation_id, "worker pool closed");
                return;
            };
            let _guard = lock.lock().await;
            let final_state = runtime
                .run_to_boundary(state, &services, &cancel, &cache)
                .await;
            if final_state.status.is_terminal() {
                cancellations.remove(&conversation_id);
            }
        });
    }
}
