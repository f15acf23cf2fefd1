//! The agent state machine: drives a conversation from agent to agent,
//! snapshotting before every invocation and after every decision, and
//! publishing an event only after the snapshot is durable.

use codemend_common::{
    AgentName, ConversationMessage, DecisionKind, EventStatus, Result, WorkflowEvent,
    WorkflowState, WorkflowStatus,
};
use codemend_storage::SnapshotStore;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agents::{default_agents, Agent};
use crate::services::Services;

pub struct AgentRuntime {
    agents: HashMap<AgentName, Arc<dyn Agent>>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self {
            agents: default_agents(),
        }
    }

    /// Replace agents, for tests that script individual steps
    pub fn with_agents(agents: HashMap<AgentName, Arc<dyn Agent>>) -> Self {
        Self { agents }
    }
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRuntime {
    /// Run until a terminal decision, a suspension, or cancellation. Returns
    /// the final state of this leg.
    pub async fn run_to_boundary(
        &self,
        mut state: WorkflowState,
        services: &Services,
        cancel: &CancellationToken,
        cache: &DashMap<String, WorkflowState>,
    ) -> WorkflowState {
        let conversation_id = state.conversation_id.to_string();

        loop {
            // cancellation is observed at the transition boundary
            if cancel.is_cancelled() {
                state = state.with_status(WorkflowStatus::Cancelled);
                let _ = self.persist(services, cache, &state, &[]).await;
                services.events.publish(
                    &conversation_id,
                    WorkflowEvent::status_only(
                        &state.conversation_id,
                        EventStatus::Complete,
                        "Conversation cancelled",
                    ),
                );
                services.events.finish(&conversation_id);
                info!(%conversation_id, "conversation cancelled");
                break;
            }

            let Some(agent_name) = state.current_agent else {
                break;
            };
            let Some(agent) = self.agents.get(&agent_name).cloned() else {
                state = state.with_status(WorkflowStatus::Failed);
                let _ = self.persist(services, cache, &state, &[]).await;
                self.publish_terminal(
                    services,
                    &state,
                    EventStatus::Error,
                    &format!("Unknown agent: {agent_name}"),
                    None,
                );
                break;
            };

            // snapshot BEFORE the invocation
            if let Err(e) = self.persist(services, cache, &state, &[]).await {
                error!(%conversation_id, error = %e, "snapshot failed, aborting");
                state = state.with_status(WorkflowStatus::Failed);
                break;
            }
            services.events.publish(
                &conversation_id,
                WorkflowEvent {
                    conversation_id: conversation_id.clone(),
                    status: EventStatus::Thinking,
                    agent: Some(agent_name.to_string()),
                    message: format!("{agent_name} running"),
                    tool: None,
                    content: None,
                    progress: None,
                },
            );

            let messages_before = state.messages.len();
            let (next_state, decision) = agent.run(state, services, cancel).await;
            let decision_message = decision.message.clone();
            let kind = decision.kind;
            let next_agent = decision.next_agent;
            let pr_content = decision
                .scratch
                .get("pr_url")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            state = next_state
                .with_message(ConversationMessage::assistant(decision_message.clone()))
                .with_decision(decision);
            let new_messages = state.messages[messages_before..].to_vec();

            match kind {
                DecisionKind::Continue => {
                    let Some(next_agent) = next_agent else {
                        state = state.with_status(WorkflowStatus::Failed);
                        let _ = self.persist(services, cache, &state, &new_messages).await;
                        self.publish_terminal(
                            services,
                            &state,
                            EventStatus::Error,
                            "Continue decision without a next agent",
                            None,
                        );
                        break;
                    };
                    state = state.with_current_agent(Some(next_agent));
                    if let Err(e) = self.persist(services, cache, &state, &new_messages).await {
                        error!(%conversation_id, error = %e, "snapshot failed, aborting");
                        state = state.with_status(WorkflowStatus::Failed);
                        break;
                    }
                    services.events.publish(
                        &conversation_id,
                        WorkflowEvent {
                            conversation_id: conversation_id.clone(),
                            status: EventStatus::Running,
                            agent: Some(agent_name.to_string()),
                            message: decision_message,
                            tool: None,
                            content: None,
                            progress: None,
                        },
                    );
                }
                DecisionKind::SuspendForInput => {
                    // the same agent re-enters on resume
                    state = state.with_status(WorkflowStatus::AwaitingUser);
                    let _ = self.persist(services, cache, &state, &new_messages).await;
                    services.events.publish(
                        &conversation_id,
                        WorkflowEvent {
                            conversation_id: conversation_id.clone(),
                            status: EventStatus::Partial,
                            agent: Some(agent_name.to_string()),
                            message: decision_message,
                            tool: None,
                            content: None,
                            progress: None,
                        },
                    );
                    info!(%conversation_id, "workflow awaiting user input");
                    break;
                }
                DecisionKind::Complete => {
                    state = state
                        .with_status(WorkflowStatus::Completed)
                        .with_current_agent(None);
                    let _ = self.persist(services, cache, &state, &new_messages).await;
                    self.publish_terminal(
                        services,
                        &state,
                        EventStatus::Complete,
                        &decision_message,
                        pr_content,
                    );
                    info!(%conversation_id, "workflow completed");
                    break;
                }
                DecisionKind::Fail | DecisionKind::Error => {
                    state = state
                        .with_status(WorkflowStatus::Failed)
                        .with_current_agent(None);
                    let _ = self.persist(services, cache, &state, &new_messages).await;
                    self.publish_terminal(
                        services,
                        &state,
                        EventStatus::Error,
                        &decision_message,
                        None,
                    );
                    info!(%conversation_id, reason = %decision_message, "workflow failed");
                    break;
                }
            }
        }

        state
    }

    /// Snapshot first, mirror the new messages, then refresh the read cache.
    /// Publishing always happens after this returns, so readers that observe
    /// an event can rely on the snapshot being durable.
    async fn persist(
        &self,
        services: &Services,
        cache: &DashMap<String, WorkflowState>,
        state: &WorkflowState,
        new_messages: &[ConversationMessage],
    ) -> Result<()> {
        services.stores.snapshots.save_snapshot(state).await?;
        if !new_messages.is_empty() {
            services
                .stores
                .snapshots
                .append_messages(&state.conversation_id, new_messages)
                .await?;
        }
        cache.insert(state.conversation_id.to_string(), state.clone());
        Ok(())
    }

    fn publish_terminal(
        &self,
        services: &Services,
        state: &WorkflowState,
        status: EventStatus,
        message: &str,
        content: Option<String>,
    ) {
        let conversation_id = state.conversation_id.to_string();
        services.events.publish(
            &conversation_id,
            WorkflowEvent {
                conversation_id: conversation_id.clone(),
                status,
                agent: state.current_agent.map(|a| a.to_string()),
                message: message.to_string(),
                tool: None,
                content,
                progress: None,
            },
        );
        services.events.finish(&conversation_id);
    }
}
