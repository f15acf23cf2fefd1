use async_trait::async_trait;
use codemend_common::{
    AgentDecision, AgentName, ContextBundle, EventStatus, RetrievalPlan, RunMode, WorkflowEvent,
    WorkflowState,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Agent;
use crate::services::Services;

/// Syncs the knowledge index for the conversation's repository, then plans
/// and executes retrieval. Scaffold mode has nothing to retrieve from.
pub struct RetrievalPlanner;

#[async_trait]
impl Agent for RetrievalPlanner {
    fn name(&self) -> AgentName {
        AgentName::RetrievalPlanner
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        if state.mode == RunMode::Scaffold {
            let state = state.with_plan(RetrievalPlan::default(), ContextBundle::default());
            return (
                state,
                AgentDecision::advance(
                    AgentName::CodeGenerator,
                    "Scaffold mode: generating a fresh project, no retrieval needed",
                ),
            );
        }

        let (repo, key, _dir) = match services.working_copy(&state) {
            Ok(parts) => parts,
            Err(e) => {
                return (state, AgentDecision::error(format!("working copy: {e}")));
            }
        };

        services.events.publish(
            &state.conversation_id.to_string(),
            WorkflowEvent {
                conversation_id: state.conversation_id.to_string(),
                status: EventStatus::Tool,
                agent: Some(self.name().to_string()),
                message: format!("Indexing {}", key.name()),
                tool: Some("indexer".to_string()),
                content: None,
                progress: None,
            },
        );

        if let Err(e) = services.indexer.sync(&services.workspace, &repo, &key).await {
            // retrieval can still work against the last indexed state
            warn!(error = %e, repo = %key.name(), "index sync failed, retrieving from last state");
        }

        let question = state.requirement().to_string();
        match services
            .retrieval
            .retrieve(&question, state.analysis.as_ref(), &key.name(), cancel)
            .await
        {
            Ok((plan, bundle)) => {
                info!(
                    strategies = plan.strategies.len(),
                    items = bundle.len(),
                    "context assembled"
                );
                let message = format!(
                    "Assembled {} context item(s) from {} retrieval strategies",
                    bundle.len(),
                    plan.strategies.len()
                );
                (
                    state.with_plan(plan, bundle),
                    AgentDecision::advance(AgentName::CodeGenerator, message),
                )
            }
            Err(e) => (state, AgentDecision::error(format!("retrieval failed: {e}"))),
        }
    }
}
