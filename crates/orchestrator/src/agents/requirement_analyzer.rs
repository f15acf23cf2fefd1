use async_trait::async_trait;
use codemend_common::llm::ChatOptions;
use codemend_common::{AgentDecision, AgentName, RequirementAnalysis, WorkflowState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{chat_json_with_repair, prompts::ANALYZER_SYSTEM, Agent};
use crate::services::Services;

/// Classifies the requirement into task type, domain and a one-line summary
pub struct RequirementAnalyzer;

#[async_trait]
impl Agent for RequirementAnalyzer {
    fn name(&self) -> AgentName {
        AgentName::RequirementAnalyzer
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        _cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let requirement = state.requirement().to_string();

        let analysis = match chat_json_with_repair(
            services,
            ANALYZER_SYSTEM,
            &requirement,
            &ChatOptions::default().json(),
        )
        .await
        .and_then(|value| {
            serde_json::from_value::<RequirementAnalysis>(value).map_err(Into::into)
        }) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "requirement analysis failed");
                return (state, AgentDecision::error(format!("requirement analysis failed: {e}")));
            }
        };

        info!(task_type = %analysis.task_type, domain = %analysis.domain, "requirement analyzed");
        let message = format!(
            "Analyzed requirement: {} task in the {} domain. {}",
            analysis.task_type, analysis.domain, analysis.summary
        );
        (
            state.with_analysis(analysis),
            AgentDecision::advance(AgentName::RetrievalPlanner, message),
        )
    }
}
