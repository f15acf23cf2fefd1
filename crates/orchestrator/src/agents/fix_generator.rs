use async_trait::async_trait;
use codemend_common::llm::ChatOptions;
use codemend_common::{AgentDecision, AgentName, Patch, WorkflowState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::prompts::FIX_SYSTEM;
use super::{chat_json_with_repair, Agent};
use crate::services::Services;

const RAW_LOG_TAIL_CHARS: usize = 4_000;

/// Turns compiler errors into a minimal corrective patch
pub struct FixGenerator;

#[async_trait]
impl Agent for FixGenerator {
    fn name(&self) -> AgentName {
        AgentName::FixGenerator
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        _cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let Some(build_result) = state.build_result.clone() else {
            return (state, AgentDecision::error("no build result to fix"));
        };
        let branch_name = state
            .patch
            .as_ref()
            .map(|p| p.branch_name.clone())
            .unwrap_or_default();

        let errors_json = match serde_json::to_string_pretty(&build_result.errors) {
            Ok(json) => json,
            Err(e) => return (state, AgentDecision::error(format!("serialize errors: {e}"))),
        };
        let log_tail: String = build_result
            .raw_log
            .chars()
            .rev()
            .take(RAW_LOG_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let user = format!(
            "Original requirement:\n{}\n\nCurrent branch: {branch_name}\n\n\
             Structured compiler errors:\n{errors_json}\n\nBuild log tail:\n{log_tail}",
            state.requirement()
        );

        let options = ChatOptions::default().json();
        let fix = match chat_json_with_repair(services, FIX_SYSTEM, &user, &options)
            .await
            .and_then(|value| serde_json::from_value::<Patch>(value).map_err(Into::into))
        {
            Ok(fix) => fix,
            Err(e) => {
                warn!(error = %e, "fix generation failed");
                return (state, AgentDecision::error(format!("fix generation failed: {e}")));
            }
        };

        if fix.edits.is_empty() {
            return (
                state,
                AgentDecision::error("fix generator produced no edits"),
            );
        }

        // the fix stays on the original feature branch
        let mut fix = fix;
        if !branch_name.is_empty() {
            fix.branch_name = branch_name;
        }

        info!(edits = fix.edits.len(), "corrective patch generated");
        let message = format!(
            "Generated a corrective patch touching {} file(s)",
            fix.edits.len()
        );
        (
            state.with_patch(fix),
            AgentDecision::advance(AgentName::PatchApplier, message),
        )
    }
}
