use async_trait::async_trait;
use codemend_common::llm::ChatOptions;
use codemend_common::{AgentDecision, AgentName, Patch, RunMode, WorkflowState};
use codemend_retrieval::render_bundle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::prompts::{GENERATOR_MAINTAIN_SYSTEM, GENERATOR_SCAFFOLD_SYSTEM};
use super::{branch_slug, chat_json_with_repair, Agent};
use crate::services::Services;

const CONTEXT_TOKEN_BUDGET: usize = 12_000;

/// Asks the model for a JSON-validated patch, in scaffold or maintain mode
pub struct CodeGenerator;

#[async_trait]
impl Agent for CodeGenerator {
    fn name(&self) -> AgentName {
        AgentName::CodeGenerator
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        _cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let system = match state.mode {
            RunMode::Scaffold => GENERATOR_SCAFFOLD_SYSTEM,
            RunMode::Maintain => GENERATOR_MAINTAIN_SYSTEM,
        };

        let mut user = String::new();
        user.push_str("Requirement:\n");
        user.push_str(state.requirement());
        user.push('\n');
        if let Some(analysis) = &state.analysis {
            user.push_str(&format!(
                "\nTask type: {}\nDomain: {}\nSummary: {}\n",
                analysis.task_type, analysis.domain, analysis.summary
            ));
        }
        if let Some(context) = &state.context {
            if !context.is_empty() {
                user.push('\n');
                user.push_str(&render_bundle(context, CONTEXT_TOKEN_BUDGET));
            }
        }

        // final generation goes to the quality provider under hybrid routing
        let options = ChatOptions::default().json().quality();
        let patch = match chat_json_with_repair(services, system, &user, &options)
            .await
            .and_then(|value| serde_json::from_value::<Patch>(value).map_err(Into::into))
        {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "code generation failed");
                return (state, AgentDecision::error(format!("code generation failed: {e}")));
            }
        };

        let patch = normalize_patch(patch, &state);
        if patch.edits.is_empty() && patch.tests_added.is_empty() {
            return (
                state,
                AgentDecision::error("code generation produced an empty patch"),
            );
        }

        info!(
            edits = patch.edits.len(),
            tests = patch.tests_added.len(),
            branch = %patch.branch_name,
            "patch generated"
        );
        let message = format!(
            "Generated a patch with {} edit(s) and {} test file(s) targeting {}",
            patch.edits.len(),
            patch.tests_added.len(),
            patch.branch_name
        );
        (
            state.with_patch(patch),
            AgentDecision::advance(AgentName::PatchApplier, message),
        )
    }
}

fn normalize_patch(mut patch: Patch, state: &WorkflowState) -> Patch {
    if patch.branch_name.trim().is_empty() {
        patch.branch_name = match state.mode {
            RunMode::Scaffold => "feat/init-project".to_string(),
            RunMode::Maintain => {
                let seed = state
                    .analysis
                    .as_ref()
                    .map(|a| a.summary.as_str())
                    .unwrap_or_else(|| state.requirement());
                branch_slug(seed)
            }
        };
    }
    patch
}
