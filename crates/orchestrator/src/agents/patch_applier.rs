use async_trait::async_trait;
use codemend_common::{AgentDecision, AgentName, WorkflowState};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Agent;
use crate::services::Services;

/// Writes the candidate patch into the working copy on its feature branch
pub struct PatchApplier;

#[async_trait]
impl Agent for PatchApplier {
    fn name(&self) -> AgentName {
        AgentName::PatchApplier
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        _cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let Some(patch) = state.patch.clone() else {
            return (state, AgentDecision::error("no patch to apply"));
        };

        let (repo, _key, dir) = match services.working_copy(&state) {
            Ok(parts) => parts,
            Err(e) => return (state, AgentDecision::error(format!("working copy: {e}"))),
        };

        // an unborn HEAD (scaffold into an empty repository) cannot carry a
        // branch yet; the publisher creates it after the first commit
        let current = repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string));
        let base_branch = current
            .clone()
            .filter(|_| !state.scratch.contains_key("base_branch"));
        let on_feature_branch = current
            .map(|current| current == patch.branch_name)
            .unwrap_or(true);
        if !on_feature_branch {
            if let Err(e) = services.workspace.create_branch(&repo, &patch.branch_name) {
                return (state, AgentDecision::error(format!("branching: {e}")));
            }
        }

        let applied = match services.workspace.apply_patch(&dir, &patch) {
            Ok(applied) => applied,
            Err(e) => return (state, AgentDecision::error(format!("apply patch: {e}"))),
        };

        info!(files = applied.len(), branch = %patch.branch_name, "patch applied");
        let message = format!(
            "Applied {} file(s) on branch {}",
            applied.len(),
            patch.branch_name
        );
        let mut decision = AgentDecision::advance(AgentName::BuildVerifier, message);
        decision
            .scratch
            .insert("applied_files".to_string(), json!(applied));
        // remember where the feature branch forked off, for the PR base
        if let Some(base_branch) = base_branch {
            decision
                .scratch
                .insert("base_branch".to_string(), json!(base_branch));
        }
        (state, decision)
    }
}
