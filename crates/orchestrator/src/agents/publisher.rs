use async_trait::async_trait;
use codemend_common::{AgentDecision, AgentName, WorkflowState};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Agent;
use crate::publish::{PullRequest, PullRequestClient as _};
use crate::services::Services;

/// Commits the verified change, pushes the feature branch and opens a PR
pub struct Publisher;

#[async_trait]
impl Agent for Publisher {
    fn name(&self) -> AgentName {
        AgentName::Publisher
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        _cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let Some(patch) = state.patch.clone() else {
            return (state, AgentDecision::error("nothing to publish"));
        };

        let (repo, key, _dir) = match services.working_copy(&state) {
            Ok(parts) => parts,
            Err(e) => return (state, AgentDecision::error(format!("working copy: {e}"))),
        };

        let title = state
            .analysis
            .as_ref()
            .map(|a| a.summary.clone())
            .unwrap_or_else(|| state.requirement().chars().take(72).collect());

        let commit = match services.workspace.commit_all(&repo, &title) {
            Ok(commit) => commit,
            Err(e) => return (state, AgentDecision::error(format!("commit: {e}"))),
        };

        // a scaffolded repository only gains its first commit here, so the
        // feature branch may still need to be created
        let current = repo
            .head()
            .ok()
            .and_then(|h| h.shorthand().map(str::to_string));
        if current.as_deref() != Some(patch.branch_name.as_str()) {
            if let Err(e) = services.workspace.create_branch(&repo, &patch.branch_name) {
                return (state, AgentDecision::error(format!("branching: {e}")));
            }
        }

        // the base recorded before branching wins; a scaffolded repository
        // falls back to the branch the root commit landed on
        let base_branch = state
            .scratch
            .get("base_branch")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| current.clone().filter(|c| c != &patch.branch_name))
            .unwrap_or_else(|| key.branch.clone());

        if let Err(e) = services.workspace.push(&repo, &patch.branch_name) {
            return (state, AgentDecision::error(format!("push: {e}")));
        }

        let request = PullRequest {
            title: title.clone(),
            body: format!(
                "{}\n\n---\nAutomated change for: {}",
                patch.explanation,
                state.requirement()
            ),
            head_branch: patch.branch_name.clone(),
            base_branch,
        };
        let pr_url = match services.pr_client.open_pull_request(&key.url, &request).await {
            Ok(url) => url,
            Err(e) => return (state, AgentDecision::error(format!("pull request: {e}"))),
        };

        info!(commit = %commit, pr = %pr_url, "change published");
        let mut decision = AgentDecision::complete(format!("Pull request opened: {pr_url}"));
        decision.scratch.insert("pr_url".to_string(), json!(pr_url));
        decision.scratch.insert("commit".to_string(), json!(commit));
        (state, decision)
    }
}
