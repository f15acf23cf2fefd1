//! The closed set of workflow agents. Each agent is a step function from
//! `WorkflowState` to a new state plus an `AgentDecision` naming the next
//! transition; faults become decisions of kind Error rather than panics.

mod build_verifier;
mod code_generator;
mod fix_generator;
mod patch_applier;
mod prompts;
mod publisher;
mod requirement_analyzer;
mod retrieval_planner;

pub use build_verifier::BuildVerifier;
pub use code_generator::CodeGenerator;
pub use fix_generator::FixGenerator;
pub use patch_applier::PatchApplier;
pub use publisher::Publisher;
pub use requirement_analyzer::RequirementAnalyzer;
pub use retrieval_planner::RetrievalPlanner;

use async_trait::async_trait;
use codemend_common::llm::{parse_model_json, ChatModel as _, ChatOptions};
use codemend_common::{AgentDecision, AgentName, CoreError, Result, WorkflowState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::services::Services;

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> AgentName;

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision);
}

/// The full agent registry used by the runtime
pub fn default_agents() -> HashMap<AgentName, Arc<dyn Agent>> {
    let agents: Vec<Arc<dyn Agent>> = vec![
        Arc::new(RequirementAnalyzer),
        Arc::new(RetrievalPlanner),
        Arc::new(CodeGenerator),
        Arc::new(PatchApplier),
        Arc::new(BuildVerifier),
        Arc::new(FixGenerator),
        Arc::new(Publisher),
    ];
    agents.into_iter().map(|agent| (agent.name(), agent)).collect()
}

/// Strict-JSON chat with one corrective re-prompt on malformed output
pub(crate) async fn chat_json_with_repair(
    services: &Services,
    system: &str,
    user: &str,
    options: &ChatOptions,
) -> Result<serde_json::Value> {
    let raw = services.chat.chat(system, user, options).await?;
    match parse_model_json(&raw) {
        Ok(value) => Ok(value),
        Err(CoreError::ModelOutput(problem)) => {
            let corrective = format!(
                "{user}\n\nYour previous reply could not be parsed as JSON ({problem}). \
                 Reply again with STRICT JSON only: no prose, no markdown fences."
            );
            let raw = services.chat.chat(system, &corrective, options).await?;
            parse_model_json(&raw)
        }
        Err(other) => Err(other),
    }
}

/// `feat/...` branch slug from free-form text
pub(crate) fn branch_slug(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    let trimmed = collapsed.trim_matches('-');
    let short: String = trimmed.chars().take(40).collect();
    format!("feat/{}", short.trim_matches('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_all_seven_agents() {
        let agents = default_agents();
        assert_eq!(agents.len(), 7);
        assert!(agents.contains_key(&AgentName::RequirementAnalyzer));
        assert!(agents.contains_key(&AgentName::Publisher));
    }

    #[test]
    fn branch_slug_is_clean() {
        assert_eq!(branch_slug("Add a refund endpoint!"), "feat/add-a-refund-endpoint");
        assert_eq!(branch_slug("  weird   spacing  "), "feat/weird-spacing");
        assert!(branch_slug(&"x".repeat(100)).len() <= 45);
    }
}
