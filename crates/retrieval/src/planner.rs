//! Asks the model for a retrieval plan; falls back to plain semantic search
//! when the answer is unusable.

use codemend_common::llm::{parse_model_json, ChatModel, ChatOptions};
use codemend_common::{
    RequirementAnalysis, Result, RetrievalPlan, RetrievalStrategy, StrategyType,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a retrieval planner for a Java codebase assistant.
Given a task, produce a JSON object with a "strategies" array. Each strategy has:
- "type": one of "semantic", "metadata", "graph", "fullText", "filePath"
- "parameters": an object, shaped per type:
    semantic  -> {"query": "..."}
    metadata  -> {"annotations": ["Service"], "class_name_contains": "...", "package": "..."}
    graph     -> {"query": "MATCH ... WHERE n.repositoryId = $repoName RETURN n.id AS id, ...", "relationship": "CALLS"}
    fullText  -> {"text": "..."}
    filePath  -> {"pattern": "regex"}
- "target_repos": repository names to search (empty = current repository)
- "priority": lower runs first
- "max_results": per-strategy cap
- "reasoning": one sentence

Graph queries must bind the repository as $repoName and may reference the
relationship kind only through the "relationship" parameter. Return strict
JSON, no markdown fences."#;

pub struct RetrievalPlanner {
    chat: Arc<dyn ChatModel>,
}

impl RetrievalPlanner {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    pub async fn plan(
        &self,
        question: &str,
        analysis: Option<&RequirementAnalysis>,
        repo_name: &str,
    ) -> RetrievalPlan {
        let user_prompt = match analysis {
            Some(analysis) => format!(
                "Repository: {repo_name}\nTask type: {}\nDomain: {}\nSummary: {}\n\nQuestion: {question}",
                analysis.task_type, analysis.domain, analysis.summary
            ),
            None => format!("Repository: {repo_name}\n\nQuestion: {question}"),
        };

        match self.ask_model(&user_prompt).await {
            Ok(mut plan) if !plan.strategies.is_empty() => {
                plan.strategies.sort_by_key(|s| s.priority);
                debug!(strategies = plan.strategies.len(), "retrieval plan ready");
                plan
            }
            Ok(_) => {
                warn!("planner returned an empty plan, falling back to semantic search");
                fallback_plan(question, repo_name)
            }
            Err(e) => {
                warn!(error = %e, "retrieval planning failed, falling back to semantic search");
                fallback_plan(question, repo_name)
            }
        }
    }

    async fn ask_model(&self, user_prompt: &str) -> Result<RetrievalPlan> {
        let raw = self
            .chat
            .chat(
                PLANNER_SYSTEM_PROMPT,
                user_prompt,
                &ChatOptions::default().json(),
            )
            .await?;
        let value = parse_model_json(&raw)?;
        let plan: RetrievalPlan = serde_json::from_value(value)?;
        Ok(plan)
    }
}

/// One semantic strategy with the literal question as the query
pub fn fallback_plan(question: &str, repo_name: &str) -> RetrievalPlan {
    RetrievalPlan {
        strategies: vec![RetrievalStrategy {
            strategy: StrategyType::Semantic,
            parameters: json!({ "query": question }),
            target_repos: vec![repo_name.to_string()],
            priority: 0,
            max_results: 20,
            reasoning: "fallback: semantic search over the current repository".to_string(),
        }],
    }
}
