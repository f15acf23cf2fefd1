use async_trait::async_trait;
use codemend_common::{AgentDecision, AgentName, EventStatus, WorkflowEvent, WorkflowState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Agent;
use crate::build::{error_signatures, to_build_result, CompilerDriver as _};
use crate::services::Services;

/// Compiles the working copy; routes to the publisher on success and into the
/// repair loop on failure, within the attempt budget.
pub struct BuildVerifier;

#[async_trait]
impl Agent for BuildVerifier {
    fn name(&self) -> AgentName {
        AgentName::BuildVerifier
    }

    async fn run(
        &self,
        state: WorkflowState,
        services: &Services,
        cancel: &CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        if cancel.is_cancelled() {
            return (state, AgentDecision::error("cancelled before build"));
        }

        let workdir = match services.workdir(&state) {
            Ok(dir) => dir,
            Err(e) => return (state, AgentDecision::error(format!("working copy: {e}"))),
        };

        services.events.publish(
            &state.conversation_id.to_string(),
            WorkflowEvent {
                conversation_id: state.conversation_id.to_string(),
                status: EventStatus::Tool,
                agent: Some(self.name().to_string()),
                message: "Compiling working copy".to_string(),
                tool: Some("compiler".to_string()),
                content: None,
                progress: None,
            },
        );

        let output = match services.compiler.compile(&workdir).await {
            Ok(output) => output,
            Err(e) => return (state, AgentDecision::error(format!("compiler: {e}"))),
        };
        let result = to_build_result(output);
        let state = state.with_build_attempt();
        let attempts = state.build_attempts;

        if result.success {
            info!(attempts, duration_ms = result.duration_ms, "build succeeded");
            let message = format!("Build succeeded on attempt {attempts}");
            return (
                state.with_build_result(result),
                AgentDecision::advance(AgentName::Publisher, message),
            );
        }

        let signatures = error_signatures(&result);
        warn!(
            attempts,
            errors = result.errors.len(),
            "build failed"
        );

        let budget = services.config.orchestrator.max_build_attempts;
        if attempts >= budget {
            let message = format!(
                "Build still failing after {attempts} attempt(s); giving up with {} error(s)",
                result.errors.len()
            );
            return (state.with_build_result(result), AgentDecision::fail(message));
        }

        // identical error signatures on consecutive attempts: the fix loop is
        // spinning, stop it before the budget runs out
        if !signatures.is_empty() && signatures == state.previous_error_signatures {
            let message = format!(
                "No progress between build attempts ({} identical error(s)); stopping",
                signatures.len()
            );
            return (state.with_build_result(result), AgentDecision::fail(message));
        }

        let message = format!(
            "Build attempt {attempts} failed with {} error(s); generating a fix",
            result.errors.len()
        );
        (
            state
                .with_build_result(result)
                .with_error_signatures(signatures),
            AgentDecision::advance(AgentName::FixGenerator, message),
        )
    }
}
