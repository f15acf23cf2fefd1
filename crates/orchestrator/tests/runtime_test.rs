//! End-to-end workflow tests over ephemeral stores with scripted
//! collaborators.

mod common;

use codemend_common::{
    AgentDecision, AgentName, ConversationId, RunMode, WorkflowState, WorkflowStatus,
};
use codemend_orchestrator::agents::Agent;
use codemend_orchestrator::{AgentRuntime, WorkflowSupervisor};
use codemend_storage::SnapshotStore;
use common::*;
use git2::Repository;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_origin(dir: &Path, workspace: &codemend_workspace::WorkingCopyManager) -> Repository {
    let repo = Repository::init(dir).unwrap();
    let file = dir.join("src/main/java/com/acme/PaymentService.java");
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(
        file,
        "package com.acme;\n\npublic class PaymentService {\n    public void capture() {}\n}\n",
    )
    .unwrap();
    fs::write(dir.join("pom.xml"), "<project/>").unwrap();
    workspace.commit_all(&repo, "initial").unwrap();
    repo
}

async fn wait_terminal(
    supervisor: &WorkflowSupervisor,
    conversation_id: &ConversationId,
) -> WorkflowState {
    for _ in 0..250 {
        if let Some(state) = supervisor.get(conversation_id).await.unwrap() {
            if state.status.is_terminal() {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("conversation never reached a terminal status");
}

fn assert_status_sequence_monotonic(history: &[WorkflowState]) {
    let mut terminal_seen = false;
    for window in history.windows(2) {
        let (from, to) = (window[0].status, window[1].status);
        assert!(!terminal_seen, "snapshot after terminal status");
        let allowed = match (from, to) {
            (a, b) if a == b => true,
            (WorkflowStatus::Running, WorkflowStatus::AwaitingUser) => true,
            (WorkflowStatus::AwaitingUser, WorkflowStatus::Running) => true,
            (WorkflowStatus::Running, terminal) if terminal.is_terminal() => true,
            (WorkflowStatus::AwaitingUser, WorkflowStatus::Cancelled) => true,
            _ => false,
        };
        assert!(allowed, "illegal status transition {from} -> {to}");
        if to.is_terminal() {
            terminal_seen = true;
        }
    }
}

#[tokio::test]
async fn maintenance_workflow_completes_and_opens_pr() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, pr_client) = test_services(
        &temp.path().join("workspaces"),
        vec![ANALYZER_REPLY, PLANNER_REPLY, GENERATOR_REPLY],
        vec![ScriptedCompiler::success()],
    );
    let origin_dir = temp.path().join("origin");
    init_origin(&origin_dir, &services.workspace);

    let supervisor = WorkflowSupervisor::new(services.clone());
    let state = supervisor
        .start(
            "Add a refund endpoint",
            origin_dir.to_str().unwrap(),
            RunMode::Maintain,
            None,
        )
        .await
        .unwrap();
    assert_eq!(state.status, WorkflowStatus::Running);

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;

    assert_eq!(final_state.status, WorkflowStatus::Completed);
    assert_eq!(final_state.build_attempts, 1);

    // retrieval ran against the freshly indexed repository
    let context = final_state.context.as_ref().expect("context bundle");
    assert!(context
        .items
        .iter()
        .any(|item| item.class_name.as_deref() == Some("PaymentService")));

    // the patch landed in the conversation's working copy
    let workdir = services
        .workspace
        .workdir_for(&state.conversation_id.to_string());
    assert!(workdir
        .join("src/main/java/com/acme/RefundController.java")
        .exists());
    assert!(workdir
        .join("src/test/java/com/acme/RefundControllerTest.java")
        .exists());

    // the branch was pushed to origin
    let origin = Repository::open(&origin_dir).unwrap();
    assert!(origin
        .find_branch("feat/refund-endpoint", git2::BranchType::Local)
        .is_ok());

    // and a PR was opened against the base branch
    let calls = pr_client.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.head_branch, "feat/refund-endpoint");

    // audit trail: snapshots are monotonic and end terminal
    let history = services
        .stores
        .snapshots
        .load_history(&state.conversation_id)
        .await
        .unwrap();
    assert!(history.len() >= 6);
    assert_status_sequence_monotonic(&history);
}

#[tokio::test]
async fn scaffold_workflow_skips_retrieval() {
    let temp = tempfile::TempDir::new().unwrap();
    let scaffold_patch = r#"{
      "branch_name": "feat/init-project",
      "edits": [
        {"path": "pom.xml", "op": "create", "content": "<project/>"},
        {"path": "src/main/java/com/acme/InventoryApplication.java", "op": "create",
         "content": "public class InventoryApplication {}"},
        {"path": "src/main/java/com/acme/Inventory.java", "op": "create",
         "content": "public class Inventory {}"},
        {"path": "src/main/java/com/acme/InventoryController.java", "op": "create",
         "content": "public class InventoryController {}"}
      ],
      "tests_added": [],
      "explanation": "Scaffolds the inventory service."
    }"#;
    // scaffold consumes no planner reply: analyzer then generator
    let (services, pr_client) = test_services(
        &temp.path().join("workspaces"),
        vec![
            r#"{"task_type": "scaffold", "domain": "inventory", "summary": "Scaffold inventory service"}"#,
            scaffold_patch,
        ],
        vec![ScriptedCompiler::success()],
    );
    let origin_dir = temp.path().join("origin");
    Repository::init(&origin_dir).unwrap();

    let supervisor = WorkflowSupervisor::new(services.clone());
    let state = supervisor
        .start(
            "Create a microservice to manage Inventory with REST endpoints",
            origin_dir.to_str().unwrap(),
            RunMode::Scaffold,
            None,
        )
        .await
        .unwrap();

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;

    assert_eq!(final_state.status, WorkflowStatus::Completed);
    let origin = Repository::open(&origin_dir).unwrap();
    assert!(origin
        .find_branch("feat/init-project", git2::BranchType::Local)
        .is_ok());
    assert_eq!(pr_client.calls.lock().unwrap().len(), 1);

    let workdir = services
        .workspace
        .workdir_for(&state.conversation_id.to_string());
    assert!(workdir.join("pom.xml").exists());
    assert!(workdir
        .join("src/main/java/com/acme/InventoryApplication.java")
        .exists());
}

#[tokio::test]
async fn build_repair_loop_converges_within_budget() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, pr_client) = test_services(
        &temp.path().join("workspaces"),
        vec![ANALYZER_REPLY, PLANNER_REPLY, GENERATOR_REPLY, FIX_REPLY],
        vec![
            ScriptedCompiler::failure(FAILING_BUILD_LOG),
            ScriptedCompiler::success(),
        ],
    );
    let origin_dir = temp.path().join("origin");
    init_origin(&origin_dir, &services.workspace);

    let supervisor = WorkflowSupervisor::new(services.clone());
    let state = supervisor
        .start(
            "Add a refund endpoint",
            origin_dir.to_str().unwrap(),
            RunMode::Maintain,
            None,
        )
        .await
        .unwrap();

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;

    assert_eq!(final_state.status, WorkflowStatus::Completed);
    assert_eq!(final_state.build_attempts, 2);
    assert_eq!(pr_client.calls.lock().unwrap().len(), 1);

    // the corrective patch was applied
    let workdir = services
        .workspace
        .workdir_for(&state.conversation_id.to_string());
    let content =
        fs::read_to_string(workdir.join("src/main/java/com/acme/RefundController.java")).unwrap();
    assert!(content.contains("fixed"));
}

#[tokio::test]
async fn repeated_identical_errors_short_circuit_to_failure() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, pr_client) = test_services(
        &temp.path().join("workspaces"),
        vec![ANALYZER_REPLY, PLANNER_REPLY, GENERATOR_REPLY, FIX_REPLY],
        vec![
            ScriptedCompiler::failure(FAILING_BUILD_LOG),
            ScriptedCompiler::failure(FAILING_BUILD_LOG),
        ],
    );
    let origin_dir = temp.path().join("origin");
    init_origin(&origin_dir, &services.workspace);

    let supervisor = WorkflowSupervisor::new(services.clone());
    let state = supervisor
        .start(
            "Add a refund endpoint",
            origin_dir.to_str().unwrap(),
            RunMode::Maintain,
            None,
        )
        .await
        .unwrap();

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;

    assert_eq!(final_state.status, WorkflowStatus::Failed);
    assert_eq!(final_state.build_attempts, 2);
    // the last build result stays attached for the audit trail
    assert!(!final_state.build_result.as_ref().unwrap().success);
    assert!(pr_client.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn attempt_budget_exhaustion_fails_with_result_attached() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, _pr) = test_services(
        &temp.path().join("workspaces"),
        vec![
            ANALYZER_REPLY,
            PLANNER_REPLY,
            GENERATOR_REPLY,
            FIX_REPLY,
            FIX_REPLY,
        ],
        vec![
            ScriptedCompiler::failure(FAILING_BUILD_LOG),
            ScriptedCompiler::failure(FAILING_BUILD_LOG_OTHER),
            ScriptedCompiler::failure(FAILING_BUILD_LOG),
        ],
    );
    let origin_dir = temp.path().join("origin");
    init_origin(&origin_dir, &services.workspace);

    let supervisor = WorkflowSupervisor::new(services.clone());
    let state = supervisor
        .start(
            "Add a refund endpoint",
            origin_dir.to_str().unwrap(),
            RunMode::Maintain,
            None,
        )
        .await
        .unwrap();

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;

    assert_eq!(final_state.status, WorkflowStatus::Failed);
    assert_eq!(final_state.build_attempts, 3);
    assert!(!final_state.build_result.as_ref().unwrap().success);
}

/// Suspends on the first pass, completes once the user has replied
struct SuspendOnceAgent;

#[async_trait::async_trait]
impl Agent for SuspendOnceAgent {
    fn name(&self) -> AgentName {
        AgentName::RequirementAnalyzer
    }

    async fn run(
        &self,
        state: WorkflowState,
        _services: &codemend_orchestrator::Services,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        let user_replies = state
            .messages
            .iter()
            .filter(|m| m.role == codemend_common::MessageRole::User)
            .count();
        if user_replies < 2 {
            (
                state,
                AgentDecision::suspend("Which payment provider should refunds use?"),
            )
        } else {
            (state, AgentDecision::complete("Done after clarification"))
        }
    }
}

#[tokio::test]
async fn suspension_and_resume_reenter_same_agent() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, _pr) = test_services(&temp.path().join("workspaces"), vec![], vec![]);

    let mut agents: HashMap<AgentName, Arc<dyn Agent>> = HashMap::new();
    agents.insert(AgentName::RequirementAnalyzer, Arc::new(SuspendOnceAgent));
    let runtime = Arc::new(AgentRuntime::with_agents(agents));
    let supervisor = WorkflowSupervisor::with_runtime(services.clone(), runtime);

    let state = supervisor
        .start("Add refunds", "https://github.com/acme/shop", RunMode::Maintain, None)
        .await
        .unwrap();

    // reaches AWAITING_USER and parks there
    let mut suspended = None;
    for _ in 0..250 {
        let current = supervisor.get(&state.conversation_id).await.unwrap().unwrap();
        if current.status == WorkflowStatus::AwaitingUser {
            suspended = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let suspended = suspended.expect("never suspended");
    assert_eq!(
        suspended.current_agent,
        Some(AgentName::RequirementAnalyzer)
    );

    // resuming appends the user content and re-enters the same agent
    let resumed = supervisor
        .resume(&state.conversation_id, "Use the Stripe provider")
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Running);

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;
    assert_eq!(final_state.status, WorkflowStatus::Completed);
    assert!(final_state
        .messages
        .iter()
        .any(|m| m.content == "Use the Stripe provider"));

    let history = services
        .stores
        .snapshots
        .load_history(&state.conversation_id)
        .await
        .unwrap();
    assert_status_sequence_monotonic(&history);
}

#[tokio::test]
async fn resume_of_running_conversation_is_rejected() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, _pr) = test_services(&temp.path().join("workspaces"), vec![], vec![]);

    let mut agents: HashMap<AgentName, Arc<dyn Agent>> = HashMap::new();
    agents.insert(AgentName::RequirementAnalyzer, Arc::new(SuspendOnceAgent));
    let runtime = Arc::new(AgentRuntime::with_agents(agents));
    let supervisor = WorkflowSupervisor::with_runtime(services, runtime);

    let state = supervisor
        .start("req", "https://github.com/acme/shop", RunMode::Maintain, None)
        .await
        .unwrap();
    let final_state = {
        // wait for suspension, resume, wait for completion
        loop {
            let current = supervisor.get(&state.conversation_id).await.unwrap().unwrap();
            if current.status == WorkflowStatus::AwaitingUser {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        supervisor
            .resume(&state.conversation_id, "answer")
            .await
            .unwrap();
        wait_terminal(&supervisor, &state.conversation_id).await
    };
    assert_eq!(final_state.status, WorkflowStatus::Completed);

    // terminal conversations cannot be resumed
    let error = supervisor
        .resume(&state.conversation_id, "again")
        .await
        .unwrap_err();
    assert!(matches!(error, codemend_common::CoreError::InvalidTransition(_)));
}

/// Loops forever on itself with a small delay; counts its runs
struct LoopingAgent {
    runs: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl Agent for LoopingAgent {
    fn name(&self) -> AgentName {
        AgentName::RequirementAnalyzer
    }

    async fn run(
        &self,
        state: WorkflowState,
        _services: &codemend_orchestrator::Services,
        _cancel: &tokio_util::sync::CancellationToken,
    ) -> (WorkflowState, AgentDecision) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        (
            state,
            AgentDecision::advance(AgentName::RequirementAnalyzer, "looping"),
        )
    }
}

#[tokio::test]
async fn cancellation_is_observed_at_the_next_boundary() {
    let temp = tempfile::TempDir::new().unwrap();
    let (services, _pr) = test_services(&temp.path().join("workspaces"), vec![], vec![]);

    let runs = Arc::new(AtomicU32::new(0));
    let mut agents: HashMap<AgentName, Arc<dyn Agent>> = HashMap::new();
    agents.insert(
        AgentName::RequirementAnalyzer,
        Arc::new(LoopingAgent { runs: runs.clone() }),
    );
    let runtime = Arc::new(AgentRuntime::with_agents(agents));
    let supervisor = WorkflowSupervisor::with_runtime(services.clone(), runtime);

    let state = supervisor
        .start("req", "https://github.com/acme/shop", RunMode::Maintain, None)
        .await
        .unwrap();

    // let a couple of agent steps happen, then cancel mid-flight
    tokio::time::sleep(Duration::from_millis(80)).await;
    supervisor.cancel(&state.conversation_id).await.unwrap();

    let final_state = wait_terminal(&supervisor, &state.conversation_id).await;
    assert_eq!(final_state.status, WorkflowStatus::Cancelled);

    // no further agent runs after cancellation took effect
    let runs_at_cancel = runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(runs.load(Ordering::SeqCst), runs_at_cancel);

    let history = services
        .stores
        .snapshots
        .load_history(&state.conversation_id)
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().status, WorkflowStatus::Cancelled);
    assert_status_sequence_monotonic(&history);
}
