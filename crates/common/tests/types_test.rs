use codemend_common::types::*;

#[test]
fn test_conversation_id_creation() {
    let conv_id1 = ConversationId::new();
    let conv_id2 = ConversationId::new();

    assert_ne!(conv_id1, conv_id2);
}

#[test]
fn test_conversation_id_from_string() {
    let id_str = "test-conversation-123".to_string();
    let conv_id = ConversationId::from_string(id_str.clone());

    assert_eq!(conv_id.0, id_str);
}

#[test]
fn test_repo_key_name_strips_scheme_and_suffix() {
    let key = RepoKey::new("https://github.com/acme/shop.git", "main");
    assert_eq!(key.name(), "github.com/acme/shop@main");
}

#[test]
fn test_repo_key_name_ssh_style() {
    let key = RepoKey::new("git@github.com:acme/shop.git", "develop");
    assert_eq!(key.name(), "github.com/acme/shop@develop");
}

#[test]
fn test_entity_stable_id_is_deterministic() {
    let a = CodeEntity::stable_id("github.com/acme/shop@main", "com.acme.PaymentService", EntityKind::Class);
    let b = CodeEntity::stable_id("github.com/acme/shop@main", "com.acme.PaymentService", EntityKind::Class);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
}

#[test]
fn test_entity_stable_id_varies_by_kind() {
    let class = CodeEntity::stable_id("repo", "com.acme.Payment", EntityKind::Class);
    let method = CodeEntity::stable_id("repo", "com.acme.Payment", EntityKind::Method);
    assert_ne!(class, method);
}

#[test]
fn test_index_state_point_id_shape() {
    assert_eq!(
        IndexState::point_id("github.com/acme/shop@main"),
        "__metadata__:github.com/acme/shop@main:index_state"
    );
}

#[test]
fn test_workflow_state_roundtrip() {
    let state = WorkflowState::new("Add a refund endpoint", "https://github.com/acme/shop", RunMode::Maintain)
        .with_analysis(RequirementAnalysis {
            task_type: TaskType::Feature,
            domain: "payments".to_string(),
            summary: "Add refund".to_string(),
        })
        .with_build_attempt();

    let json = serde_json::to_string(&state).unwrap();
    let parsed: WorkflowState = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.conversation_id, state.conversation_id);
    assert_eq!(parsed.status, WorkflowStatus::Running);
    assert_eq!(parsed.build_attempts, 1);
    assert_eq!(parsed.requirement(), "Add a refund endpoint");

    // serialize -> parse -> serialize is identity
    let json2 = serde_json::to_string(&parsed).unwrap();
    assert_eq!(json, json2);
}

#[test]
fn test_workflow_state_transitions_are_copies() {
    let original = WorkflowState::new("req", "url", RunMode::Scaffold);
    let transitioned = original.clone().with_status(WorkflowStatus::AwaitingUser);

    assert_eq!(original.status, WorkflowStatus::Running);
    assert_eq!(transitioned.status, WorkflowStatus::AwaitingUser);
    assert_eq!(original.conversation_id, transitioned.conversation_id);
}

#[test]
fn test_status_serializes_screaming_snake() {
    assert_eq!(
        serde_json::to_string(&WorkflowStatus::AwaitingUser).unwrap(),
        "\"AWAITING_USER\""
    );
    assert_eq!(
        serde_json::to_string(&EventStatus::Connected).unwrap(),
        "\"CONNECTED\""
    );
}

#[test]
fn test_terminal_statuses() {
    assert!(WorkflowStatus::Completed.is_terminal());
    assert!(WorkflowStatus::Failed.is_terminal());
    assert!(WorkflowStatus::Cancelled.is_terminal());
    assert!(!WorkflowStatus::Running.is_terminal());
    assert!(!WorkflowStatus::AwaitingUser.is_terminal());
}

#[test]
fn test_relationship_kind_round_trip() {
    use std::str::FromStr;
    for kind in [
        RelationshipKind::Extends,
        RelationshipKind::AnnotatedBy,
        RelationshipKind::TypeDependency,
    ] {
        let rendered = kind.to_string();
        assert_eq!(RelationshipKind::from_str(&rendered).unwrap(), kind);
    }
    assert_eq!(RelationshipKind::AnnotatedBy.to_string(), "ANNOTATED_BY");
}

#[test]
fn test_build_error_signature_stability() {
    let error = BuildError {
        file: "src/main/java/A.java".to_string(),
        line: 10,
        column: 5,
        message: "cannot find symbol".to_string(),
        kind: BuildErrorKind::SymbolNotFound,
    };
    assert_eq!(error.signature(), error.clone().signature());
}

#[test]
fn test_strategy_type_camel_case_wire_format() {
    assert_eq!(
        serde_json::to_string(&StrategyType::FullText).unwrap(),
        "\"fullText\""
    );
    let parsed: StrategyType = serde_json::from_str("\"filePath\"").unwrap();
    assert_eq!(parsed, StrategyType::FilePath);
}

#[test]
fn test_retrieval_strategy_defaults() {
    let raw = r#"{"type": "semantic", "parameters": {"query": "refund"}}"#;
    let strategy: RetrievalStrategy = serde_json::from_str(raw).unwrap();
    assert_eq!(strategy.strategy, StrategyType::Semantic);
    assert_eq!(strategy.max_results, 20);
    assert!(strategy.target_repos.is_empty());
}

#[test]
fn test_decision_helpers() {
    let decision = AgentDecision::advance(AgentName::CodeGenerator, "context ready");
    assert_eq!(decision.kind, DecisionKind::Continue);
    assert_eq!(decision.next_agent, Some(AgentName::CodeGenerator));

    let done = AgentDecision::complete("PR opened");
    assert_eq!(done.kind, DecisionKind::Complete);
    assert!(done.next_agent.is_none());
}
