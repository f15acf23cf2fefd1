use async_trait::async_trait;
use codemend_common::llm::{ChatModel, ChatOptions, Embedder};
use codemend_common::{CoreError, Result, RetrievalConfig, StrategyType};
use codemend_retrieval::{RetrievalEngine, RetrievalPlanner};
use codemend_storage::{GraphNode, GraphStore, MemoryGraphStore, MemoryVectorIndex, NodeLabel, VectorIndex, VectorPoint};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REPO: &str = "github.com/acme/shop@main";

/// Two-axis embedding space: refund-ish texts on one axis, the rest on the other
struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                if text.to_lowercase().contains("refund") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        2
    }
}

struct ScriptedChat(String);

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn chat(&self, _system: &str, _user: &str, _options: &ChatOptions) -> Result<String> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn chunk(id: &str, file: &str, class_name: &str, method: Option<&str>, content: &str, vector: Vec<f32>) -> VectorPoint {
    let mut point = VectorPoint::new(id, vector)
        .with_payload("repo_name", json!(REPO))
        .with_payload("file_path", json!(file))
        .with_payload("chunk_type", json!(if method.is_some() { "METHOD" } else { "CLASS" }))
        .with_payload("class_name", json!(class_name))
        .with_payload("content", json!(content));
    if let Some(method) = method {
        point = point.with_payload("method_name", json!(method));
    }
    point
}

async fn seeded_stores() -> (Arc<MemoryVectorIndex>, Arc<MemoryGraphStore>) {
    let vectors = Arc::new(MemoryVectorIndex::new(2));
    vectors
        .upsert(vec![
            chunk(
                "refund-method",
                "src/main/java/com/acme/PaymentService.java",
                "PaymentService",
                Some("refund"),
                "public void refund(String id) {}",
                vec![1.0, 0.0],
            ),
            chunk(
                "invoice-class",
                "src/main/java/com/acme/Invoice.java",
                "Invoice",
                None,
                "public class Invoice {}",
                vec![0.0, 1.0],
            ),
            chunk(
                "controller-method",
                "src/main/java/com/acme/PaymentController.java",
                "PaymentController",
                Some("handleRefund"),
                "public ResponseEntity handleRefund() {}",
                vec![0.9, 0.1],
            ),
        ])
        .await
        .unwrap();

    let graph = Arc::new(MemoryGraphStore::new());
    graph
        .merge_node(
            &GraphNode::new(NodeLabel::Method, "refund-method", REPO)
                .with_property("kind", "METHOD")
                .with_property("className", "PaymentService")
                .with_property("methodName", "refund")
                .with_property("filePath", "src/main/java/com/acme/PaymentService.java")
                .with_property("sourceCode", "public void refund(String id) {}"),
        )
        .await
        .unwrap();

    (vectors, graph)
}

fn engine(vectors: Arc<MemoryVectorIndex>, graph: Arc<MemoryGraphStore>, plan_json: &str) -> RetrievalEngine {
    RetrievalEngine::new(
        vectors,
        graph,
        Arc::new(FakeEmbedder),
        RetrievalPlanner::new(Arc::new(ScriptedChat(plan_json.to_string()))),
        RetrievalConfig::default(),
    )
}

#[tokio::test]
async fn semantic_strategy_ranks_by_similarity() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "semantic", "parameters": {"query": "refund a payment"}, "priority": 1, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("add refund endpoint", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bundle.items[0].id, "refund-method");
    assert_eq!(bundle.items[0].class_name.as_deref(), Some("PaymentService"));
    assert!(bundle.items[0].score > bundle.items[1].score);
}

#[tokio::test]
async fn duplicate_hits_keep_highest_score() {
    let (vectors, graph) = seeded_stores().await;
    // semantic finds refund-method with score ~1.0, fullText finds it again at 0.5
    let plan = r#"{"strategies": [
        {"type": "semantic", "parameters": {"query": "refund"}, "priority": 1, "max_results": 10},
        {"type": "fullText", "parameters": {"text": "refund"}, "priority": 2, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    let refund_hits: Vec<_> = bundle.items.iter().filter(|i| i.id == "refund-method").collect();
    assert_eq!(refund_hits.len(), 1);
    assert!(refund_hits[0].score > 0.9);
}

#[tokio::test]
async fn failing_strategy_returns_partial_results() {
    let (vectors, graph) = seeded_stores().await;
    // the filePath pattern is an invalid regex; the semantic strategy still lands
    let plan = r#"{"strategies": [
        {"type": "filePath", "parameters": {"pattern": "["}, "priority": 1, "max_results": 10},
        {"type": "semantic", "parameters": {"query": "refund"}, "priority": 2, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!bundle.is_empty());
    assert_eq!(bundle.items[0].id, "refund-method");
}

#[tokio::test]
async fn file_path_strategy_filters_by_regex() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "filePath", "parameters": {"pattern": "Controller\\.java$"}, "priority": 1, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 1);
    assert_eq!(bundle.items[0].id, "controller-method");
}

#[tokio::test]
async fn metadata_empty_bag_degrades_to_repo_scan() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "metadata", "parameters": {}, "priority": 1, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 3);
}

#[tokio::test]
async fn bundle_cap_is_enforced() {
    let vectors = Arc::new(MemoryVectorIndex::new(2));
    let mut points = Vec::new();
    for i in 0..80 {
        points.push(chunk(
            &format!("chunk-{i}"),
            &format!("src/main/java/com/acme/C{i}.java"),
            &format!("C{i}"),
            None,
            "class C {}",
            vec![1.0, 0.0],
        ));
    }
    vectors.upsert(points).await.unwrap();
    let graph = Arc::new(MemoryGraphStore::new());

    let plan = r#"{"strategies": [
        {"type": "semantic", "parameters": {"query": "refund"}, "priority": 1, "max_results": 80}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bundle.len(), RetrievalConfig::default().bundle_cap);
}

#[tokio::test]
async fn cancellation_short_circuits() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "semantic", "parameters": {"query": "refund"}, "priority": 1, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine.retrieve("q", None, REPO, &cancel).await;

    assert!(matches!(result, Err(CoreError::Cancelled)));
}

#[tokio::test]
async fn unknown_relationship_kind_is_rejected_but_partial() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "graph", "parameters": {"query": "MATCH (a)-[:{relationship}]->(b) RETURN a.id AS id", "relationship": "DROP_TABLES"}, "priority": 1, "max_results": 10},
        {"type": "semantic", "parameters": {"query": "refund"}, "priority": 2, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (plan, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(plan.strategies.len(), 2);
    assert_eq!(plan.strategies[0].strategy, StrategyType::Graph);
    // the graph strategy failed validation; semantic results still returned
    assert!(!bundle.is_empty());
}

#[tokio::test]
async fn full_text_hits_come_back_with_structural_score() {
    let (vectors, graph) = seeded_stores().await;
    let plan = r#"{"strategies": [
        {"type": "fullText", "parameters": {"text": "refund"}, "priority": 1, "max_results": 10}
    ]}"#;
    let engine = engine(vectors, graph, plan);

    let (_, bundle) = engine
        .retrieve("q", None, REPO, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bundle.len(), 1);
    assert_eq!(bundle.items[0].id, "refund-method");
    assert!((bundle.items[0].score - 0.5).abs() < f32::EPSILON);
}
