//! In-memory store implementations backing tests and the `ephemeral` backend.

use async_trait::async_trait;
use codemend_common::{ConversationId, ConversationMessage, CoreError, Result, WorkflowState};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;
use tracing::debug;

use crate::graph::{GraphEdge, GraphNode, GraphStore};
use crate::snapshot::SnapshotStore;
use crate::vector::{Filter, ScoredPoint, VectorIndex, VectorPoint};

pub struct MemoryVectorIndex {
    points: RwLock<HashMap<String, VectorPoint>>,
    dimension: usize,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut guard = self.points.write().unwrap_or_else(PoisonError::into_inner);
        for point in points {
            if point.vector.len() != self.dimension {
                return Err(CoreError::VectorStore(format!(
                    "dimension mismatch on upsert of {}: got {}, pinned {}",
                    point.id,
                    point.vector.len(),
                    self.dimension
                )));
            }
            guard.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<()> {
        let mut guard = self.points.write().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|_, point| !filter.matches(&point.payload));
        Ok(())
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        let guard = self.points.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .values()
            .filter(|point| filter.matches(&point.payload))
            .count())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<VectorPoint>> {
        let guard = self.points.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn query(
        &self,
        vector: Option<Vec<f32>>,
        filter: &Filter,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredPoint>> {
        let guard = self.points.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<ScoredPoint> = guard
            .values()
            .filter(|point| filter.matches(&point.payload))
            .map(|point| ScoredPoint {
                id: point.id.clone(),
                score: vector
                    .as_deref()
                    .map(|v| cosine(v, &point.vector))
                    .unwrap_or(0.0),
                payload: if include_metadata {
                    point.payload.clone()
                } else {
                    serde_json::Map::new()
                },
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub struct MemoryGraphStore {
    nodes: RwLock<HashMap<String, GraphNode>>,
    edges: RwLock<Vec<GraphEdge>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn has_edge(&self, from_id: &str, to_id: &str, kind: codemend_common::RelationshipKind) -> bool {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.from_id == from_id && e.to_id == to_id && e.kind == kind)
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn node_prop<'a>(node: &'a GraphNode, key: &str) -> Option<&'a str> {
    node.properties.get(key).and_then(Value::as_str)
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    /// Understands the retrieval engine's full-text template (a `CONTAINS`
    /// scan over sourceCode / summary / javadoc); any other query shape
    /// returns no rows, which callers treat as an empty result.
    async fn run(&self, text: &str, params: &[(String, Value)]) -> Result<Vec<serde_json::Map<String, Value>>> {
        if !text.contains("CONTAINS") {
            debug!(query = text, "memory graph store cannot interpret query");
            return Ok(vec![]);
        }

        let needle = params
            .iter()
            .find(|(k, _)| k == "needle")
            .and_then(|(_, v)| v.as_str())
            .unwrap_or_default()
            .to_string();
        let repo = params
            .iter()
            .find(|(k, _)| k == "repoName")
            .and_then(|(_, v)| v.as_str())
            .map(str::to_string);

        let guard = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows = Vec::new();
        for node in guard.values() {
            if let Some(repo) = &repo {
                if &node.repository_id != repo {
                    continue;
                }
            }
            let haystacks = ["sourceCode", "summary", "javadoc"];
            let hit = haystacks
                .iter()
                .filter_map(|key| node_prop(node, key))
                .any(|text| text.contains(&needle));
            if !hit {
                continue;
            }
            let mut row = serde_json::Map::new();
            row.insert("id".to_string(), Value::String(node.id.clone()));
            for (alias, key) in [
                ("chunk_type", "kind"),
                ("class_name", "className"),
                ("method_name", "methodName"),
                ("file_path", "filePath"),
                ("content", "sourceCode"),
            ] {
                if let Some(value) = node_prop(node, key) {
                    row.insert(alias.to_string(), Value::String(value.to_string()));
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn merge_node(&self, node: &GraphNode) -> Result<()> {
        let mut guard = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(&node.id) {
            Some(existing) => {
                existing.repository_id = node.repository_id.clone();
                for (key, value) in &node.properties {
                    existing.properties.insert(key.clone(), value.clone());
                }
            }
            None => {
                guard.insert(node.id.clone(), node.clone());
            }
        }
        Ok(())
    }

    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        if !nodes.contains_key(&edge.from_id) || !nodes.contains_key(&edge.to_id) {
            return Err(CoreError::StoreConsistency(format!(
                "missing endpoint for {} edge {} -> {}",
                edge.kind, edge.from_id, edge.to_id
            )));
        }
        drop(nodes);

        let mut edges = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        // duplicate (from, to, kind) collapses
        if !edges
            .iter()
            .any(|e| e.from_id == edge.from_id && e.to_id == edge.to_id && e.kind == edge.kind)
        {
            edges.push(edge.clone());
        }
        Ok(())
    }

    async fn delete_repository(&self, repository_id: &str) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let removed: Vec<String> = nodes
            .values()
            .filter(|n| n.repository_id == repository_id)
            .map(|n| n.id.clone())
            .collect();
        for id in &removed {
            nodes.remove(id);
        }
        drop(nodes);

        let mut edges = self.edges.write().unwrap_or_else(PoisonError::into_inner);
        edges.retain(|e| !removed.contains(&e.from_id) && !removed.contains(&e.to_id));
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }
}

pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Vec<WorkflowState>>>,
    messages: RwLock<HashMap<String, Vec<ConversationMessage>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save_snapshot(&self, state: &WorkflowState) -> Result<u64> {
        let mut guard = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let history = guard
            .entry(state.conversation_id.to_string())
            .or_default();
        history.push(state.clone());
        Ok(history.len() as u64)
    }

    async fn load_latest(&self, conversation_id: &ConversationId) -> Result<Option<WorkflowState>> {
        let guard = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(&conversation_id.to_string())
            .and_then(|history| history.last().cloned()))
    }

    async fn load_history(&self, conversation_id: &ConversationId) -> Result<Vec<WorkflowState>> {
        let guard = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(&conversation_id.to_string())
            .cloned()
            .unwrap_or_default())
    }

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<()> {
        let mut guard = self
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(conversation_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>> {
        let guard = self
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(&conversation_id.to_string())
            .cloned()
            .unwrap_or_default())
    }
}
