//! Code graph store contract.
//!
//! Query discipline: the only values ever interpolated into query text are
//! the closed `NodeLabel` and `RelationshipKind` enums (labels and
//! relationship types cannot be parameterized in Cypher); every other value
//! travels as a named parameter.

use async_trait::async_trait;
use codemend_common::{EntityKind, RelationshipKind, Result};
use serde_json::Value;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum NodeLabel {
    Repository,
    Type,
    Method,
    Field,
    Annotation,
}

impl From<EntityKind> for NodeLabel {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Class | EntityKind::Interface | EntityKind::Enum => Self::Type,
            EntityKind::Method | EntityKind::Constructor => Self::Method,
            EntityKind::Field => Self::Field,
            EntityKind::Annotation => Self::Annotation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub label: NodeLabel,
    pub id: String,
    pub repository_id: String,
    pub properties: serde_json::Map<String, Value>,
}

impl GraphNode {
    pub fn new(label: NodeLabel, id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        Self {
            label,
            id: id.into(),
            repository_id: repository_id.into(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub from_id: String,
    pub to_id: String,
    pub kind: RelationshipKind,
    pub properties: serde_json::Map<String, Value>,
}

impl GraphEdge {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            properties: serde_json::Map::new(),
        }
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute a parameterized read query, returning one map per row.
    async fn run(&self, query: &str, params: &[(String, Value)]) -> Result<Vec<serde_json::Map<String, Value>>>;

    /// MERGE by node id; concurrent writers collapse into one node.
    async fn merge_node(&self, node: &GraphNode) -> Result<()>;

    /// MATCH-MATCH-MERGE; returns a `StoreConsistency` error when an endpoint
    /// is missing so the edge is never persisted dangling.
    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()>;

    /// Delete every node (and its edges) owned by one repository. Deletion is
    /// always repository-scoped; there is no global wipe.
    async fn delete_repository(&self, repository_id: &str) -> Result<()>;

    async fn ensure_schema(&self) -> Result<()>;
}
