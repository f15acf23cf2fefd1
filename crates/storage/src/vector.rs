//! Vector index contract: upsert, filtered delete, per-id fetch, query.

use async_trait::async_trait;
use codemend_common::Result;
use serde_json::Value;

/// A vector with its payload metadata
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Map<String, Value>,
}

impl VectorPoint {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Query hit, ordered by score descending
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Map<String, Value>,
}

impl ScoredPoint {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Eq(String, Value),
    Ne(String, Value),
}

/// Conjunction of payload conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<FieldCondition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(FieldCondition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn must_ne(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(FieldCondition::Ne(field.to_string(), value.into()));
        self
    }

    /// True when every condition holds for the payload
    pub fn matches(&self, payload: &serde_json::Map<String, Value>) -> bool {
        self.conditions.iter().all(|condition| match condition {
            FieldCondition::Eq(field, value) => payload.get(field) == Some(value),
            FieldCondition::Ne(field, value) => payload.get(field) != Some(value),
        })
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upsert points; rejects vectors whose dimension differs from the
    /// deployment's pinned dimension.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    async fn delete_by_filter(&self, filter: &Filter) -> Result<()>;

    async fn count(&self, filter: &Filter) -> Result<usize>;

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<VectorPoint>>;

    /// `vector = None` runs a pure metadata scan (filter-only)
    async fn query(
        &self,
        vector: Option<Vec<f32>>,
        filter: &Filter,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredPoint>>;

    fn dimension(&self) -> usize;
}
