//! Qdrant-backed vector index.
//!
//! Qdrant point ids must be UUIDs or integers, so logical string ids (entity
//! hashes, the `__metadata__:...` marker) are mapped to deterministic UUIDv5
//! ids, with the raw id mirrored into the payload under `id`.

use async_trait::async_trait;
use codemend_common::{CoreError, Result};
use qdrant_client::qdrant::{
    value::Kind, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder,
    Distance, Filter as QdrantFilter, GetPointsBuilder, PointId, PointStruct, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::vector::{FieldCondition, Filter, ScoredPoint, VectorIndex, VectorPoint};

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| map_qdrant("connect", e))?;

        let index = Self {
            client,
            collection: collection.to_string(),
            dimension,
        };
        index.ensure_collection().await?;
        Ok(index)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| map_qdrant("collection_exists", e))?;
        if !exists {
            info!(collection = %self.collection, dimension = self.dimension, "creating collection");
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| map_qdrant("create_collection", e))?;
        }
        Ok(())
    }

    /// Deterministic UUIDv5 for a logical string id
    pub fn point_uuid(id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, id.as_bytes()).to_string()
    }

    fn to_qdrant_filter(filter: &Filter) -> Result<QdrantFilter> {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        for condition in &filter.conditions {
            match condition {
                FieldCondition::Eq(field, value) => must.push(to_condition(field, value)?),
                FieldCondition::Ne(field, value) => must_not.push(to_condition(field, value)?),
            }
        }
        Ok(QdrantFilter {
            must,
            must_not,
            ..Default::default()
        })
    }
}

fn to_condition(field: &str, value: &Value) -> Result<Condition> {
    match value {
        Value::String(s) => Ok(Condition::matches(field, s.clone())),
        Value::Number(n) if n.is_i64() => {
            Ok(Condition::matches(field, n.as_i64().unwrap_or_default()))
        }
        Value::Bool(b) => Ok(Condition::matches(field, *b)),
        other => Err(CoreError::VectorStore(format!(
            "unsupported filter value for {field}: {other}"
        ))),
    }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::json!(d),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(qdrant_value_to_json)
                .collect(),
        ),
        Some(Kind::StructValue(fields)) => Value::Object(
            fields
                .fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

fn payload_to_json(
    payload: std::collections::HashMap<String, qdrant_client::qdrant::Value>,
) -> serde_json::Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect()
}

fn logical_id(payload: &serde_json::Map<String, Value>, point_id: Option<&PointId>) -> String {
    if let Some(id) = payload.get("id").and_then(Value::as_str) {
        return id.to_string();
    }
    match point_id.and_then(|p| p.point_id_options.as_ref()) {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u.clone(),
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn map_qdrant(op: &str, err: QdrantError) -> CoreError {
    if let QdrantError::ResponseError { status } = &err {
        // tonic codes: 4 deadline, 8 resource-exhausted, 13 internal, 14 unavailable
        match status.code() as i32 {
            4 => return CoreError::Timeout(Duration::from_secs(0)),
            8 => return CoreError::RateLimited(format!("{op}: {}", status.message())),
            13 | 14 => {
                return CoreError::Upstream {
                    status: 503,
                    message: format!("{op}: {}", status.message()),
                }
            }
            _ => {}
        }
    }
    CoreError::VectorStore(format!("{op}: {err}"))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            if point.vector.len() != self.dimension {
                return Err(CoreError::VectorStore(format!(
                    "dimension mismatch on upsert of {}: got {}, pinned {}",
                    point.id,
                    point.vector.len(),
                    self.dimension
                )));
            }
            let mut payload = point.payload;
            payload.insert("id".to_string(), Value::String(point.id.clone()));
            let payload = Payload::try_from(Value::Object(payload))
                .map_err(|e| CoreError::VectorStore(format!("payload for {}: {e}", point.id)))?;
            structs.push(PointStruct::new(
                Self::point_uuid(&point.id),
                point.vector,
                payload,
            ));
        }

        debug!(count = structs.len(), collection = %self.collection, "upserting points");
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true))
            .await
            .map_err(|e| map_qdrant("upsert", e))?;
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &Filter) -> Result<()> {
        let qdrant_filter = Self::to_qdrant_filter(filter)?;
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(qdrant_filter)
                    .wait(true),
            )
            .await
            .map_err(|e| map_qdrant("delete_by_filter", e))?;
        Ok(())
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        let qdrant_filter = Self::to_qdrant_filter(filter)?;
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(qdrant_filter)
                    .exact(true),
            )
            .await
            .map_err(|e| map_qdrant("count", e))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<VectorPoint>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let point_ids: Vec<PointId> = ids
            .iter()
            .map(|id| PointId::from(Self::point_uuid(id)))
            .collect();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, point_ids)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .map_err(|e| map_qdrant("fetch_by_ids", e))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let payload = payload_to_json(point.payload);
                let id = logical_id(&payload, point.id.as_ref());
                VectorPoint {
                    id,
                    vector: vec![],
                    payload,
                }
            })
            .collect())
    }

    async fn query(
        &self,
        vector: Option<Vec<f32>>,
        filter: &Filter,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<ScoredPoint>> {
        let qdrant_filter = Self::to_qdrant_filter(filter)?;
        match vector {
            Some(vector) => {
                if vector.len() != self.dimension {
                    return Err(CoreError::VectorStore(format!(
                        "query dimension mismatch: got {}, pinned {}",
                        vector.len(),
                        self.dimension
                    )));
                }
                let response = self
                    .client
                    .search_points(
                        SearchPointsBuilder::new(&self.collection, vector, top_k as u64)
                            .filter(qdrant_filter)
                            .with_payload(include_metadata),
                    )
                    .await
                    .map_err(|e| map_qdrant("search", e))?;
                Ok(response
                    .result
                    .into_iter()
                    .map(|point| {
                        let payload = payload_to_json(point.payload);
                        let id = logical_id(&payload, point.id.as_ref());
                        ScoredPoint {
                            id,
                            score: point.score,
                            payload,
                        }
                    })
                    .collect())
            }
            // Filter-only scan; qdrant expresses this as a scroll
            None => {
                let response = self
                    .client
                    .scroll(
                        ScrollPointsBuilder::new(&self.collection)
                            .filter(qdrant_filter)
                            .limit(top_k as u32)
                            .with_payload(include_metadata),
                    )
                    .await
                    .map_err(|e| map_qdrant("scroll", e))?;
                Ok(response
                    .result
                    .into_iter()
                    .map(|point| {
                        let payload = payload_to_json(point.payload);
                        let id = logical_id(&payload, point.id.as_ref());
                        ScoredPoint {
                            id,
                            score: 0.0,
                            payload,
                        }
                    })
                    .collect())
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_uuid_is_deterministic() {
        let a = QdrantIndex::point_uuid("__metadata__:repo:index_state");
        let b = QdrantIndex::point_uuid("__metadata__:repo:index_state");
        assert_eq!(a, b);
        assert_ne!(a, QdrantIndex::point_uuid("other"));
    }

    #[test]
    fn filter_splits_must_and_must_not() {
        let filter = Filter::new()
            .must_eq("repo_name", "r")
            .must_ne("type", "INDEX_METADATA");
        let qdrant_filter = QdrantIndex::to_qdrant_filter(&filter).unwrap();
        assert_eq!(qdrant_filter.must.len(), 1);
        assert_eq!(qdrant_filter.must_not.len(), 1);
    }

    #[test]
    fn unsupported_filter_value_rejected() {
        let filter = Filter::new().must_eq("x", serde_json::json!({"nested": true}));
        assert!(QdrantIndex::to_qdrant_filter(&filter).is_err());
    }
}
