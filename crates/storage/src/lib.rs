//! Store contracts consumed by the core, with Qdrant / Neo4j / Postgres
//! implementations and in-memory fakes for tests and ephemeral runs.

pub mod graph;
pub mod memory;
pub mod neo4j;
pub mod qdrant;
pub mod snapshot;
pub mod vector;

pub use graph::{GraphEdge, GraphNode, GraphStore, NodeLabel};
pub use memory::{MemoryGraphStore, MemorySnapshotStore, MemoryVectorIndex};
pub use snapshot::SnapshotStore;
pub use vector::{FieldCondition, Filter, ScoredPoint, VectorIndex, VectorPoint};

use codemend_common::{Result, StorageBackend, SystemConfig};
use std::sync::Arc;

/// The three shared stores, selected once at the composition root.
#[derive(Clone)]
pub struct Stores {
    pub vectors: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl Stores {
    pub async fn connect(config: &SystemConfig) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::External => {
                let vectors = qdrant::QdrantIndex::connect(
                    &config.storage.qdrant_url,
                    &config.storage.collection,
                    config.embedding.dimension,
                )
                .await?;
                let graph = neo4j::Neo4jGraphStore::connect(
                    &config.storage.neo4j_uri,
                    &config.storage.neo4j_user,
                    &config.storage.neo4j_password,
                )
                .await?;
                graph.ensure_schema().await?;
                let snapshots =
                    snapshot::PostgresSnapshotStore::connect(&config.storage.postgres_url).await?;
                Ok(Self {
                    vectors: Arc::new(vectors),
                    graph: Arc::new(graph),
                    snapshots: Arc::new(snapshots),
                })
            }
            StorageBackend::Ephemeral => Ok(Self::ephemeral(config.embedding.dimension)),
        }
    }

    pub fn ephemeral(dimension: usize) -> Self {
        Self {
            vectors: Arc::new(MemoryVectorIndex::new(dimension)),
            graph: Arc::new(MemoryGraphStore::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
        }
    }
}
