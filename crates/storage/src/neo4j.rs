//! Neo4j implementation of the code graph store.

use async_trait::async_trait;
use codemend_common::{CoreError, Result};
use neo4rs::{query, Graph, Query};
use serde_json::Value;
use tracing::{debug, info};

use crate::graph::{GraphEdge, GraphNode, GraphStore};

pub struct Neo4jGraphStore {
    graph: Graph,
}

/// Scalar parameter value; non-scalar JSON travels as a JSON string
enum ParamValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn to_param(value: &Value) -> Option<ParamValue> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(ParamValue::Text(s.clone())),
        Value::Bool(b) => Some(ParamValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(ParamValue::Int(i))
            } else {
                n.as_f64().map(ParamValue::Float)
            }
        }
        other => Some(ParamValue::Text(other.to_string())),
    }
}

fn bind(q: Query, key: &str, value: ParamValue) -> Query {
    match value {
        ParamValue::Text(s) => q.param(key, s),
        ParamValue::Int(i) => q.param(key, i),
        ParamValue::Float(f) => q.param(key, f),
        ParamValue::Bool(b) => q.param(key, b),
    }
}

fn map_neo4j(op: &str, err: neo4rs::Error) -> CoreError {
    CoreError::GraphStore(format!("{op}: {err}"))
}

impl Neo4jGraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| map_neo4j("connect", e))?;
        info!(uri, "connected to graph store");
        Ok(Self { graph })
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn run(&self, text: &str, params: &[(String, Value)]) -> Result<Vec<serde_json::Map<String, Value>>> {
        let mut q = query(text);
        for (key, value) in params {
            if let Some(param) = to_param(value) {
                q = bind(q, key, param);
            }
        }

        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| map_neo4j("run", e))?;

        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(|e| map_neo4j("run", e))? {
            let value: Value = row
                .to()
                .map_err(|e| CoreError::GraphStore(format!("row decode: {e}")))?;
            match value {
                Value::Object(map) => rows.push(map),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    rows.push(map);
                }
            }
        }
        Ok(rows)
    }

    async fn merge_node(&self, node: &GraphNode) -> Result<()> {
        // Label comes from the closed NodeLabel enum; property keys are
        // compile-time constants from the indexer. Values are parameters.
        let mut text = format!(
            "MERGE (n:{} {{id: $id}}) SET n.repositoryId = $repositoryId",
            node.label
        );
        let mut bindings = Vec::new();
        for (i, (key, value)) in node.properties.iter().enumerate() {
            if key.contains('`') {
                return Err(CoreError::GraphStore(format!("bad property key: {key}")));
            }
            if let Some(param) = to_param(value) {
                let name = format!("p{i}");
                text.push_str(&format!(", n.`{key}` = ${name}"));
                bindings.push((name, param));
            }
        }

        let mut q = query(&text)
            .param("id", node.id.clone())
            .param("repositoryId", node.repository_id.clone());
        for (name, param) in bindings {
            q = bind(q, &name, param);
        }

        self.graph
            .run(q)
            .await
            .map_err(|e| map_neo4j("merge_node", e))?;
        Ok(())
    }

    async fn merge_edge(&self, edge: &GraphEdge) -> Result<()> {
        // Relationship kind is the single permitted interpolation (closed enum)
        let text = format!(
            "MATCH (a {{id: $from}}) MATCH (b {{id: $to}}) MERGE (a)-[r:{}]->(b) RETURN type(r) AS kind",
            edge.kind
        );
        let q = query(&text)
            .param("from", edge.from_id.clone())
            .param("to", edge.to_id.clone());

        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| map_neo4j("merge_edge", e))?;
        match stream.next().await.map_err(|e| map_neo4j("merge_edge", e))? {
            Some(_) => Ok(()),
            // No row means one MATCH found nothing: endpoint missing, edge not written
            None => Err(CoreError::StoreConsistency(format!(
                "missing endpoint for {} edge {} -> {}",
                edge.kind, edge.from_id, edge.to_id
            ))),
        }
    }

    async fn delete_repository(&self, repository_id: &str) -> Result<()> {
        debug!(repository_id, "repository-scoped graph delete");
        let q = query("MATCH (n {repositoryId: $repositoryId}) DETACH DELETE n")
            .param("repositoryId", repository_id.to_string());
        self.graph
            .run(q)
            .await
            .map_err(|e| map_neo4j("delete_repository", e))?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        const STATEMENTS: [&str; 6] = [
            "CREATE CONSTRAINT repository_id IF NOT EXISTS FOR (r:Repository) REQUIRE r.id IS UNIQUE",
            "CREATE INDEX type_repository IF NOT EXISTS FOR (t:Type) ON (t.repositoryId)",
            "CREATE INDEX type_fqn IF NOT EXISTS FOR (t:Type) ON (t.fqn)",
            "CREATE INDEX method_name IF NOT EXISTS FOR (m:Method) ON (m.name)",
            "CREATE INDEX field_id IF NOT EXISTS FOR (f:Field) ON (f.id)",
            "CREATE INDEX annotation_fqn IF NOT EXISTS FOR (a:Annotation) ON (a.fqn)",
        ];
        for statement in STATEMENTS {
            self.graph
                .run(query(statement))
                .await
                .map_err(|e| map_neo4j("ensure_schema", e))?;
        }
        info!("graph schema ensured");
        Ok(())
    }
}
