//! Strategy execution: semantic, metadata, graph, full-text and file-path
//! retrieval, merged into a bounded score-ordered bundle.

use codemend_common::llm::Embedder;
use codemend_common::{
    CodeContext, ContextBundle, CoreError, EntityKind, RelationshipKind, RequirementAnalysis,
    Result, RetrievalConfig, RetrievalPlan, RetrievalStrategy, StrategyType, INDEX_METADATA_TYPE,
};
use codemend_storage::{Filter, GraphStore, ScoredPoint, VectorIndex};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::planner::RetrievalPlanner;

/// Score assigned to graph / full-text hits, which carry no similarity score
const STRUCTURAL_HIT_SCORE: f32 = 0.5;

const FULL_TEXT_QUERY: &str = "MATCH (n {repositoryId: $repoName}) \
     WHERE n.sourceCode CONTAINS $needle OR n.summary CONTAINS $needle OR n.javadoc CONTAINS $needle \
     RETURN n.id AS id, n.kind AS chunk_type, n.className AS class_name, \
            n.methodName AS method_name, n.filePath AS file_path, n.sourceCode AS content \
     LIMIT $limit";

const ANNOTATION_QUERY: &str = "MATCH (n {repositoryId: $repoName})-[:ANNOTATED_BY]->(a) \
     WHERE a.name = $annotation \
     RETURN n.id AS id, n.kind AS chunk_type, n.className AS class_name, \
            n.methodName AS method_name, n.filePath AS file_path, n.sourceCode AS content \
     LIMIT $limit";

const CLASS_NAME_QUERY: &str = "MATCH (n {repositoryId: $repoName}) \
     WHERE n.className CONTAINS $needle \
     RETURN n.id AS id, n.kind AS chunk_type, n.className AS class_name, \
            n.methodName AS method_name, n.filePath AS file_path, n.sourceCode AS content \
     LIMIT $limit";

const PACKAGE_QUERY: &str = "MATCH (n {repositoryId: $repoName}) \
     WHERE n.fqn STARTS WITH $package \
     RETURN n.id AS id, n.kind AS chunk_type, n.className AS class_name, \
            n.methodName AS method_name, n.filePath AS file_path, n.sourceCode AS content \
     LIMIT $limit";

#[derive(Debug, Deserialize, Default)]
struct SemanticParams {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize, Default)]
struct MetadataParams {
    #[serde(default)]
    annotations: Vec<String>,
    #[serde(default)]
    class_name_contains: Option<String>,
    #[serde(default)]
    package: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GraphParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    relationship: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FullTextParams {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct FilePathParams {
    #[serde(default)]
    pattern: String,
}

pub struct RetrievalEngine {
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    planner: RetrievalPlanner,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        planner: RetrievalPlanner,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vectors,
            graph,
            embedder,
            planner,
            config,
        }
    }

    /// Plan, execute in priority order, merge by entity id keeping the best
    /// score, and truncate to the bundle cap. A failing strategy logs and is
    /// skipped; partial results are returned.
    pub async fn retrieve(
        &self,
        question: &str,
        analysis: Option<&RequirementAnalysis>,
        repo_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(RetrievalPlan, ContextBundle)> {
        let plan = self.planner.plan(question, analysis, repo_name).await;
        let bundle = self.execute(&plan, repo_name, cancel).await?;
        Ok((plan, bundle))
    }

    pub async fn execute(
        &self,
        plan: &RetrievalPlan,
        repo_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ContextBundle> {
        let mut merged: HashMap<String, CodeContext> = HashMap::new();

        for strategy in &plan.strategies {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let repos = if strategy.target_repos.is_empty() {
                vec![repo_name.to_string()]
            } else {
                strategy.target_repos.clone()
            };

            for repo in &repos {
                match self.execute_strategy(strategy, repo).await {
                    Ok(items) => {
                        debug!(
                            strategy = %strategy.strategy,
                            repo = %repo,
                            hits = items.len(),
                            "strategy executed"
                        );
                        for item in items {
                            merged
                                .entry(item.id.clone())
                                .and_modify(|existing| {
                                    if item.score > existing.score {
                                        *existing = item.clone();
                                    }
                                })
                                .or_insert(item);
                        }
                    }
                    Err(e) => {
                        warn!(strategy = %strategy.strategy, repo = %repo, error = %e,
                              "retrieval strategy failed, continuing");
                    }
                }
            }
        }

        let mut items: Vec<CodeContext> = merged.into_values().collect();
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        items.truncate(self.config.bundle_cap);
        Ok(ContextBundle { items })
    }

    async fn execute_strategy(
        &self,
        strategy: &RetrievalStrategy,
        repo: &str,
    ) -> Result<Vec<CodeContext>> {
        let limit = if strategy.max_results == 0 {
            self.config.default_top_k
        } else {
            strategy.max_results
        };
        match strategy.strategy {
            StrategyType::Semantic => self.semantic(&strategy.parameters, repo, limit).await,
            StrategyType::Metadata => self.metadata(&strategy.parameters, repo, limit).await,
            StrategyType::Graph => self.graph_query(&strategy.parameters, repo, limit).await,
            StrategyType::FullText => self.full_text(&strategy.parameters, repo, limit).await,
            StrategyType::FilePath => self.file_path(&strategy.parameters, repo, limit).await,
        }
    }

    async fn semantic(&self, params: &Value, repo: &str, limit: usize) -> Result<Vec<CodeContext>> {
        let params: SemanticParams = from_params(params)?;
        if params.query.is_empty() {
            return Err(CoreError::ModelOutput("semantic strategy without query".into()));
        }
        let embedded = self.embedder.embed(&[params.query]).await?;
        let vector = embedded
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Embedding("empty embedding batch".into()))?;
        let hits = self
            .vectors
            .query(Some(vector), &chunk_filter(repo), limit, true)
            .await?;
        Ok(hits.into_iter().map(scored_to_context).collect())
    }

    /// Typed parameter bag over structural metadata. Expressed as graph
    /// lookups (the vector backend only supports exact-match filters); an
    /// empty bag degrades to a filter-only vector scan.
    async fn metadata(&self, params: &Value, repo: &str, limit: usize) -> Result<Vec<CodeContext>> {
        let params: MetadataParams = from_params(params)?;
        let mut items = Vec::new();

        for annotation in &params.annotations {
            let rows = self
                .graph
                .run(
                    ANNOTATION_QUERY,
                    &[
                        ("repoName".to_string(), json!(repo)),
                        ("annotation".to_string(), json!(annotation)),
                        ("limit".to_string(), json!(limit)),
                    ],
                )
                .await?;
            items.extend(rows.iter().filter_map(row_to_context));
        }
        if let Some(needle) = &params.class_name_contains {
            let rows = self
                .graph
                .run(
                    CLASS_NAME_QUERY,
                    &[
                        ("repoName".to_string(), json!(repo)),
                        ("needle".to_string(), json!(needle)),
                        ("limit".to_string(), json!(limit)),
                    ],
                )
                .await?;
            items.extend(rows.iter().filter_map(row_to_context));
        }
        if let Some(package) = &params.package {
            let rows = self
                .graph
                .run(
                    PACKAGE_QUERY,
                    &[
                        ("repoName".to_string(), json!(repo)),
                        ("package".to_string(), json!(package)),
                        ("limit".to_string(), json!(limit)),
                    ],
                )
                .await?;
            items.extend(rows.iter().filter_map(row_to_context));
        }

        if params.annotations.is_empty()
            && params.class_name_contains.is_none()
            && params.package.is_none()
        {
            let hits = self
                .vectors
                .query(None, &chunk_filter(repo), limit, true)
                .await?;
            items.extend(hits.into_iter().map(scored_to_context));
        }

        items.truncate(limit);
        Ok(items)
    }

    /// Model-emitted graph query. `$repoName` is bound server-side; the only
    /// permitted text substitution is the `{relationship}` placeholder,
    /// validated against the closed RelationshipKind enum.
    async fn graph_query(&self, params: &Value, repo: &str, limit: usize) -> Result<Vec<CodeContext>> {
        let params: GraphParams = from_params(params)?;
        if params.query.is_empty() {
            return Err(CoreError::ModelOutput("graph strategy without query".into()));
        }

        let query = match &params.relationship {
            Some(raw_kind) => {
                let kind = RelationshipKind::from_str(raw_kind).map_err(|_| {
                    CoreError::ModelOutput(format!("unknown relationship kind: {raw_kind}"))
                })?;
                params.query.replace("{relationship}", &kind.to_string())
            }
            None if params.query.contains("{relationship}") => {
                return Err(CoreError::ModelOutput(
                    "relationship placeholder without a relationship parameter".into(),
                ));
            }
            None => params.query.clone(),
        };

        let rows = self
            .graph
            .run(
                &query,
                &[
                    ("repoName".to_string(), json!(repo)),
                    ("limit".to_string(), json!(limit)),
                ],
            )
            .await?;
        Ok(rows.iter().filter_map(row_to_context).take(limit).collect())
    }

    async fn full_text(&self, params: &Value, repo: &str, limit: usize) -> Result<Vec<CodeContext>> {
        let params: FullTextParams = from_params(params)?;
        if params.text.is_empty() {
            return Err(CoreError::ModelOutput("fullText strategy without text".into()));
        }
        let rows = self
            .graph
            .run(
                FULL_TEXT_QUERY,
                &[
                    ("repoName".to_string(), json!(repo)),
                    ("needle".to_string(), json!(params.text)),
                    ("limit".to_string(), json!(limit)),
                ],
            )
            .await?;
        Ok(rows.iter().filter_map(row_to_context).take(limit).collect())
    }

    /// Regex-matched path filter over the repository's chunks
    async fn file_path(&self, params: &Value, repo: &str, limit: usize) -> Result<Vec<CodeContext>> {
        let params: FilePathParams = from_params(params)?;
        let pattern = regex::Regex::new(&params.pattern)
            .map_err(|e| CoreError::ModelOutput(format!("bad path pattern: {e}")))?;

        let hits = self
            .vectors
            .query(None, &chunk_filter(repo), self.config.bundle_cap * 20, true)
            .await?;
        Ok(hits
            .into_iter()
            .filter(|hit| {
                hit.payload_str("file_path")
                    .map(|path| pattern.is_match(path))
                    .unwrap_or(false)
            })
            .map(scored_to_context)
            .take(limit)
            .collect())
    }
}

fn chunk_filter(repo: &str) -> Filter {
    Filter::new()
        .must_eq("repo_name", repo)
        .must_ne("type", INDEX_METADATA_TYPE)
}

fn from_params<T: Default + for<'de> Deserialize<'de>>(params: &Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| CoreError::ModelOutput(format!("bad strategy parameters: {e}")))
}

fn scored_to_context(hit: ScoredPoint) -> CodeContext {
    CodeContext {
        chunk_type: hit
            .payload_str("chunk_type")
            .and_then(|raw| EntityKind::from_str(raw).ok())
            .unwrap_or(EntityKind::Class),
        class_name: hit.payload_str("class_name").map(str::to_string),
        method_name: hit.payload_str("method_name").map(str::to_string),
        file_path: hit.payload_str("file_path").unwrap_or_default().to_string(),
        content: hit.payload_str("content").unwrap_or_default().to_string(),
        score: hit.score,
        id: hit.id,
    }
}

fn row_to_context(row: &serde_json::Map<String, Value>) -> Option<CodeContext> {
    let id = row.get("id").and_then(Value::as_str)?.to_string();
    let get = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
    Some(CodeContext {
        id,
        score: STRUCTURAL_HIT_SCORE,
        chunk_type: get("chunk_type")
            .and_then(|raw| EntityKind::from_str(&raw).ok())
            .unwrap_or(EntityKind::Class),
        class_name: get("class_name"),
        method_name: get("method_name"),
        file_path: get("file_path").unwrap_or_default(),
        content: get("content").unwrap_or_default(),
    })
}
