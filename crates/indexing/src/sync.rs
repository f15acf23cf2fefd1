//! Incremental sync from a working copy into the vector index and code graph.
//!
//! The per-repository IndexState marker lives inside the vector index, so a
//! fresh process recovers the last synced commit without any other store.
//! File-level delete-then-upsert is not transactional; a crash between the
//! two is healed by the next sync because the IndexState commit only
//! advances at the very end.

use chrono::{DateTime, Utc};
use codemend_common::llm::Embedder;
use codemend_common::{
    ChangeType, ChangedFile, CodeEntity, CoreError, IndexState, IndexingConfig, RepoKey, Result,
    SyncOutcome, SyncReport, INDEX_METADATA_TYPE,
};
use codemend_storage::{Filter, GraphEdge, GraphNode, GraphStore, NodeLabel, VectorIndex, VectorPoint};
use codemend_workspace::manager::is_source_file;
use codemend_workspace::WorkingCopyManager;
use git2::Repository;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunks::{build_description, chunk_payload};
use crate::parser::{ParsedFile, SourceParser};

pub struct KnowledgeIndexer {
    vectors: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    parser: Arc<dyn SourceParser>,
    config: IndexingConfig,
}

impl KnowledgeIndexer {
    pub fn new(
        vectors: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        parser: Arc<dyn SourceParser>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            vectors,
            graph,
            embedder,
            parser,
            config,
        }
    }

    /// Bring the stores in line with the working copy's HEAD.
    pub async fn sync(
        &self,
        manager: &WorkingCopyManager,
        repo: &Repository,
        key: &RepoKey,
    ) -> Result<SyncReport> {
        self.sync_inner(manager, repo, key, false).await
    }

    /// Wipe the repository's code vectors and graph nodes (IndexState is
    /// preserved), then run the full-index path.
    pub async fn force_reindex(
        &self,
        manager: &WorkingCopyManager,
        repo: &Repository,
        key: &RepoKey,
    ) -> Result<SyncReport> {
        self.sync_inner(manager, repo, key, true).await
    }

    async fn sync_inner(
        &self,
        manager: &WorkingCopyManager,
        repo: &Repository,
        key: &RepoKey,
        force: bool,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let repo_name = key.name();
        let head = manager.head_commit(repo)?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| CoreError::WorkingCopy("bare repository has no workdir".into()))?;

        let state = if force {
            None
        } else {
            self.fetch_index_state(&repo_name).await?
        };

        let (outcome, changed_files) = match &state {
            Some(state) if state.last_indexed_commit == head => {
                info!(repo = %repo_name, commit = %head, "index already current");
                return Ok(SyncReport::unchanged());
            }
            Some(state) => {
                let changes = manager
                    .diff_commits(repo, &state.last_indexed_commit, &head)?
                    .into_iter()
                    .filter(|change| is_source_file(&change.relative_path, &self.config))
                    .collect::<Vec<_>>();
                (SyncOutcome::Incremental, changes)
            }
            None => {
                if force {
                    self.delete_repository_data(&repo_name).await?;
                }
                let outcome = if force {
                    SyncOutcome::ForcedFull
                } else {
                    SyncOutcome::InitialFull
                };
                (outcome, self.walk_source_files(workdir))
            }
        };

        info!(
            repo = %repo_name,
            outcome = %outcome,
            files = changed_files.len(),
            "starting sync"
        );

        let mut chunks_deleted = 0usize;
        let mut chunks_created = 0usize;
        let mut files_analyzed = 0usize;
        let mut embed_ms = 0u64;
        let mut pending_points: Vec<VectorPoint> = Vec::new();
        let mut pending_relations = Vec::new();

        for change in &changed_files {
            // stale chunks for modified and deleted files go first; the
            // matching upsert follows within this same sync
            if matches!(change.change_type, ChangeType::Modify | ChangeType::Delete) {
                chunks_deleted += self
                    .delete_file_chunks(&repo_name, &change.relative_path)
                    .await?;
            }
            if matches!(change.change_type, ChangeType::Add | ChangeType::Modify) {
                files_analyzed += 1;
                let absolute = workdir.join(&change.relative_path);
                let source = std::fs::read_to_string(&absolute)?;
                let parsed = self
                    .parser
                    .parse(&repo_name, &change.relative_path, &source)?;

                let (points, file_embed_ms) = self.embed_entities(&parsed).await?;
                embed_ms += file_embed_ms;
                chunks_created += points.len();
                pending_points.extend(points);

                self.mirror_nodes(&repo_name, &parsed).await?;
                pending_relations.extend(parsed.relations);
            }
        }

        // batched, each batch an independent call
        for batch in pending_points.chunks(self.config.upsert_batch_size.max(1)) {
            self.vectors.upsert(batch.to_vec()).await?;
        }

        // edges after all nodes exist; missing endpoints drop silently
        for relation in pending_relations {
            let edge = GraphEdge::new(relation.from_id, relation.to_id, relation.kind);
            match self.graph.merge_edge(&edge).await {
                Ok(()) => {}
                Err(CoreError::StoreConsistency(message)) => {
                    debug!(%message, "dropped dangling edge");
                }
                Err(other) => return Err(other),
            }
        }

        self.merge_repository_node(key, &repo_name, &head).await?;

        let vector_count = self
            .vectors
            .count(&code_chunk_filter(&repo_name))
            .await?;
        self.write_index_state(
            &repo_name,
            &IndexState {
                last_indexed_commit: head.clone(),
                last_indexed_at: Utc::now(),
                vector_count,
            },
        )
        .await?;

        // eventual-consistency guard: confirm the marker is readable
        match self.fetch_index_state(&repo_name).await {
            Ok(Some(readback)) if readback.last_indexed_commit == head => {}
            Ok(_) => warn!(repo = %repo_name, "index state not yet visible after write"),
            Err(e) => warn!(repo = %repo_name, error = %e, "index state readback failed"),
        }

        let report = SyncReport {
            outcome,
            files_analyzed,
            files_changed: changed_files.len(),
            chunks_deleted,
            chunks_created,
            embed_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            repo = %repo_name,
            outcome = %report.outcome,
            files_changed = report.files_changed,
            chunks_deleted = report.chunks_deleted,
            chunks_created = report.chunks_created,
            total_ms = report.total_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Everything owned by the repository except its IndexState marker, which
    /// is the only trustworthy record of the last sync.
    pub async fn delete_repository_data(&self, repo_name: &str) -> Result<()> {
        self.vectors
            .delete_by_filter(&code_chunk_filter(repo_name))
            .await?;
        self.graph.delete_repository(repo_name).await?;
        info!(repo = %repo_name, "repository data deleted (index state preserved)");
        Ok(())
    }

    fn walk_source_files(&self, workdir: &Path) -> Vec<ChangedFile> {
        let source_root = workdir.join(&self.config.source_root);
        WalkDir::new(source_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry
                    .path()
                    .strip_prefix(workdir)
                    .ok()?
                    .to_string_lossy()
                    .replace('\\', "/");
                is_source_file(&relative, &self.config).then_some(ChangedFile {
                    relative_path: relative,
                    change_type: ChangeType::Add,
                })
            })
            .collect()
    }

    async fn delete_file_chunks(&self, repo_name: &str, file_path: &str) -> Result<usize> {
        let filter = Filter::new()
            .must_eq("repo_name", repo_name)
            .must_eq("file_path", file_path);
        let count = self.vectors.count(&filter).await?;
        if count > 0 {
            self.vectors.delete_by_filter(&filter).await?;
        }
        Ok(count)
    }

    async fn embed_entities(&self, parsed: &ParsedFile) -> Result<(Vec<VectorPoint>, u64)> {
        if parsed.entities.is_empty() {
            return Ok((vec![], 0));
        }
        let descriptions: Vec<String> = parsed.entities.iter().map(build_description).collect();
        let embed_started = Instant::now();
        let vectors = self.embedder.embed(&descriptions).await?;
        let embed_ms = embed_started.elapsed().as_millis() as u64;

        let points = parsed
            .entities
            .iter()
            .zip(vectors)
            .map(|(entity, vector)| VectorPoint {
                id: entity.id.clone(),
                vector,
                payload: chunk_payload(entity),
            })
            .collect();
        Ok((points, embed_ms))
    }

    async fn mirror_nodes(&self, repo_name: &str, parsed: &ParsedFile) -> Result<()> {
        for entity in &parsed.entities {
            self.graph.merge_node(&graph_node(repo_name, entity)).await?;
        }
        Ok(())
    }

    async fn merge_repository_node(&self, key: &RepoKey, repo_name: &str, head: &str) -> Result<()> {
        let node = GraphNode::new(NodeLabel::Repository, repo_name, repo_name)
            .with_property("url", key.url.clone())
            .with_property("branch", key.branch.clone())
            .with_property("language", "java")
            .with_property("lastIndexedCommit", head.to_string())
            .with_property("lastIndexedAt", Utc::now().to_rfc3339());
        self.graph.merge_node(&node).await
    }

    /// Fetch the IndexState marker. Server-side 5xx responses retry up to 3
    /// times with 2s/4s/8s backoff; every other error surfaces immediately.
    pub async fn fetch_index_state(&self, repo_name: &str) -> Result<Option<IndexState>> {
        let point_id = IndexState::point_id(repo_name);
        let mut attempt = 1u32;
        let points = loop {
            match self.vectors.fetch_by_ids(&[point_id.clone()]).await {
                Ok(points) => break points,
                Err(err) if err.is_server_error() && attempt < 3 => {
                    let delay = Duration::from_secs(2u64 << (attempt - 1));
                    warn!(
                        repo = %repo_name,
                        attempt,
                        error = %err,
                        delay_s = delay.as_secs(),
                        "index state fetch hit server error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let Some(point) = points.into_iter().next() else {
            return Ok(None);
        };
        match parse_index_state(&point) {
            Some(state) => Ok(Some(state)),
            None => {
                warn!(repo = %repo_name, "malformed index state payload, treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_index_state(&self, repo_name: &str, state: &IndexState) -> Result<()> {
        // some index stores reject all-zero vectors, so the marker body is a
        // small non-zero constant at the native dimension
        let placeholder = vec![1e-3_f32; self.vectors.dimension()];
        let point = VectorPoint {
            id: IndexState::point_id(repo_name),
            vector: placeholder,
            payload: serde_json::Map::from_iter([
                ("repo_name".to_string(), json!(repo_name)),
                ("type".to_string(), json!(INDEX_METADATA_TYPE)),
                (
                    "last_indexed_commit".to_string(),
                    json!(state.last_indexed_commit),
                ),
                (
                    "last_indexed_at".to_string(),
                    json!(state.last_indexed_at.to_rfc3339()),
                ),
                ("vector_count".to_string(), json!(state.vector_count)),
            ]),
        };
        self.vectors.upsert(vec![point]).await
    }
}

fn code_chunk_filter(repo_name: &str) -> Filter {
    Filter::new()
        .must_eq("repo_name", repo_name)
        .must_ne("type", INDEX_METADATA_TYPE)
}

fn parse_index_state(point: &VectorPoint) -> Option<IndexState> {
    let commit = point.payload_str("last_indexed_commit")?.to_string();
    let at = point
        .payload_str("last_indexed_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))?;
    let vector_count = point
        .payload
        .get("vector_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    Some(IndexState {
        last_indexed_commit: commit,
        last_indexed_at: at,
        vector_count,
    })
}

fn graph_node(repo_name: &str, entity: &CodeEntity) -> GraphNode {
    let mut node = GraphNode::new(NodeLabel::from(entity.kind), &entity.id, repo_name)
        .with_property("name", entity.name.clone())
        .with_property("fqn", entity.fqn.clone())
        .with_property("kind", entity.kind.to_string())
        .with_property("filePath", entity.file_path.clone())
        .with_property("lineStart", entity.line_start as i64)
        .with_property("lineEnd", entity.line_end as i64)
        .with_property("sourceCode", entity.source.clone());
    if let Some(summary) = &entity.summary {
        node = node.with_property("summary", summary.clone());
    }
    if let Some(class_name) = crate::chunks::class_name_of(entity) {
        node = node.with_property("className", class_name);
    }
    if matches!(
        entity.kind,
        codemend_common::EntityKind::Method | codemend_common::EntityKind::Constructor
    ) {
        node = node.with_property("methodName", entity.name.clone());
    }
    if !entity.annotations.is_empty() {
        node = node.with_property("annotations", json!(entity.annotations));
    }
    node
}
