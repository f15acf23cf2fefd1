//! Workflow snapshot and conversation-log persistence.
//!
//! Snapshots are append-only and sequence-numbered per conversation; the
//! latest row is the durable source of truth, the full sequence is the audit
//! trail.

use async_trait::async_trait;
use codemend_common::{ConversationId, ConversationMessage, CoreError, Result, WorkflowState};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a new snapshot, returning its sequence number.
    async fn save_snapshot(&self, state: &WorkflowState) -> Result<u64>;

    async fn load_latest(&self, conversation_id: &ConversationId) -> Result<Option<WorkflowState>>;

    /// Full snapshot history in sequence order.
    async fn load_history(&self, conversation_id: &ConversationId) -> Result<Vec<WorkflowState>>;

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<()>;

    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>>;
}

pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::Snapshot(format!("connect: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_snapshots (
                conversation_id TEXT        NOT NULL,
                seq             BIGINT      NOT NULL,
                status          TEXT        NOT NULL,
                payload         JSONB       NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (conversation_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("migrate snapshots: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_messages (
                id              BIGSERIAL   PRIMARY KEY,
                conversation_id TEXT        NOT NULL,
                role            TEXT        NOT NULL,
                content         TEXT        NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("migrate messages: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS conversation_messages_cid
             ON conversation_messages (conversation_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("migrate message index: {e}")))?;

        info!("snapshot store schema ensured");
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn save_snapshot(&self, state: &WorkflowState) -> Result<u64> {
        let payload = serde_json::to_value(state)?;
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_snapshots (conversation_id, seq, status, payload)
            SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3
            FROM workflow_snapshots WHERE conversation_id = $1
            RETURNING seq
            "#,
        )
        .bind(state.conversation_id.to_string())
        .bind(state.status.to_string())
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("save: {e}")))?;

        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| CoreError::Snapshot(format!("save seq: {e}")))?;
        Ok(seq as u64)
    }

    async fn load_latest(&self, conversation_id: &ConversationId) -> Result<Option<WorkflowState>> {
        let row = sqlx::query(
            "SELECT payload FROM workflow_snapshots
             WHERE conversation_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("load_latest: {e}")))?;

        match row {
            Some(row) => {
                let payload: serde_json::Value = row
                    .try_get("payload")
                    .map_err(|e| CoreError::Snapshot(format!("load_latest payload: {e}")))?;
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }

    async fn load_history(&self, conversation_id: &ConversationId) -> Result<Vec<WorkflowState>> {
        let rows = sqlx::query(
            "SELECT payload FROM workflow_snapshots
             WHERE conversation_id = $1 ORDER BY seq ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("load_history: {e}")))?;

        let mut states = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row
                .try_get("payload")
                .map_err(|e| CoreError::Snapshot(format!("load_history payload: {e}")))?;
            states.push(serde_json::from_value(payload)?);
        }
        Ok(states)
    }

    async fn append_messages(
        &self,
        conversation_id: &ConversationId,
        messages: &[ConversationMessage],
    ) -> Result<()> {
        for message in messages {
            sqlx::query(
                "INSERT INTO conversation_messages (conversation_id, role, content, created_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(conversation_id.to_string())
            .bind(message.role.to_string())
            .bind(&message.content)
            .bind(message.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Snapshot(format!("append_messages: {e}")))?;
        }
        Ok(())
    }

    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM conversation_messages
             WHERE conversation_id = $1 ORDER BY id ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Snapshot(format!("load_messages: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row
                .try_get("role")
                .map_err(|e| CoreError::Snapshot(format!("load_messages role: {e}")))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| CoreError::Snapshot(format!("load_messages content: {e}")))?;
            let created_at: chrono::DateTime<chrono::Utc> = row
                .try_get("created_at")
                .map_err(|e| CoreError::Snapshot(format!("load_messages timestamp: {e}")))?;
            let role = serde_json::from_value(serde_json::Value::String(role.to_lowercase()))?;
            messages.push(ConversationMessage {
                role,
                content,
                timestamp: created_at,
            });
        }
        Ok(messages)
    }
}
