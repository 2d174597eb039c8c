//! SQLite-backed metadata and chat stores.
//!
//! Both live in the metadata database. [`SqliteMetadataStore`] holds the
//! `chunks`, `index_info` and `reconcile_leases` tables; [`SqliteChatStore`]
//! holds `chat_sessions` and `chat_messages`.
//!
//! Every write transaction opens with a write statement. Under WAL a
//! transaction that reads first and then writes fails with `SQLITE_BUSY`
//! when another connection holds the write lock, without waiting out the
//! busy timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use repo_chat_core::models::{
    ChatMessage, ChatSession, Citation, IndexInfo, IndexedChunkRecord,
};
use repo_chat_core::store::{ChatStore, ChunkMetadataStore};
use repo_chat_core::RepoChatError;

// ─── Metadata ───────────────────────────────────────────────────────

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ids of every project with chunk records or index info.
    pub async fn project_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT project_id FROM chunks UNION SELECT project_id FROM index_info ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<IndexedChunkRecord> {
    let kind: String = row.try_get("kind")?;
    Ok(IndexedChunkRecord {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        file_path: row.try_get("file_path")?,
        kind: kind.parse()?,
        start_line: row.try_get::<i64, _>("start_line")? as u32,
        end_line: row.try_get::<i64, _>("end_line")? as u32,
        language: row.try_get("language")?,
        content_hash: row.try_get("content_hash")?,
        indexed_at: row.try_get("indexed_at")?,
    })
}

#[async_trait]
impl ChunkMetadataStore for SqliteMetadataStore {
    async fn list(&self, project_id: &str) -> Result<Vec<IndexedChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, id, file_path, kind, start_line, end_line,
                   language, content_hash, indexed_at
            FROM chunks
            WHERE project_id = ?
            ORDER BY file_path, start_line, id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn upsert(&self, records: &[IndexedChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO chunks (project_id, id, file_path, kind, start_line, end_line,
                                    language, content_hash, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(project_id, id) DO UPDATE SET
                    file_path = excluded.file_path,
                    kind = excluded.kind,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    language = excluded.language,
                    content_hash = excluded.content_hash,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&r.project_id)
            .bind(&r.id)
            .bind(&r.file_path)
            .bind(r.kind.as_str())
            .bind(r.start_line as i64)
            .bind(r.end_line as i64)
            .bind(&r.language)
            .bind(&r.content_hash)
            .bind(r.indexed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM chunks WHERE project_id = ? AND id = ?")
                .bind(project_id)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn clear_project(&self, project_id: &str) -> Result<usize> {
        let res = sqlx::query("DELETE FROM chunks WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() as usize)
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn get_index_info(&self, project_id: &str) -> Result<Option<IndexInfo>> {
        let row = sqlx::query(
            r#"
            SELECT project_id, model, dims, status, last_error, last_reconciled_at
            FROM index_info WHERE project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(IndexInfo {
            project_id: row.try_get("project_id")?,
            model: row.try_get("model")?,
            dims: row.try_get::<i64, _>("dims")? as usize,
            status: status.parse()?,
            last_error: row.try_get("last_error")?,
            last_reconciled_at: row.try_get("last_reconciled_at")?,
        }))
    }

    async fn put_index_info(&self, info: &IndexInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_info (project_id, model, dims, status, last_error, last_reconciled_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                status = excluded.status,
                last_error = excluded.last_error,
                last_reconciled_at = excluded.last_reconciled_at
            "#,
        )
        .bind(&info.project_id)
        .bind(&info.model)
        .bind(info.dims as i64)
        .bind(info.status.as_str())
        .bind(&info.last_error)
        .bind(info.last_reconciled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acquire_lease(
        &self,
        project_id: &str,
        holder: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool> {
        // A single statement, so two processes cannot both win.
        let res = sqlx::query(
            r#"
            INSERT INTO reconcile_leases (project_id, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE reconcile_leases.holder = excluded.holder
               OR reconcile_leases.expires_at <= ?
            "#,
        )
        .bind(project_id)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn release_lease(&self, project_id: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM reconcile_leases WHERE project_id = ? AND holder = ?")
            .bind(project_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ─── Chat ───────────────────────────────────────────────────────────

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, project_id, title, status, is_active, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, sources_json, created_at";

fn session_from_row(row: &SqliteRow) -> Result<ChatSession> {
    let status: String = row.try_get("status")?;
    Ok(ChatSession {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        title: row.try_get("title")?,
        status: status.parse()?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.try_get("role")?;
    let sources_json: String = row.try_get("sources_json")?;
    let sources: Vec<Citation> =
        serde_json::from_str(&sources_json).context("decoding message sources")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: role.parse()?,
        content: row.try_get("content")?,
        sources,
        created_at: row.try_get("created_at")?,
    })
}

const UPSERT_SESSION: &str = r#"
    INSERT INTO chat_sessions (id, project_id, title, status, is_active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        status = excluded.status,
        is_active = excluded.is_active,
        updated_at = excluded.updated_at
"#;

/// Insert or update a session row, then move the project's active flag to
/// it if set. With `unless_archived`, an archived row is left untouched
/// and `false` is returned.
async fn write_session(
    tx: &mut Transaction<'_, Sqlite>,
    s: &ChatSession,
    unless_archived: bool,
) -> Result<bool> {
    let sql = if unless_archived {
        format!("{} WHERE chat_sessions.status != 'archived'", UPSERT_SESSION)
    } else {
        UPSERT_SESSION.to_string()
    };
    let written = sqlx::query(&sql)
        .bind(&s.id)
        .bind(&s.project_id)
        .bind(&s.title)
        .bind(s.status.as_str())
        .bind(s.is_active as i64)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut **tx)
        .await?
        .rows_affected()
        > 0;
    if !written {
        return Ok(false);
    }

    if s.is_active {
        sqlx::query("UPDATE chat_sessions SET is_active = 0 WHERE project_id = ? AND id != ?")
            .bind(&s.project_id)
            .bind(&s.id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(true)
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let sql = format!("SELECT {} FROM chat_sessions WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<ChatSession>> {
        let sql = format!(
            "SELECT {} FROM chat_sessions WHERE project_id = ? ORDER BY updated_at DESC, id",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn save_session(&self, session: &ChatSession) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_session(&mut tx, session, false).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? ORDER BY created_at, seq",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? \
             ORDER BY created_at DESC, seq DESC LIMIT ?",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn commit_turn(&self, session: &ChatSession, messages: &[ChatMessage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !write_session(&mut tx, session, true).await? {
            // Archived while the turn was being generated.
            return Err(
                RepoChatError::validation(format!("session {} is archived", session.id)).into(),
            );
        }
        for m in messages {
            let sources_json = serde_json::to_string(&m.sources)?;
            sqlx::query(
                r#"
                INSERT INTO chat_messages (id, session_id, role, content, sources_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&m.id)
            .bind(&m.session_id)
            .bind(m.role.as_str())
            .bind(&m.content)
            .bind(&sources_json)
            .bind(m.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
