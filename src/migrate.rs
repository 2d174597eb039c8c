//! Idempotent schema setup for both databases.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create every table in both databases. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_metadata(&pool).await?;
    pool.close().await;

    let pool = db::connect_vectors(config).await?;
    migrate_vectors(&pool).await?;
    pool.close().await;

    Ok(())
}

pub async fn migrate_metadata(pool: &SqlitePool) -> Result<()> {
    // Chunk records: what is safely indexed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            project_id TEXT NOT NULL,
            id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT,
            content_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (project_id, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_info (
            project_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            status TEXT NOT NULL,
            last_error TEXT,
            last_reconciled_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per project while a reconcile run holds it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_leases (
            project_id TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // seq breaks created_at ties in insertion order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            sources_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_project_path ON chunks(project_id, file_path, start_line)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_project ON chat_sessions(project_id, updated_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id, created_at, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            project_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            file_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT,
            content TEXT NOT NULL,
            PRIMARY KEY (project_id, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_project_path ON vectors(project_id, file_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
