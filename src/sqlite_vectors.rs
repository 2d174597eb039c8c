//! SQLite-backed [`VectorIndex`].
//!
//! Each point is one row of the `vectors` table in the vector database,
//! keyed by `(project_id, chunk_id)`, with its payload in plain columns and
//! the embedding as a little-endian f32 BLOB. Queries load the project's
//! candidate rows (narrowed by the SQL-expressible filters) and rank them
//! by brute-force cosine similarity.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use repo_chat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use repo_chat_core::models::{PointPayload, ScoredPoint, VectorPoint};
use repo_chat_core::store::memory::sort_scored;
use repo_chat_core::store::{QueryFilter, VectorIndex};
use repo_chat_core::RepoChatError;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn dims_mismatch(chunk_id: &str, got: usize, project: &str, expected: usize) -> anyhow::Error {
    RepoChatError::consistency(format!(
        "vector for chunk {} has {} dims, project {} stores {}",
        chunk_id, got, project, expected
    ))
    .into()
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        // Dims are checked before the transaction opens, so that its first
        // statement is a write and waits on the busy timeout instead of
        // failing to upgrade a read lock.
        let mut dims_by_project: HashMap<&str, usize> = HashMap::new();
        for p in points {
            let project = p.payload.project_id.as_str();
            let expected = match dims_by_project.get(project) {
                Some(d) => *d,
                None => {
                    let stored = self.dims(project).await?.unwrap_or(p.vector.len());
                    dims_by_project.insert(project, stored);
                    stored
                }
            };
            if p.vector.is_empty() || p.vector.len() != expected {
                return Err(dims_mismatch(&p.id, p.vector.len(), project, expected));
            }
        }

        let mut tx = self.pool.begin().await?;
        for p in points {
            sqlx::query(
                r#"
                INSERT INTO vectors (project_id, chunk_id, dims, embedding, file_path, kind,
                                     start_line, end_line, language, content)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(project_id, chunk_id) DO UPDATE SET
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    file_path = excluded.file_path,
                    kind = excluded.kind,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    language = excluded.language,
                    content = excluded.content
                "#,
            )
            .bind(&p.payload.project_id)
            .bind(&p.id)
            .bind(p.vector.len() as i64)
            .bind(vec_to_blob(&p.vector))
            .bind(&p.payload.file_path)
            .bind(p.payload.kind.as_str())
            .bind(p.payload.start_line as i64)
            .bind(p.payload.end_line as i64)
            .bind(&p.payload.language)
            .bind(&p.payload.content)
            .execute(&mut *tx)
            .await?;
        }

        // Holding the write lock now: catch a writer that slipped in with
        // other dims between the check above and the first insert.
        for (project, expected) in &dims_by_project {
            let distinct: i64 =
                sqlx::query_scalar("SELECT COUNT(DISTINCT dims) FROM vectors WHERE project_id = ?")
                    .bind(*project)
                    .fetch_one(&mut *tx)
                    .await?;
            if distinct > 1 {
                // Dropping the transaction rolls back the whole batch.
                return Err(RepoChatError::consistency(format!(
                    "project {} holds vectors of mixed dimensionality, expected {}",
                    project, expected
                ))
                .into());
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM vectors WHERE project_id = ? AND chunk_id = ?")
                .bind(project_id)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn query(
        &self,
        project_id: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let mut sql = String::from(
            "SELECT chunk_id, embedding, file_path, kind, start_line, end_line, language, content \
             FROM vectors WHERE project_id = ?",
        );
        if filter.path_prefix.is_some() {
            sql.push_str(" AND substr(file_path, 1, length(?)) = ?");
        }
        if filter.language.is_some() {
            sql.push_str(" AND language = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }

        let mut q = sqlx::query(&sql).bind(project_id);
        if let Some(prefix) = &filter.path_prefix {
            q = q.bind(prefix).bind(prefix);
        }
        if let Some(lang) = &filter.language {
            q = q.bind(lang);
        }
        if let Some(kind) = filter.kind {
            q = q.bind(kind.as_str());
        }

        let rows = q.fetch_all(&self.pool).await?;

        let mut scored = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let stored = blob_to_vec(&blob);
            let score = cosine_similarity(vector, &stored);
            if score < score_threshold {
                continue;
            }
            let kind: String = row.try_get("kind")?;
            scored.push(ScoredPoint {
                point: VectorPoint {
                    id: row.try_get("chunk_id")?,
                    vector: stored,
                    payload: PointPayload {
                        project_id: project_id.to_string(),
                        file_path: row.try_get("file_path")?,
                        kind: kind.parse()?,
                        start_line: row.try_get::<i64, _>("start_line")? as u32,
                        end_line: row.try_get::<i64, _>("end_line")? as u32,
                        language: row.try_get("language")?,
                        content: row.try_get("content")?,
                    },
                },
                score,
            });
        }

        sort_scored(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn ids(&self, project_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT chunk_id FROM vectors WHERE project_id = ? ORDER BY chunk_id")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn dims(&self, project_id: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vectors WHERE project_id = ? LIMIT 1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn clear_project(&self, project_id: &str) -> Result<usize> {
        let res = sqlx::query("DELETE FROM vectors WHERE project_id = ?")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() as usize)
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
