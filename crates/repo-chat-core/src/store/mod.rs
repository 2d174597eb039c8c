//! Storage abstractions.
//!
//! Three independently owned stores back the system:
//!
//! | Trait | Owns | Writer |
//! |-------|------|--------|
//! | [`ChunkMetadataStore`] | chunk identity, line range, content hash, [`IndexInfo`], reconcile leases | reconciler |
//! | [`VectorIndex`] | chunk vectors and payload text | reconciler |
//! | [`ChatStore`] | chat sessions and messages | chat orchestrator |
//!
//! The metadata store and the vector index are never updated in one
//! transaction. The reconciler orders its writes so that the metadata
//! store is always the trailing record of what is safely indexed.
//!
//! All operations are async (via `async-trait`). Implementations must be
//! `Send + Sync`. In-memory implementations live in [`memory`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChatMessage, ChatSession, ChunkKind, IndexInfo, IndexedChunkRecord, PointPayload, ScoredPoint,
    VectorPoint,
};

/// Payload filters applied by [`VectorIndex::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Keep points whose file path starts with this prefix.
    pub path_prefix: Option<String>,
    pub language: Option<String>,
    pub kind: Option<ChunkKind>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_none() && self.language.is_none() && self.kind.is_none()
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !payload.file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(lang) = &self.language {
            if payload.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if payload.kind != kind {
                return false;
            }
        }
        true
    }
}

/// Relational record of which chunks are safely indexed.
#[async_trait]
pub trait ChunkMetadataStore: Send + Sync {
    /// Every record for a project, ordered by file path then start line.
    async fn list(&self, project_id: &str) -> Result<Vec<IndexedChunkRecord>>;

    /// Insert or replace records, keyed by `(project_id, id)`.
    async fn upsert(&self, records: &[IndexedChunkRecord]) -> Result<()>;

    /// Delete records by id. Unknown ids are ignored. Returns the number
    /// removed.
    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize>;

    /// Remove every record of a project.
    async fn clear_project(&self, project_id: &str) -> Result<usize>;

    async fn count(&self, project_id: &str) -> Result<usize>;

    async fn get_index_info(&self, project_id: &str) -> Result<Option<IndexInfo>>;

    async fn put_index_info(&self, info: &IndexInfo) -> Result<()>;

    /// Claim or renew a project's reconcile lease for `holder` until
    /// `expires_at`. Returns `false` while a different holder's lease is
    /// still unexpired at `now`. Must be atomic across every process
    /// sharing the store.
    async fn acquire_lease(
        &self,
        project_id: &str,
        holder: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release_lease(&self, project_id: &str, holder: &str) -> Result<()>;
}

/// Per-project namespaced vector store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace points by id. Each point is namespaced by its
    /// payload's `project_id`. Rejects a vector whose length differs from
    /// the project's stored dimensionality.
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Delete points by id. Unknown ids are ignored.
    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize>;

    /// Top-k cosine similarity search.
    ///
    /// Results have `score >= score_threshold`, are ordered by score
    /// descending with ties broken by id ascending, and number at most
    /// `top_k`.
    async fn query(
        &self,
        project_id: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredPoint>>;

    /// Every point id stored for a project, sorted.
    async fn ids(&self, project_id: &str) -> Result<Vec<String>>;

    /// Dimensionality of the project's stored vectors, if any exist.
    async fn dims(&self, project_id: &str) -> Result<Option<usize>>;

    async fn clear_project(&self, project_id: &str) -> Result<usize>;

    async fn count(&self, project_id: &str) -> Result<usize>;
}

/// Persistence for chat sessions and messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>>;

    /// Sessions of a project, most recently updated first.
    async fn list_sessions(&self, project_id: &str) -> Result<Vec<ChatSession>>;

    /// Insert or update a session. When `session.is_active` is set, the
    /// flag is cleared on every other session of the project in the same
    /// transaction.
    async fn save_session(&self, session: &ChatSession) -> Result<()>;

    /// Messages of a session in creation order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// The last `limit` messages of a session, in creation order.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Append `messages` and save `session` atomically: either all of it
    /// becomes visible or none of it does. Fails with a validation error,
    /// writing nothing, if the stored session has been archived meanwhile.
    async fn commit_turn(&self, session: &ChatSession, messages: &[ChatMessage]) -> Result<()>;
}
