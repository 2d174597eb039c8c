//! In-memory store implementations for tests and embedding hosts.
//!
//! Each store keeps its state behind `std::sync::RwLock`. Vector search
//! is brute-force cosine similarity over the project's points.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RepoChatError;
use crate::models::{
    ChatMessage, ChatSession, IndexInfo, IndexedChunkRecord, ScoredPoint, SessionStatus, VectorPoint,
};

use super::{ChatStore, ChunkMetadataStore, QueryFilter, VectorIndex};

// A panic while holding a lock leaves the data intact for our use, so
// poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------

/// Chunk records keyed by `(project_id, id)`.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<String, BTreeMap<String, IndexedChunkRecord>>>,
    info: RwLock<HashMap<String, IndexInfo>>,
    /// project -> (holder, expires_at)
    leases: RwLock<HashMap<String, (String, i64)>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkMetadataStore for InMemoryMetadataStore {
    async fn list(&self, project_id: &str) -> Result<Vec<IndexedChunkRecord>> {
        let records = read(&self.records);
        let mut out: Vec<IndexedChunkRecord> = records
            .get(project_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| {
            (&a.file_path, a.start_line, &a.id).cmp(&(&b.file_path, b.start_line, &b.id))
        });
        Ok(out)
    }

    async fn upsert(&self, records: &[IndexedChunkRecord]) -> Result<()> {
        let mut stored = write(&self.records);
        for r in records {
            stored
                .entry(r.project_id.clone())
                .or_default()
                .insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize> {
        let mut stored = write(&self.records);
        let Some(project) = stored.get_mut(project_id) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| project.remove(*id).is_some()).count())
    }

    async fn clear_project(&self, project_id: &str) -> Result<usize> {
        let mut stored = write(&self.records);
        Ok(stored.remove(project_id).map(|m| m.len()).unwrap_or(0))
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        Ok(read(&self.records).get(project_id).map(|m| m.len()).unwrap_or(0))
    }

    async fn get_index_info(&self, project_id: &str) -> Result<Option<IndexInfo>> {
        Ok(read(&self.info).get(project_id).cloned())
    }

    async fn put_index_info(&self, info: &IndexInfo) -> Result<()> {
        write(&self.info).insert(info.project_id.clone(), info.clone());
        Ok(())
    }

    async fn acquire_lease(
        &self,
        project_id: &str,
        holder: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool> {
        let mut leases = write(&self.leases);
        if let Some((current, until)) = leases.get(project_id) {
            if current != holder && *until > now {
                return Ok(false);
            }
        }
        leases.insert(project_id.to_string(), (holder.to_string(), expires_at));
        Ok(true)
    }

    async fn release_lease(&self, project_id: &str, holder: &str) -> Result<()> {
        let mut leases = write(&self.leases);
        if leases.get(project_id).is_some_and(|(current, _)| current == holder) {
            leases.remove(project_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------

/// Points keyed by `(project_id, id)`.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<String, BTreeMap<String, VectorPoint>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        let mut stored = write(&self.points);

        // Validate everything before touching state so a bad batch
        // leaves the index unchanged.
        let mut dims_by_project: HashMap<&str, usize> = HashMap::new();
        for p in points {
            let project = p.payload.project_id.as_str();
            let expected = match dims_by_project.get(project) {
                Some(d) => *d,
                None => {
                    let existing = stored
                        .get(project)
                        .and_then(|m| m.values().next())
                        .map(|v| v.vector.len())
                        .unwrap_or(p.vector.len());
                    dims_by_project.insert(project, existing);
                    existing
                }
            };
            if p.vector.len() != expected || p.vector.is_empty() {
                return Err(RepoChatError::consistency(format!(
                    "vector for chunk {} has {} dims, project {} stores {}",
                    p.id,
                    p.vector.len(),
                    project,
                    expected
                ))
                .into());
            }
        }

        for p in points {
            stored
                .entry(p.payload.project_id.clone())
                .or_default()
                .insert(p.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize> {
        let mut stored = write(&self.points);
        let Some(project) = stored.get_mut(project_id) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| project.remove(*id).is_some()).count())
    }

    async fn query(
        &self,
        project_id: &str,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredPoint>> {
        let stored = read(&self.points);
        let Some(project) = stored.get(project_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredPoint> = project
            .values()
            .filter(|p| filter.matches(&p.payload))
            .map(|p| ScoredPoint {
                score: cosine_similarity(vector, &p.vector),
                point: p.clone(),
            })
            .filter(|sp| sp.score >= score_threshold)
            .collect();

        sort_scored(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn ids(&self, project_id: &str) -> Result<Vec<String>> {
        Ok(read(&self.points)
            .get(project_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn dims(&self, project_id: &str) -> Result<Option<usize>> {
        Ok(read(&self.points)
            .get(project_id)
            .and_then(|m| m.values().next())
            .map(|p| p.vector.len()))
    }

    async fn clear_project(&self, project_id: &str) -> Result<usize> {
        Ok(write(&self.points)
            .remove(project_id)
            .map(|m| m.len())
            .unwrap_or(0))
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        Ok(read(&self.points).get(project_id).map(|m| m.len()).unwrap_or(0))
    }
}

/// Score descending, id ascending.
pub fn sort_scored(scored: &mut [ScoredPoint]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.point.id.cmp(&b.point.id))
    });
}

// ---------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------

#[derive(Default)]
struct ChatState {
    sessions: HashMap<String, ChatSession>,
    /// Messages per session in insertion order.
    messages: HashMap<String, Vec<ChatMessage>>,
}

impl ChatState {
    fn save(&mut self, session: &ChatSession) {
        if session.is_active {
            for other in self.sessions.values_mut() {
                if other.project_id == session.project_id && other.id != session.id {
                    other.is_active = false;
                }
            }
        }
        self.sessions.insert(session.id.clone(), session.clone());
    }
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: RwLock<ChatState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(read(&self.state).sessions.get(id).cloned())
    }

    async fn list_sessions(&self, project_id: &str) -> Result<Vec<ChatSession>> {
        let state = read(&self.state);
        let mut out: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_session(&self, session: &ChatSession) -> Result<()> {
        write(&self.state).save(session);
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let state = read(&self.state);
        let mut out = state.messages.get(session_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order among equal timestamps.
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let all = self.list_messages(session_id).await?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn commit_turn(&self, session: &ChatSession, messages: &[ChatMessage]) -> Result<()> {
        let mut state = write(&self.state);
        if state
            .sessions
            .get(&session.id)
            .is_some_and(|s| s.status == SessionStatus::Archived)
        {
            return Err(
                RepoChatError::validation(format!("session {} is archived", session.id)).into(),
            );
        }
        state.save(session);
        state
            .messages
            .entry(session.id.clone())
            .or_default()
            .extend(messages.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{ChunkKind, PointPayload, Role};

    fn point(project: &str, id: &str, vector: Vec<f32>, path: &str) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            payload: PointPayload {
                project_id: project.to_string(),
                file_path: path.to_string(),
                kind: ChunkKind::WholeFile,
                start_line: 1,
                end_line: 1,
                language: Some("rust".into()),
                content: format!("content of {}", id),
            },
        }
    }

    fn session(id: &str, project: &str, active: bool, updated_at: i64) -> ChatSession {
        ChatSession {
            id: id.into(),
            project_id: project.into(),
            title: id.into(),
            status: SessionStatus::Created,
            is_active: active,
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_score_then_id() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[
                point("p", "b", vec![1.0, 0.0], "b.rs"),
                point("p", "a", vec![1.0, 0.0], "a.rs"),
                point("p", "c", vec![0.0, 1.0], "c.rs"),
            ])
            .await
            .unwrap();
        let hits = index
            .query("p", &[1.0, 0.0], 10, -1.0, &QueryFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.point.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_query_is_project_scoped() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[
                point("p1", "x", vec![1.0, 0.0], "x.rs"),
                point("p2", "y", vec![1.0, 0.0], "y.rs"),
            ])
            .await
            .unwrap();
        let hits = index
            .query("p1", &[1.0, 0.0], 10, 0.0, &QueryFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.id, "x");
        assert_eq!(index.ids("p2").await.unwrap(), vec!["y".to_string()]);
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_change() {
        let index = InMemoryVectorIndex::new();
        index.upsert(&[point("p", "a", vec![1.0, 0.0], "a.rs")]).await.unwrap();
        let err = index
            .upsert(&[point("p", "b", vec![1.0, 0.0, 0.0], "b.rs")])
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Consistency);
        assert_eq!(index.count("p").await.unwrap(), 1);
        assert_eq!(index.dims("p").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_metadata_delete_ignores_unknown() {
        let store = InMemoryMetadataStore::new();
        let rec = IndexedChunkRecord {
            id: "a".into(),
            project_id: "p".into(),
            file_path: "a.rs".into(),
            kind: ChunkKind::WholeFile,
            start_line: 1,
            end_line: 2,
            language: None,
            content_hash: "h".into(),
            indexed_at: 0,
        };
        store.upsert(&[rec]).await.unwrap();
        let removed = store
            .delete("p", &["a".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_session_moves_active_flag() {
        let store = InMemoryChatStore::new();
        store.save_session(&session("s1", "p", true, 1)).await.unwrap();
        store.save_session(&session("other", "q", true, 1)).await.unwrap();
        store.save_session(&session("s2", "p", true, 2)).await.unwrap();

        let s1 = store.get_session("s1").await.unwrap().unwrap();
        let s2 = store.get_session("s2").await.unwrap().unwrap();
        let other = store.get_session("other").await.unwrap().unwrap();
        assert!(!s1.is_active);
        assert!(s2.is_active);
        assert!(other.is_active);
    }

    #[tokio::test]
    async fn test_lease_blocks_other_holders_until_expiry() {
        let store = InMemoryMetadataStore::new();
        assert!(store.acquire_lease("p", "a", 100, 200).await.unwrap());
        assert!(!store.acquire_lease("p", "b", 150, 250).await.unwrap());
        assert!(store.acquire_lease("q", "b", 150, 250).await.unwrap());
        // Renewal by the owner.
        assert!(store.acquire_lease("p", "a", 150, 300).await.unwrap());
        // Expired leases can be taken over.
        assert!(store.acquire_lease("p", "b", 300, 400).await.unwrap());

        store.release_lease("p", "a").await.unwrap();
        assert!(!store.acquire_lease("p", "c", 310, 410).await.unwrap());
        store.release_lease("p", "b").await.unwrap();
        assert!(store.acquire_lease("p", "c", 310, 410).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_turn_rejects_archived_session() {
        let store = InMemoryChatStore::new();
        let mut s = session("s", "p", false, 1);
        s.status = SessionStatus::Archived;
        store.save_session(&s).await.unwrap();

        let mut stale = s.clone();
        stale.status = SessionStatus::Active;
        stale.is_active = true;
        let msg = ChatMessage {
            id: "m".into(),
            session_id: "s".into(),
            role: Role::User,
            content: "hi".into(),
            sources: vec![],
            created_at: 2,
        };
        let err = store.commit_turn(&stale, &[msg]).await.unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        assert!(store.list_messages("s").await.unwrap().is_empty());
        let saved = store.get_session("s").await.unwrap().unwrap();
        assert_eq!(saved.status, SessionStatus::Archived);
    }

    #[tokio::test]
    async fn test_recent_messages_keeps_order() {
        let store = InMemoryChatStore::new();
        let s = session("s", "p", true, 1);
        let msgs: Vec<ChatMessage> = (0..5)
            .map(|i| ChatMessage {
                id: format!("m{}", i),
                session_id: "s".into(),
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("{}", i),
                sources: vec![],
                created_at: 100,
            })
            .collect();
        store.commit_turn(&s, &msgs).await.unwrap();
        let recent = store.recent_messages("s", 2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }
}
