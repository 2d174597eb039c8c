//! Core data models.
//!
//! These types flow between the extractor, the two index stores, the
//! retriever, and the chat layer. Timestamps are Unix seconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chunk::SkipReason;
use crate::error::RepoChatError;

/// A file handed over by the file-set provider.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// Raw file bytes; decoding happens in the extractor.
    pub bytes: Vec<u8>,
    /// Set when the provider already knows the file cannot be chunked,
    /// e.g. it could not be read. `bytes` is empty in that case.
    pub skip: Option<SkipReason>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
            skip: None,
        }
    }

    /// A file the provider listed but did not load.
    pub fn skipped(path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            path: path.into(),
            bytes: Vec::new(),
            skip: Some(reason),
        }
    }
}

/// Whether a chunk covers its whole file or one line segment of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    WholeFile,
    Segment,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::WholeFile => "whole_file",
            ChunkKind::Segment => "segment",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = RepoChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whole_file" => Ok(ChunkKind::WholeFile),
            "segment" => Ok(ChunkKind::Segment),
            other => Err(RepoChatError::validation(format!(
                "unknown chunk kind: '{}'",
                other
            ))),
        }
    }
}

/// A retrievable unit of source text.
///
/// `content` is held only while the chunk travels from the extractor to
/// the embedder; the text of record is stored in the vector payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    /// 1-indexed, inclusive, `>= start_line`.
    pub end_line: u32,
    pub language: Option<String>,
    /// SHA-256 hex of `content`.
    pub content_hash: String,
    pub content: String,
}

impl Chunk {
    /// Project this chunk onto its metadata record.
    pub fn to_record(&self, indexed_at: i64) -> IndexedChunkRecord {
        IndexedChunkRecord {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            file_path: self.file_path.clone(),
            kind: self.kind,
            start_line: self.start_line,
            end_line: self.end_line,
            language: self.language.clone(),
            content_hash: self.content_hash.clone(),
            indexed_at,
        }
    }

    /// Project this chunk onto a vector point.
    pub fn to_point(&self, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: self.id.clone(),
            vector,
            payload: PointPayload {
                project_id: self.project_id.clone(),
                file_path: self.file_path.clone(),
                kind: self.kind,
                start_line: self.start_line,
                end_line: self.end_line,
                language: self.language.clone(),
                content: self.content.clone(),
            },
        }
    }
}

/// Metadata-store projection of a [`Chunk`], without content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedChunkRecord {
    pub id: String,
    pub project_id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Option<String>,
    pub content_hash: String,
    pub indexed_at: i64,
}

/// Payload stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub project_id: String,
    pub file_path: String,
    pub kind: ChunkKind,
    pub start_line: u32,
    pub end_line: u32,
    pub language: Option<String>,
    pub content: String,
}

/// Vector-index projection of a [`Chunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Equal to the chunk id.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A point returned from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub point: VectorPoint,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// A retrieval result backing a claim in an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub snippet: String,
    pub score: f32,
}

impl From<ScoredPoint> for Citation {
    fn from(sp: ScoredPoint) -> Self {
        Citation {
            chunk_id: sp.point.id,
            file_path: sp.point.payload.file_path,
            start_line: sp.point.payload.start_line,
            end_line: sp.point.payload.end_line,
            language: sp.point.payload.language,
            snippet: sp.point.payload.content,
            score: sp.score,
        }
    }
}

/// Lifecycle of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = RepoChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "active" => Ok(SessionStatus::Active),
            "archived" => Ok(SessionStatus::Archived),
            other => Err(RepoChatError::validation(format!(
                "unknown session status: '{}'",
                other
            ))),
        }
    }
}

/// A conversation thread scoped to one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: SessionStatus,
    /// At most one session per project carries this flag.
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RepoChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(RepoChatError::validation(format!(
                "unknown message role: '{}'",
                other
            ))),
        }
    }
}

/// One message of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    /// Populated only for assistant replies produced via retrieval.
    pub sources: Vec<Citation>,
    pub created_at: i64,
}

/// Reconciliation state of a project, kept in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Idle,
    Running,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Idle => "idle",
            IndexStatus::Running => "running",
            IndexStatus::Failed => "failed",
        }
    }
}

impl FromStr for IndexStatus {
    type Err = RepoChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(IndexStatus::Idle),
            "running" => Ok(IndexStatus::Running),
            "failed" => Ok(IndexStatus::Failed),
            other => Err(RepoChatError::validation(format!(
                "unknown index status: '{}'",
                other
            ))),
        }
    }
}

/// Per-project index bookkeeping: which model built the index and how
/// the last reconciliation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub project_id: String,
    pub model: String,
    pub dims: usize,
    pub status: IndexStatus,
    pub last_error: Option<String>,
    pub last_reconciled_at: Option<i64>,
}
