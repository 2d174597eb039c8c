//! Test doubles shared by the core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use repo_chat_core::chunk::{ChunkExtractor, ChunkingParams};
use repo_chat_core::embedding::{validate_batch, Embedder, Embeddings};
use repo_chat_core::generation::{GenerationRequest, Generator};
use repo_chat_core::models::{IndexedChunkRecord, IndexInfo, SourceFile};
use repo_chat_core::reconcile::IndexReconciler;
use repo_chat_core::store::memory::{InMemoryMetadataStore, InMemoryVectorIndex};
use repo_chat_core::store::ChunkMetadataStore;
use repo_chat_core::RepoChatError;
use tokio::sync::Notify;

// ─── Embedder ───────────────────────────────────────────────────────

/// Deterministic embedder that counts calls and can be told to fail or
/// to block on selected texts.
pub struct FakeEmbedder {
    pub model: String,
    pub dims: usize,
    pub max_batch: usize,
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    /// Batches containing a text with this marker fail transiently.
    pub fail_marker: Mutex<Option<String>>,
    /// Batches containing a text with this marker wait on `gate`.
    pub gate_marker: Mutex<Option<String>>,
    pub gate: Notify,
    pub entered_gate: Notify,
    /// Fixed vectors for exact texts.
    pub fixed: Mutex<HashMap<String, Vec<f32>>>,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model: "fake-embed".to_string(),
            dims,
            max_batch: 16,
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            fail_marker: Mutex::new(None),
            gate_marker: Mutex::new(None),
            gate: Notify::new(),
            entered_gate: Notify::new(),
            fixed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn gate_on(&self, marker: &str) {
        *self.gate_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn fix(&self, text: &str, vector: Vec<f32>) {
        self.fixed.lock().unwrap().insert(text.to_string(), vector);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.texts_embedded.store(0, Ordering::SeqCst);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixed.lock().unwrap().get(text) {
            return v.clone();
        }
        let mut v = vec![0.0f32; self.dims];
        v[0] = 1.0;
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dims] += b as f32 / 255.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }

    fn max_batch_chars(&self) -> usize {
        1_000_000
    }

    async fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        validate_batch(texts, self.max_batch, self.max_batch_chars())?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate_marker.lock().unwrap().clone();
        if let Some(marker) = gate {
            if texts.iter().any(|t| t.contains(&marker)) {
                self.entered_gate.notify_one();
                self.gate.notified().await;
            }
        }

        let fail = self.fail_marker.lock().unwrap().clone();
        if let Some(marker) = fail {
            if texts.iter().any(|t| t.contains(&marker)) {
                return Err(RepoChatError::transient("embedding endpoint returned 503").into());
            }
        }

        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Embeddings::from_vectors(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ─── Generator ──────────────────────────────────────────────────────

pub struct FakeGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub fail: Mutex<bool>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake-chat"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(RepoChatError::transient("generation timed out").into());
        }
        let user = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(format!("answer to: {}", user))
    }
}

// ─── Metadata store with injected write failures ────────────────────

/// Wraps the in-memory metadata store and fails chunk upserts while
/// `fail_upserts` is set, simulating a crash between the vector write and
/// the metadata write.
pub struct FlakyMetadata {
    pub inner: InMemoryMetadataStore,
    pub fail_upserts: Mutex<bool>,
}

impl FlakyMetadata {
    pub fn new() -> Self {
        Self {
            inner: InMemoryMetadataStore::new(),
            fail_upserts: Mutex::new(false),
        }
    }
}

#[async_trait]
impl ChunkMetadataStore for FlakyMetadata {
    async fn list(&self, project_id: &str) -> Result<Vec<IndexedChunkRecord>> {
        self.inner.list(project_id).await
    }

    async fn upsert(&self, records: &[IndexedChunkRecord]) -> Result<()> {
        if *self.fail_upserts.lock().unwrap() {
            anyhow::bail!("simulated crash before metadata write");
        }
        self.inner.upsert(records).await
    }

    async fn delete(&self, project_id: &str, ids: &[String]) -> Result<usize> {
        self.inner.delete(project_id, ids).await
    }

    async fn clear_project(&self, project_id: &str) -> Result<usize> {
        self.inner.clear_project(project_id).await
    }

    async fn count(&self, project_id: &str) -> Result<usize> {
        self.inner.count(project_id).await
    }

    async fn get_index_info(&self, project_id: &str) -> Result<Option<IndexInfo>> {
        self.inner.get_index_info(project_id).await
    }

    async fn put_index_info(&self, info: &IndexInfo) -> Result<()> {
        self.inner.put_index_info(info).await
    }

    async fn acquire_lease(
        &self,
        project_id: &str,
        holder: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool> {
        self.inner
            .acquire_lease(project_id, holder, now, expires_at)
            .await
    }

    async fn release_lease(&self, project_id: &str, holder: &str) -> Result<()> {
        self.inner.release_lease(project_id, holder).await
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

pub fn lines(n: usize, tag: &str) -> String {
    (1..=n).map(|i| format!("{} line {}\n", tag, i)).collect()
}

pub fn file(path: &str, text: &str) -> SourceFile {
    SourceFile::new(path, text.as_bytes().to_vec())
}

pub fn small_params() -> ChunkingParams {
    ChunkingParams {
        whole_file_max_lines: 20,
        segment_lines: 10,
        overlap_lines: 2,
        max_file_bytes: 64 * 1024,
    }
}

pub struct Harness {
    pub embedder: Arc<FakeEmbedder>,
    pub metadata: Arc<FlakyMetadata>,
    pub vectors: Arc<InMemoryVectorIndex>,
    pub reconciler: IndexReconciler,
}

impl Harness {
    pub fn new(embedder: FakeEmbedder) -> Self {
        let embedder = Arc::new(embedder);
        let metadata = Arc::new(FlakyMetadata::new());
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let reconciler = IndexReconciler::new(
            ChunkExtractor::new(small_params()).unwrap(),
            embedder.clone(),
            metadata.clone(),
            vectors.clone(),
        )
        .with_concurrency(2);
        Self {
            embedder,
            metadata,
            vectors,
            reconciler,
        }
    }

    /// A second reconciler over the same stores with a different embedder.
    pub fn reconciler_with(&self, embedder: Arc<FakeEmbedder>) -> IndexReconciler {
        IndexReconciler::new(
            ChunkExtractor::new(small_params()).unwrap(),
            embedder,
            self.metadata.clone(),
            self.vectors.clone(),
        )
    }
}
