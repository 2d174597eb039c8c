//! Wiring between the configuration, the SQLite stores, and the core
//! components.
//!
//! Every CLI command opens a [`Stores`] bundle, builds the component it
//! needs from it, and closes the pools when done.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use repo_chat_core::chat::ChatOrchestrator;
use repo_chat_core::chunk::ChunkExtractor;
use repo_chat_core::embedding::Embedder;
use repo_chat_core::generation::Generator;
use repo_chat_core::progress::ProgressReporter;
use repo_chat_core::reconcile::{IndexReconciler, ReconcileOutcome};
use repo_chat_core::retrieve::Retriever;

use crate::config::Config;
use crate::db;
use crate::file_source::{FileSource, FsFileSource};
use crate::migrate;
use crate::sqlite_store::{SqliteChatStore, SqliteMetadataStore};
use crate::sqlite_vectors::SqliteVectorIndex;

/// Open handles on both databases.
pub struct Stores {
    metadata_pool: SqlitePool,
    vector_pool: SqlitePool,
    pub metadata: Arc<SqliteMetadataStore>,
    pub vectors: Arc<SqliteVectorIndex>,
    pub chat: Arc<SqliteChatStore>,
}

impl Stores {
    /// Connect to both databases, creating any missing tables.
    pub async fn open(config: &Config) -> Result<Self> {
        let metadata_pool = db::connect(config).await?;
        migrate::migrate_metadata(&metadata_pool).await?;
        let vector_pool = db::connect_vectors(config).await?;
        migrate::migrate_vectors(&vector_pool).await?;

        Ok(Self {
            metadata: Arc::new(SqliteMetadataStore::new(metadata_pool.clone())),
            vectors: Arc::new(SqliteVectorIndex::new(vector_pool.clone())),
            chat: Arc::new(SqliteChatStore::new(metadata_pool.clone())),
            metadata_pool,
            vector_pool,
        })
    }

    pub fn reconciler(&self, config: &Config, embedder: Arc<dyn Embedder>) -> Result<IndexReconciler> {
        let extractor = ChunkExtractor::new(config.chunking.to_params())?;
        Ok(IndexReconciler::new(
            extractor,
            embedder,
            self.metadata.clone(),
            self.vectors.clone(),
        )
        .with_concurrency(config.embedding.concurrency))
    }

    pub fn retriever(&self, embedder: Arc<dyn Embedder>) -> Retriever {
        Retriever::new(embedder, self.vectors.clone())
    }

    pub fn orchestrator(
        &self,
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> ChatOrchestrator {
        ChatOrchestrator::new(
            Arc::new(self.retriever(embedder)),
            generator,
            self.chat.clone(),
            config.chat_settings(),
        )
    }

    pub async fn close(self) {
        self.metadata_pool.close().await;
        self.vector_pool.close().await;
    }
}

/// Scan a configured project from disk and reconcile its index.
pub async fn reconcile_project(
    config: &Config,
    stores: &Stores,
    embedder: Arc<dyn Embedder>,
    project_id: &str,
    full: bool,
    progress: &dyn ProgressReporter,
) -> Result<ReconcileOutcome> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let project = config.project(project_id)?;
    let files = FsFileSource::new(project)?
        .with_max_file_bytes(config.chunking.max_file_bytes)
        .scan()?;
    tracing::info!(project = project_id, files = files.len(), full, "reconciling");

    let reconciler = stores.reconciler(config, embedder)?;
    reconciler.reconcile(project_id, &files, full, progress).await
}
