//! Index reconciliation.
//!
//! Brings a project's two stores in line with its current file set while
//! embedding as little as possible.
//!
//! # Algorithm
//!
//! ```text
//! D = chunks extracted from the file set      (id → hash)
//! E = records in the ChunkMetadataStore       (id → hash)
//! V = ids in the VectorIndex
//! R = ids in E under a path the provider could not read
//!
//! create  = D \ E
//! update  = { id ∈ D ∩ E : hash differs }
//! delete  = E \ (D ∪ R)
//! orphans = V \ (E ∪ D)
//! ```
//!
//! `create ∪ update` is embedded in batches bounded by the embedder's
//! count and character limits, with at most `concurrency` calls in
//! flight. Batches are applied in order as they complete: vectors first,
//! then metadata. Deletes follow the same order, then orphans are dropped
//! from the vector index.
//!
//! Metadata is written after its vector on upsert and removed after it on
//! delete, so a crash at any point leaves at most vectors without
//! metadata. Those are either re-embedded (still desired) or removed as
//! orphans on the next run.
//!
//! A failed embedding batch is skipped: its new chunks stay absent and its
//! updated chunks keep their previous record and vector, so the next run
//! sees them as changed again.
//!
//! # Single flight
//!
//! A run first claims the project's lease in the metadata store and renews
//! it after every applied batch. A second run, in this process or another
//! one sharing the store, finds the lease held and returns
//! [`ReconcileOutcome::Coalesced`] without touching either store. A lease
//! left behind by a crashed run expires after the lease TTL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::chunk::ChunkExtractor;
use crate::embedding::{plan_batches, Embedder, Embeddings};
use crate::error::{ErrorKind, RepoChatError};
use crate::models::{Chunk, IndexInfo, IndexStatus, SourceFile};
use crate::progress::{ProgressEvent, ProgressReporter, ReconcilePhase};
use crate::store::{ChunkMetadataStore, VectorIndex};

/// Seconds a reconcile lease stays valid without renewal.
pub const DEFAULT_LEASE_TTL_SECS: i64 = 300;

/// Counts from one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub project_id: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    /// `path: reason` for each skipped file.
    pub skipped: Vec<String>,
    pub chunks_total: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub orphans_removed: usize,
    pub unchanged: usize,
    /// Chunks whose embedding batch failed; retried on the next run.
    pub failed: usize,
    /// Indexed chunks kept because their file could not be read.
    pub retained: usize,
    pub embedding_calls: usize,
}

/// How a call to [`IndexReconciler::reconcile`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed(ReconcileReport),
    /// Another run for the same project was already in flight.
    Coalesced,
}

impl ReconcileOutcome {
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            ReconcileOutcome::Completed(r) => Some(r),
            ReconcileOutcome::Coalesced => None,
        }
    }
}

/// The change set computed from `D`, `E` and `V`.
#[derive(Debug, Default)]
struct Plan<'a> {
    create: Vec<&'a Chunk>,
    update: Vec<&'a Chunk>,
    delete: Vec<String>,
    orphans: Vec<String>,
    unchanged: usize,
}

pub struct IndexReconciler {
    extractor: ChunkExtractor,
    embedder: Arc<dyn Embedder>,
    metadata: Arc<dyn ChunkMetadataStore>,
    vectors: Arc<dyn VectorIndex>,
    concurrency: usize,
    lease_ttl_secs: i64,
}

impl IndexReconciler {
    pub fn new(
        extractor: ChunkExtractor,
        embedder: Arc<dyn Embedder>,
        metadata: Arc<dyn ChunkMetadataStore>,
        vectors: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            extractor,
            embedder,
            metadata,
            vectors,
            concurrency: 1,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
        }
    }

    /// Maximum embedding calls in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, secs: i64) -> Self {
        self.lease_ttl_secs = secs.max(1);
        self
    }

    async fn claim_lease(&self, project_id: &str, holder: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        self.metadata
            .acquire_lease(project_id, holder, now, now + self.lease_ttl_secs)
            .await
            .context("claiming reconcile lease")
    }

    async fn renew_lease(&self, project_id: &str, holder: &str) -> Result<()> {
        if !self.claim_lease(project_id, holder).await? {
            return Err(RepoChatError::consistency(format!(
                "reconcile lease for {} expired and was taken by another run",
                project_id
            ))
            .into());
        }
        Ok(())
    }

    /// Converge both stores to `files`.
    ///
    /// With `full`, the project is first cleared from the metadata store,
    /// then from the vector index, and its [`IndexInfo`] is reset to the
    /// current embedder. This is the way out of a consistency error.
    ///
    /// Dropping the returned future is equivalent to a crash at the
    /// current await point. The lease then lingers until it expires.
    pub async fn reconcile(
        &self,
        project_id: &str,
        files: &[SourceFile],
        full: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<ReconcileOutcome> {
        if project_id.trim().is_empty() {
            return Err(RepoChatError::validation("project id must not be empty").into());
        }

        let holder = Uuid::new_v4().to_string();
        if !self.claim_lease(project_id, &holder).await? {
            tracing::info!(project = project_id, "reconcile already running, coalescing");
            return Ok(ReconcileOutcome::Coalesced);
        }

        let emit = |phase: ReconcilePhase| {
            progress.report(ProgressEvent {
                project_id: project_id.to_string(),
                phase,
            })
        };

        let outcome = match self.run(project_id, files, full, &holder, &emit).await {
            Ok(report) => {
                emit(ReconcilePhase::Completed);
                tracing::info!(
                    project = project_id,
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    failed = report.failed,
                    "reconcile completed"
                );
                Ok(ReconcileOutcome::Completed(report))
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                tracing::error!(project = project_id, error = %reason, "reconcile failed");
                if let Err(mark_err) = self.mark_failed(project_id, &reason).await {
                    tracing::warn!(project = project_id, error = %mark_err, "could not record failure");
                }
                emit(ReconcilePhase::Failed { reason });
                Err(err)
            }
        };

        if let Err(err) = self.metadata.release_lease(project_id, &holder).await {
            tracing::warn!(project = project_id, error = %err, "could not release reconcile lease");
        }
        outcome
    }

    async fn run(
        &self,
        project_id: &str,
        files: &[SourceFile],
        full: bool,
        holder: &str,
        emit: &(dyn Fn(ReconcilePhase) + Sync),
    ) -> Result<ReconcileReport> {
        emit(ReconcilePhase::Scanning);

        let previous = if full {
            let records = self.metadata.clear_project(project_id).await?;
            let points = self.vectors.clear_project(project_id).await?;
            tracing::info!(project = project_id, records, points, "cleared project for full reindex");
            None
        } else {
            self.check_consistency(project_id).await?;
            self.metadata.get_index_info(project_id).await?
        };

        self.metadata
            .put_index_info(&IndexInfo {
                project_id: project_id.to_string(),
                model: self.embedder.model_name().to_string(),
                dims: self.embedder.dims(),
                status: IndexStatus::Running,
                last_error: None,
                last_reconciled_at: previous.and_then(|i| i.last_reconciled_at),
            })
            .await?;

        emit(ReconcilePhase::Extracting { files: files.len() });
        let extraction = self.extractor.extract_all(project_id, files);

        let mut report = ReconcileReport {
            project_id: project_id.to_string(),
            files_scanned: extraction.files_scanned,
            files_skipped: extraction.skipped.len(),
            skipped: extraction
                .skipped
                .iter()
                .map(|s| format!("{}: {}", s.path, s.reason))
                .collect(),
            chunks_total: extraction.chunks.len(),
            ..Default::default()
        };

        emit(ReconcilePhase::Diffing {
            chunks: extraction.chunks.len(),
        });
        let unreadable: Vec<&str> = extraction
            .skipped
            .iter()
            .filter(|s| s.reason.retains_index())
            .map(|s| s.path.as_str())
            .collect();
        let mut existing: HashMap<String, String> = HashMap::new();
        let mut retained: HashSet<String> = HashSet::new();
        for record in self.metadata.list(project_id).await? {
            if unreadable.iter().any(|p| under_path(&record.file_path, p)) {
                retained.insert(record.id.clone());
            }
            existing.insert(record.id, record.content_hash);
        }
        let vector_ids = self.vectors.ids(project_id).await?;
        let plan = diff(&extraction.chunks, &existing, &retained, &vector_ids);
        report.unchanged = plan.unchanged;
        report.retained = retained.len();

        tracing::debug!(
            project = project_id,
            create = plan.create.len(),
            update = plan.update.len(),
            delete = plan.delete.len(),
            orphans = plan.orphans.len(),
            "computed change set"
        );

        self.embed_and_apply(&plan, &mut report, holder, emit).await?;
        self.renew_lease(project_id, holder).await?;

        emit(ReconcilePhase::Deleting {
            chunks: plan.delete.len() + plan.orphans.len(),
        });
        if !plan.delete.is_empty() {
            self.vectors
                .delete(project_id, &plan.delete)
                .await
                .context("deleting stale vectors")?;
            report.deleted = self
                .metadata
                .delete(project_id, &plan.delete)
                .await
                .context("deleting stale metadata")?;
        }
        if !plan.orphans.is_empty() {
            report.orphans_removed = self
                .vectors
                .delete(project_id, &plan.orphans)
                .await
                .context("deleting orphan vectors")?;
            tracing::info!(project = project_id, count = report.orphans_removed, "removed orphan vectors");
        }

        self.metadata
            .put_index_info(&IndexInfo {
                project_id: project_id.to_string(),
                model: self.embedder.model_name().to_string(),
                dims: self.embedder.dims(),
                status: IndexStatus::Idle,
                last_error: None,
                last_reconciled_at: Some(chrono::Utc::now().timestamp()),
            })
            .await?;

        Ok(report)
    }

    /// Compare the embedder against what built the stored index.
    async fn check_consistency(&self, project_id: &str) -> Result<()> {
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();

        if let Some(info) = self.metadata.get_index_info(project_id).await? {
            if info.model != model || info.dims != dims {
                return Err(RepoChatError::consistency(format!(
                    "project {} was indexed with {} ({} dims), embedder is {} ({} dims)",
                    project_id, info.model, info.dims, model, dims
                ))
                .into());
            }
        }
        if let Some(stored) = self.vectors.dims(project_id).await? {
            if stored != dims {
                return Err(RepoChatError::consistency(format!(
                    "vector index for {} holds {}-dim vectors, embedder produces {}",
                    project_id, stored, dims
                ))
                .into());
            }
        }
        Ok(())
    }

    async fn embed_and_apply(
        &self,
        plan: &Plan<'_>,
        report: &mut ReconcileReport,
        holder: &str,
        emit: &(dyn Fn(ReconcilePhase) + Sync),
    ) -> Result<()> {
        let pending: Vec<(&Chunk, bool)> = plan
            .create
            .iter()
            .map(|c| (*c, true))
            .chain(plan.update.iter().map(|c| (*c, false)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let lengths: Vec<usize> = pending.iter().map(|(c, _)| c.content.chars().count()).collect();
        let batches = plan_batches(
            &lengths,
            self.embedder.max_batch_size(),
            self.embedder.max_batch_chars(),
        );
        let total = batches.len();
        emit(ReconcilePhase::Embedding { done: 0, total });

        let embedder = &self.embedder;
        let mut results = stream::iter(batches.into_iter().map(|batch| {
            let texts: Vec<String> = batch.iter().map(|&i| pending[i].0.content.clone()).collect();
            async move {
                let res = embedder.embed(&texts).await;
                (batch, res)
            }
        }))
        .buffered(self.concurrency);

        let mut done = 0;
        while let Some((batch, res)) = results.next().await {
            done += 1;
            report.embedding_calls += 1;
            emit(ReconcilePhase::Embedding { done, total });

            let embeddings = match res {
                Ok(e) => e,
                Err(err) if ErrorKind::of(&err) == ErrorKind::Consistency => return Err(err),
                Err(err) => {
                    let reason = format!("{:#}", err);
                    tracing::warn!(
                        batch = done,
                        chunks = batch.len(),
                        error = %reason,
                        "embedding batch failed, leaving chunks for the next run"
                    );
                    report.failed += batch.len();
                    continue;
                }
            };
            self.check_batch(&embeddings, batch.len())?;

            let now = chrono::Utc::now().timestamp();
            let mut points = Vec::with_capacity(batch.len());
            let mut records = Vec::with_capacity(batch.len());
            for (&i, vector) in batch.iter().zip(embeddings.vectors) {
                let (chunk, is_new) = pending[i];
                points.push(chunk.to_point(vector));
                records.push(chunk.to_record(now));
                if is_new {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
            }

            self.vectors
                .upsert(&points)
                .await
                .context("writing vectors")?;
            self.metadata
                .upsert(&records)
                .await
                .context("writing chunk metadata")?;
            self.renew_lease(&report.project_id, holder).await?;
            emit(ReconcilePhase::Applying { done, total });
        }

        Ok(())
    }

    fn check_batch(&self, embeddings: &Embeddings, expected: usize) -> Result<()> {
        if embeddings.vectors.len() != expected {
            return Err(RepoChatError::consistency(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.vectors.len(),
                expected
            ))
            .into());
        }
        if embeddings.dims != self.embedder.dims() {
            return Err(RepoChatError::consistency(format!(
                "embedder returned {}-dim vectors, configured for {}",
                embeddings.dims,
                self.embedder.dims()
            ))
            .into());
        }
        Ok(())
    }

    async fn mark_failed(&self, project_id: &str, reason: &str) -> Result<()> {
        let info = match self.metadata.get_index_info(project_id).await? {
            Some(mut info) => {
                info.status = IndexStatus::Failed;
                info.last_error = Some(reason.to_string());
                info
            }
            None => IndexInfo {
                project_id: project_id.to_string(),
                model: self.embedder.model_name().to_string(),
                dims: self.embedder.dims(),
                status: IndexStatus::Failed,
                last_error: Some(reason.to_string()),
                last_reconciled_at: None,
            },
        };
        self.metadata.put_index_info(&info).await
    }
}

/// `path` is `prefix` itself or lies below it.
fn under_path(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn diff<'a>(
    desired: &'a [Chunk],
    existing: &HashMap<String, String>,
    retained: &HashSet<String>,
    vector_ids: &[String],
) -> Plan<'a> {
    let mut plan = Plan::default();
    let mut desired_ids: HashSet<&str> = HashSet::with_capacity(desired.len());

    for chunk in desired {
        desired_ids.insert(chunk.id.as_str());
        match existing.get(&chunk.id) {
            None => plan.create.push(chunk),
            Some(hash) if *hash != chunk.content_hash => plan.update.push(chunk),
            Some(_) => plan.unchanged += 1,
        }
    }

    plan.delete = existing
        .keys()
        .filter(|id| !desired_ids.contains(id.as_str()) && !retained.contains(*id))
        .cloned()
        .collect();
    plan.delete.sort();

    plan.orphans = vector_ids
        .iter()
        .filter(|id| !existing.contains_key(*id) && !desired_ids.contains(id.as_str()))
        .cloned()
        .collect();

    plan
}
