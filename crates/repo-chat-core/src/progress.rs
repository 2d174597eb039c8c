//! Reconciliation progress events.
//!
//! The reconciler emits one event per phase transition, plus one per
//! embedded batch. Rendering (human stderr lines, JSON lines) lives in the
//! app crate.

use serde::Serialize;

/// Phase of a reconciliation run.
///
/// `Scanning → Extracting → Diffing → (Embedding → Applying)* → Deleting →
/// Completed`, or `Failed` from any phase. Each batch is applied as soon
/// as its embedding returns, so the two middle phases alternate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ReconcilePhase {
    Scanning,
    Extracting { files: usize },
    Diffing { chunks: usize },
    Embedding { done: usize, total: usize },
    /// Batch `done` of `total` written to both stores.
    Applying { done: usize, total: usize },
    Deleting { chunks: usize },
    Completed,
    Failed { reason: String },
}

impl ReconcilePhase {
    pub fn name(&self) -> &'static str {
        match self {
            ReconcilePhase::Scanning => "scanning",
            ReconcilePhase::Extracting { .. } => "extracting",
            ReconcilePhase::Diffing { .. } => "diffing",
            ReconcilePhase::Embedding { .. } => "embedding",
            ReconcilePhase::Applying { .. } => "applying",
            ReconcilePhase::Deleting { .. } => "deleting",
            ReconcilePhase::Completed => "completed",
            ReconcilePhase::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcilePhase::Completed | ReconcilePhase::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub project_id: String,
    #[serde(flatten)]
    pub phase: ReconcilePhase,
}

/// Receives progress events. Called inline from the reconciler, so
/// implementations should not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}
