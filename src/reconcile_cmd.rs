//! `repochat reconcile <project>`: bring one project's index up to date.

use anyhow::Result;

use repo_chat_core::reconcile::{ReconcileOutcome, ReconcileReport};

use crate::app::{self, Stores};
use crate::config::Config;
use crate::embedding;
use crate::progress::ProgressMode;

pub async fn run_reconcile(
    config: &Config,
    project_id: &str,
    full: bool,
    progress: ProgressMode,
) -> Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let stores = Stores::open(config).await?;
    let reporter = progress.reporter();

    let outcome = app::reconcile_project(
        config,
        &stores,
        embedder,
        project_id,
        full,
        reporter.as_ref(),
    )
    .await;
    stores.close().await;

    match outcome? {
        ReconcileOutcome::Completed(report) => print_report(&report, full),
        ReconcileOutcome::Coalesced => {
            println!("reconcile {}", project_id);
            println!("  already running, nothing to do");
        }
    }
    Ok(())
}

fn print_report(report: &ReconcileReport, full: bool) {
    println!(
        "reconcile {}{}",
        report.project_id,
        if full { " (full)" } else { "" }
    );
    println!("  files scanned: {}", report.files_scanned);
    println!("  files skipped: {}", report.files_skipped);
    for skipped in &report.skipped {
        println!("    {}", skipped);
    }
    println!("  chunks: {}", report.chunks_total);
    println!("  created: {}", report.created);
    println!("  updated: {}", report.updated);
    println!("  unchanged: {}", report.unchanged);
    println!("  deleted: {}", report.deleted);
    if report.retained > 0 {
        println!("  kept (file unreadable): {}", report.retained);
    }
    if report.orphans_removed > 0 {
        println!("  orphan vectors removed: {}", report.orphans_removed);
    }
    println!("  embedding calls: {}", report.embedding_calls);
    if report.failed > 0 {
        println!(
            "  failed: {} (will be retried on the next run)",
            report.failed
        );
    }
    println!("ok");
}
