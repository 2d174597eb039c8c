//! Index statistics and health overview.
//!
//! Summarizes what is indexed per project: chunk records, stored vectors,
//! whether the two stores agree, and chat sessions. Used by
//! `repochat stats` to give confidence that reconciliation left both
//! stores consistent.

use anyhow::Result;
use std::collections::BTreeSet;

use repo_chat_core::models::SessionStatus;
use repo_chat_core::store::{ChatStore, ChunkMetadataStore, VectorIndex};

use crate::app::Stores;
use crate::config::Config;

/// Per-project counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStats {
    pub project_id: String,
    pub chunks: usize,
    pub vectors: usize,
    /// Chunk records with no stored vector.
    pub missing_vectors: usize,
    /// Stored vectors with no chunk record.
    pub orphan_vectors: usize,
    pub sessions: usize,
    pub archived_sessions: usize,
    pub index_status: Option<String>,
    pub last_reconciled_at: Option<i64>,
}

impl ProjectStats {
    pub fn is_consistent(&self) -> bool {
        self.missing_vectors == 0 && self.orphan_vectors == 0
    }
}

/// Collect counts for one project from both stores.
pub async fn collect_project_stats(stores: &Stores, project_id: &str) -> Result<ProjectStats> {
    let metadata_ids: BTreeSet<String> = stores
        .metadata
        .list(project_id)
        .await?
        .into_iter()
        .map(|r| r.id)
        .collect();
    let vector_ids: BTreeSet<String> = stores.vectors.ids(project_id).await?.into_iter().collect();

    let sessions = stores.chat.list_sessions(project_id).await?;
    let info = stores.metadata.get_index_info(project_id).await?;

    Ok(ProjectStats {
        project_id: project_id.to_string(),
        chunks: metadata_ids.len(),
        vectors: vector_ids.len(),
        missing_vectors: metadata_ids.difference(&vector_ids).count(),
        orphan_vectors: vector_ids.difference(&metadata_ids).count(),
        sessions: sessions.len(),
        archived_sessions: sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Archived)
            .count(),
        index_status: info.as_ref().map(|i| i.status.as_str().to_string()),
        last_reconciled_at: info.and_then(|i| i.last_reconciled_at),
    })
}

/// Run the stats command: query both databases and print a summary.
pub async fn run_stats(config: &Config, project: Option<&str>) -> Result<()> {
    let project_ids: Vec<String> = match project {
        Some(id) => {
            config.project(id)?;
            vec![id.to_string()]
        }
        None => config.projects.keys().cloned().collect(),
    };

    let stores = Stores::open(config).await?;
    let mut all = Vec::with_capacity(project_ids.len());
    for id in &project_ids {
        all.push(collect_project_stats(&stores, id).await?);
    }
    stores.close().await;

    let db_size = file_size(&config.db.path);
    let vector_size = file_size(&config.vector_path());

    println!("repochat stats");
    println!("==============");
    println!();
    println!(
        "  Metadata DB: {} ({})",
        config.db.path.display(),
        format_bytes(db_size)
    );
    println!(
        "  Vector DB:   {} ({})",
        config.vector_path().display(),
        format_bytes(vector_size)
    );

    if all.is_empty() {
        println!();
        println!("  No projects configured.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  {:<20} {:>8} {:>8}  {:<12} {:>9}   {}",
        "PROJECT", "CHUNKS", "VECTORS", "CONSISTENT", "SESSIONS", "LAST RECONCILE"
    );
    println!("  {}", "-".repeat(84));
    for s in &all {
        let consistent = if s.is_consistent() { "yes" } else { "NO" };
        let last = match s.last_reconciled_at {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        };
        println!(
            "  {:<20} {:>8} {:>8}  {:<12} {:>9}   {}",
            s.project_id, s.chunks, s.vectors, consistent, s.sessions, last
        );
    }

    for s in all.iter().filter(|s| !s.is_consistent()) {
        println!();
        println!(
            "  {}: {} chunks without vectors, {} orphan vectors. Run `repochat reconcile {}`.",
            s.project_id, s.missing_vectors, s.orphan_vectors, s.project_id
        );
    }
    if let Some(s) = all.iter().find(|s| s.index_status.as_deref() == Some("failed")) {
        println!();
        println!("  {}: last reconcile failed, see `repochat projects`.", s.project_id);
    }

    println!();
    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }

    #[test]
    fn test_consistency_flag() {
        let mut s = ProjectStats {
            project_id: "p".into(),
            chunks: 2,
            vectors: 2,
            missing_vectors: 0,
            orphan_vectors: 0,
            sessions: 0,
            archived_sessions: 0,
            index_status: None,
            last_reconciled_at: None,
        };
        assert!(s.is_consistent());
        s.orphan_vectors = 1;
        assert!(!s.is_consistent());
    }
}
