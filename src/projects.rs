//! `repochat projects`: configured projects and their index state.

use anyhow::Result;

use repo_chat_core::store::ChunkMetadataStore;

use crate::app::Stores;
use crate::config::Config;
use crate::stats::format_ts_iso;

pub async fn list_projects(config: &Config) -> Result<()> {
    if config.projects.is_empty() {
        println!("No projects configured. Add a [projects.<id>] section to the config.");
        return Ok(());
    }

    let stores = Stores::open(config).await?;

    println!(
        "{:<20} {:<8} {:>8}  {:<10} {}",
        "PROJECT", "ROOT", "CHUNKS", "STATUS", "LAST RECONCILE"
    );
    for (id, project) in &config.projects {
        let root = if project.root.is_dir() { "OK" } else { "MISSING" };
        let chunks = stores.metadata.count(id).await?;
        let info = stores.metadata.get_index_info(id).await?;

        let (status, last) = match &info {
            Some(info) => (
                info.status.as_str().to_string(),
                info.last_reconciled_at
                    .map(format_ts_iso)
                    .unwrap_or_else(|| "never".to_string()),
            ),
            None => ("new".to_string(), "never".to_string()),
        };
        println!(
            "{:<20} {:<8} {:>8}  {:<10} {}",
            id, root, chunks, status, last
        );
        if let Some(err) = info.as_ref().and_then(|i| i.last_error.as_deref()) {
            println!("    last error: {}", err);
        }
    }

    stores.close().await;
    Ok(())
}
