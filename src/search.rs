//! `repochat search <project> "<query>"`: print ranked citations.

use anyhow::{bail, Result};

use repo_chat_core::models::{ChunkKind, Citation};
use repo_chat_core::retrieve::RetrievalQuery;
use repo_chat_core::store::QueryFilter;

use crate::app::Stores;
use crate::config::Config;
use crate::embedding;

/// Command-line overrides for one search.
#[derive(Debug, Default, Clone)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub path_prefix: Option<String>,
    pub language: Option<String>,
    pub kind: Option<ChunkKind>,
}

impl SearchOptions {
    pub fn to_query(&self, config: &Config, project_id: &str, text: &str) -> RetrievalQuery {
        RetrievalQuery {
            project_id: project_id.to_string(),
            text: text.to_string(),
            top_k: self.top_k.unwrap_or(config.retrieval.top_k),
            min_score: self.min_score.unwrap_or(config.retrieval.min_score),
            filter: QueryFilter {
                path_prefix: self.path_prefix.clone(),
                language: self.language.clone(),
                kind: self.kind,
            },
        }
    }
}

pub async fn run_search(
    config: &Config,
    project_id: &str,
    text: &str,
    options: &SearchOptions,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires an embedding provider. Set [embedding] provider in config.");
    }
    config.project(project_id)?;

    let embedder = embedding::create_embedder(&config.embedding)?;
    let stores = Stores::open(config).await?;
    let retriever = stores.retriever(embedder);
    let query = options.to_query(config, project_id, text);
    let results = retriever.retrieve(&query).await;
    stores.close().await;

    print_citations(&results?);
    Ok(())
}

pub fn print_citations(citations: &[Citation]) {
    if citations.is_empty() {
        println!("No results.");
        return;
    }

    for (i, c) in citations.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}:{}-{}",
            i + 1,
            c.score,
            c.file_path,
            c.start_line,
            c.end_line
        );
        if let Some(lang) = &c.language {
            println!("    language: {}", lang);
        }
        println!("    excerpt: \"{}\"", excerpt(&c.snippet, 160));
        println!("    id: {}", c.chunk_id);
        println!();
    }
}

/// First `max_chars` characters of `text` on a single line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
