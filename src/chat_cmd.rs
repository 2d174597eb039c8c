//! `repochat chat ...`: session management and question answering.
//!
//! Only `ask` talks to the embedding and generation providers; the other
//! subcommands read and write the chat store alone.

use anyhow::{bail, Result};
use std::sync::Arc;

use repo_chat_core::chat::ChatOrchestrator;
use repo_chat_core::models::{ChatMessage, ChatSession, Role};
use repo_chat_core::store::QueryFilter;

use crate::app::Stores;
use crate::config::Config;
use crate::embedding::{self, DisabledEmbedder};
use crate::generation::{self, DisabledGenerator};
use crate::stats::format_ts_iso;

fn offline_orchestrator(config: &Config, stores: &Stores) -> ChatOrchestrator {
    stores.orchestrator(config, Arc::new(DisabledEmbedder), Arc::new(DisabledGenerator))
}

pub async fn run_new(config: &Config, project_id: &str, title: Option<&str>) -> Result<()> {
    config.project(project_id)?;
    let stores = Stores::open(config).await?;
    let session = offline_orchestrator(config, &stores)
        .create_session(project_id, title)
        .await;
    stores.close().await;

    let session = session?;
    println!("{}", session.id);
    println!("  title: {}", session.title);
    println!("  status: {}", session.status.as_str());
    Ok(())
}

pub async fn run_list(config: &Config, project_id: &str) -> Result<()> {
    let stores = Stores::open(config).await?;
    let sessions = offline_orchestrator(config, &stores)
        .list_sessions(project_id)
        .await;
    stores.close().await;

    let sessions = sessions?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    println!(
        "  {:<36}  {:<9} {:<16}  {}",
        "SESSION", "STATUS", "UPDATED", "TITLE"
    );
    for s in &sessions {
        println!(
            "{} {:<36}  {:<9} {:<16}  {}",
            if s.is_active { "*" } else { " " },
            s.id,
            s.status.as_str(),
            format_ts_iso(s.updated_at),
            s.title
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, session_id: &str) -> Result<()> {
    let stores = Stores::open(config).await?;
    let orchestrator = offline_orchestrator(config, &stores);
    let result = async {
        let session = orchestrator.get_session(session_id).await?;
        let messages = orchestrator.list_messages(session_id).await?;
        Ok::<_, anyhow::Error>((session, messages))
    }
    .await;
    stores.close().await;

    let (session, messages) = result?;
    print_session_header(&session);
    for m in &messages {
        println!();
        print_message(m);
    }
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    session_id: &str,
    text: &str,
    filter: QueryFilter,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Chat requires an embedding provider. Set [embedding] provider in config.");
    }
    if !config.generation.is_enabled() {
        bail!("Chat requires a generation provider. Set [generation] provider in config.");
    }

    let embedder = embedding::create_embedder(&config.embedding)?;
    let generator = generation::create_generator(&config.generation)?;
    let stores = Stores::open(config).await?;
    let turn = stores
        .orchestrator(config, embedder, generator)
        .post_turn_filtered(session_id, text, filter)
        .await;
    stores.close().await;

    let turn = turn?;
    print_message(&turn.assistant_message);
    Ok(())
}

pub async fn run_archive(config: &Config, session_id: &str) -> Result<()> {
    let stores = Stores::open(config).await?;
    let session = offline_orchestrator(config, &stores)
        .archive_session(session_id)
        .await;
    stores.close().await;

    let session = session?;
    println!("{} archived", session.id);
    Ok(())
}

pub async fn run_activate(config: &Config, session_id: &str) -> Result<()> {
    let stores = Stores::open(config).await?;
    let session = offline_orchestrator(config, &stores)
        .activate_session(session_id)
        .await;
    stores.close().await;

    let session = session?;
    println!("{} active", session.id);
    Ok(())
}

fn print_session_header(session: &ChatSession) {
    println!("{}", session.title);
    println!("  id: {}", session.id);
    println!("  project: {}", session.project_id);
    println!(
        "  status: {}{}",
        session.status.as_str(),
        if session.is_active { " (active)" } else { "" }
    );
    println!("  created: {}", format_ts_iso(session.created_at));
}

fn print_message(message: &ChatMessage) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    println!("[{}] {}", who, format_ts_iso(message.created_at));
    println!("{}", message.content.trim_end());

    if message.role == Role::Assistant {
        if message.sources.is_empty() {
            println!("  (no sources)");
        } else {
            println!("  sources:");
            for (i, c) in message.sources.iter().enumerate() {
                println!(
                    "    [{}] {}:{}-{} ({:.2})",
                    i + 1,
                    c.file_path,
                    c.start_line,
                    c.end_line,
                    c.score
                );
            }
        }
    }
}
