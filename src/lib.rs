//! # repo-chat
//!
//! Ask questions about a codebase and get answers grounded in its source,
//! with file/line citations.
//!
//! This crate is the application layer around
//! [`repo_chat_core`]: it supplies SQLite-backed stores, HTTP embedding
//! and generation clients, a filesystem file source, and the `repochat`
//! CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────────┐   ┌────────────────┐
//! │ FileSource  │──▶│ IndexReconciler │──▶│ metadata.sqlite│
//! │ (walkdir)   │   │ chunk + embed   │   │ vectors.sqlite │
//! └─────────────┘   └─────────────────┘   └───────┬────────┘
//!                                                 │
//!                             ┌───────────────────┤
//!                             ▼                   ▼
//!                       ┌──────────┐     ┌──────────────────┐
//!                       │Retriever │────▶│ ChatOrchestrator │
//!                       └──────────┘     └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! repochat init
//! repochat reconcile backend
//! repochat search backend "where are retries configured"
//! repochat chat new backend --title "onboarding"
//! repochat chat ask <session-id> "how does the reconciler stay consistent?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite connections and schema |
//! | [`sqlite_store`] | Chunk metadata and chat persistence |
//! | [`sqlite_vectors`] | Vector index in its own database |
//! | [`embedding`] / [`generation`] | HTTP model clients |
//! | [`file_source`] | Filesystem walker with include/exclude globs |
//! | [`app`] | Store bundle and component wiring |
//! | [`progress`] | Reconcile progress on stderr |

pub mod app;
pub mod chat_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod file_source;
pub mod generation;
pub mod migrate;
pub mod progress;
pub mod projects;
pub mod reconcile_cmd;
pub mod remote;
pub mod search;
pub mod sqlite_store;
pub mod sqlite_vectors;
pub mod stats;
