//! # repo-chat core
//!
//! Runtime-agnostic logic for repo-chat: data models, chunk extraction,
//! store abstractions, index reconciliation, retrieval, and chat
//! orchestration.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network
//! dependencies. Remote capabilities (embedding, text generation) and
//! persistence are reached through the traits in [`embedding`],
//! [`generation`], and [`store`]; the `repo-chat` application crate
//! provides the SQLite and HTTP implementations.
//!
//! ```text
//! file set ─▶ ChunkExtractor ─▶ IndexReconciler ─┬─▶ VectorIndex
//!                                   │            └─▶ ChunkMetadataStore
//!                                   ▼
//!                               Embedder
//!
//! question ─▶ ChatOrchestrator ─▶ Retriever ─▶ VectorIndex
//!                   │
//!                   └─▶ Generator ─▶ ChatStore
//! ```

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod models;
pub mod progress;
pub mod reconcile;
pub mod retrieve;
pub mod store;

pub use error::{ErrorKind, RepoChatError};
