//! Chat sessions and grounded turns.
//!
//! A session moves `created → active → archived`. At most one session per
//! project carries the `is_active` flag; creating or activating a session
//! moves the flag to it.
//!
//! # Turn flow
//!
//! 1. Reject empty text and archived sessions.
//! 2. Retrieve citations for the text.
//! 3. Place citations into a context block, best first, until
//!    `max_context_chars` is reached.
//! 4. Generate a reply from the system prompt, the context, the last
//!    `history_messages` messages, and the new text.
//! 5. Persist the user and assistant messages and the updated session in
//!    one store transaction.
//!
//! If generation fails, nothing is persisted.

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::error::RepoChatError;
use crate::generation::{GenerationRequest, Generator, PromptMessage};
use crate::models::{ChatMessage, ChatSession, Citation, Role, SessionStatus};
use crate::retrieve::{RetrievalQuery, Retriever};
use crate::store::{ChatStore, QueryFilter};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You answer questions about a source code repository. \
Base your answer on the numbered code excerpts provided. Cite excerpts as [n] with their file \
path and line range. If the excerpts do not contain the answer, say so.";

const DEFAULT_TITLE: &str = "New chat";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
    pub history_messages: usize,
    pub system_prompt: String,
    pub temperature: Option<f32>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            top_k: 8,
            min_score: 0.25,
            max_context_chars: 12_000,
            history_messages: 6,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: None,
        }
    }
}

/// Both messages written by a successful turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub session: ChatSession,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
}

pub struct ChatOrchestrator {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn ChatStore>,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn ChatStore>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Start a session. It becomes the project's flagged-active session.
    pub async fn create_session(&self, project_id: &str, title: Option<&str>) -> Result<ChatSession> {
        if project_id.trim().is_empty() {
            return Err(RepoChatError::validation("project id must not be empty").into());
        }
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        let now = chrono::Utc::now().timestamp();
        let session = ChatSession {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            status: SessionStatus::Created,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.save_session(&session).await?;
        tracing::info!(session = %session.id, project = project_id, "created chat session");
        Ok(session)
    }

    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<ChatSession>> {
        self.store.list_sessions(project_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ChatSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow::Error::from(RepoChatError::not_found("session", session_id)))
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_session(session_id).await?;
        self.store.list_messages(session_id).await
    }

    /// Mark a session active and move the project's active flag to it.
    pub async fn activate_session(&self, session_id: &str) -> Result<ChatSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Archived {
            return Err(RepoChatError::validation(format!(
                "session {} is archived and cannot be reactivated",
                session_id
            ))
            .into());
        }
        session.status = SessionStatus::Active;
        session.is_active = true;
        session.updated_at = chrono::Utc::now().timestamp();
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Archive a session. Archiving twice is a no-op.
    pub async fn archive_session(&self, session_id: &str) -> Result<ChatSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Archived {
            return Ok(session);
        }
        session.status = SessionStatus::Archived;
        session.is_active = false;
        session.updated_at = chrono::Utc::now().timestamp();
        self.store.save_session(&session).await?;
        Ok(session)
    }

    /// Answer one user turn. See the module docs for the flow.
    pub async fn post_turn(&self, session_id: &str, text: &str) -> Result<TurnResult> {
        self.post_turn_filtered(session_id, text, QueryFilter::default())
            .await
    }

    /// [`post_turn`](Self::post_turn) with retrieval restricted by `filter`.
    pub async fn post_turn_filtered(
        &self,
        session_id: &str,
        text: &str,
        filter: QueryFilter,
    ) -> Result<TurnResult> {
        if text.trim().is_empty() {
            return Err(RepoChatError::validation("message text must not be empty").into());
        }
        let mut session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Archived {
            return Err(RepoChatError::validation(format!(
                "session {} is archived",
                session_id
            ))
            .into());
        }

        let citations = self
            .retriever
            .retrieve(&RetrievalQuery {
                project_id: session.project_id.clone(),
                text: text.to_string(),
                top_k: self.settings.top_k,
                min_score: self.settings.min_score,
                filter,
            })
            .await
            .context("retrieving context")?;

        let (context, sources) = build_context(&citations, self.settings.max_context_chars);
        let history = if self.settings.history_messages > 0 {
            self.store
                .recent_messages(session_id, self.settings.history_messages)
                .await?
        } else {
            Vec::new()
        };

        let request = GenerationRequest {
            messages: build_prompt(&self.settings.system_prompt, &context, &history, text),
            temperature: self.settings.temperature,
        };
        let user_at = chrono::Utc::now().timestamp();
        let reply = self
            .generator
            .generate(&request)
            .await
            .context("generating reply")?;

        let now = chrono::Utc::now().timestamp();
        let user_message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            role: Role::User,
            content: text.to_string(),
            sources: Vec::new(),
            created_at: user_at,
        };
        let assistant_message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            role: Role::Assistant,
            content: reply,
            sources,
            created_at: now,
        };

        session.status = SessionStatus::Active;
        session.is_active = true;
        session.updated_at = now;

        self.store
            .commit_turn(&session, &[user_message.clone(), assistant_message.clone()])
            .await?;

        tracing::info!(
            session = %session.id,
            citations = assistant_message.sources.len(),
            "turn completed"
        );

        Ok(TurnResult {
            session,
            user_message,
            assistant_message,
        })
    }
}

/// Render citations into a numbered context block.
///
/// Citations are placed best first until the next block would exceed
/// `max_chars`. A first block that alone is too long is truncated so the
/// best hit is always present. Returns the block and the citations
/// actually placed.
pub fn build_context(citations: &[Citation], max_chars: usize) -> (String, Vec<Citation>) {
    let mut context = String::new();
    let mut used_chars = 0usize;
    let mut placed = Vec::new();

    for citation in citations {
        let block = render_block(placed.len() + 1, citation);
        let block_chars = block.chars().count();

        if used_chars + block_chars > max_chars {
            if placed.is_empty() && max_chars > 0 {
                let truncated: String = block.chars().take(max_chars).collect();
                context.push_str(&truncated);
                placed.push(citation.clone());
            }
            break;
        }

        context.push_str(&block);
        used_chars += block_chars;
        placed.push(citation.clone());
    }

    (context, placed)
}

fn render_block(n: usize, c: &Citation) -> String {
    format!(
        "[{}] {}:{}-{}\n```{}\n{}\n```\n\n",
        n,
        c.file_path,
        c.start_line,
        c.end_line,
        c.language.as_deref().unwrap_or(""),
        c.snippet.trim_end_matches('\n')
    )
}

fn build_prompt(
    system_prompt: &str,
    context: &str,
    history: &[ChatMessage],
    text: &str,
) -> Vec<PromptMessage> {
    let system = if context.is_empty() {
        format!(
            "{}\n\nNo code excerpts matched this question.",
            system_prompt
        )
    } else {
        format!("{}\n\nCode excerpts:\n\n{}", system_prompt, context.trim_end())
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(Role::System, system));
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| PromptMessage::new(m.role, m.content.clone())),
    );
    messages.push(PromptMessage::new(Role::User, text));
    messages
}
