//! Query-time retrieval.
//!
//! Embeds a question as a single-text batch, runs a filtered similarity
//! query against the project's vectors, and maps hits to [`Citation`]s.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::Embedder;
use crate::error::RepoChatError;
use crate::models::Citation;
use crate::store::{QueryFilter, VectorIndex};

/// Parameters for one retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub project_id: String,
    pub text: String,
    pub top_k: usize,
    /// Inclusive lower bound on cosine similarity, in `[-1, 1]`.
    pub min_score: f32,
    pub filter: QueryFilter,
}

impl RetrievalQuery {
    pub fn new(project_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            text: text.into(),
            top_k: 8,
            min_score: 0.25,
            filter: QueryFilter::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(RepoChatError::validation("project id must not be empty").into());
        }
        if self.text.trim().is_empty() {
            return Err(RepoChatError::validation("query text must not be empty").into());
        }
        if self.top_k == 0 {
            return Err(RepoChatError::validation("top_k must be at least 1").into());
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(RepoChatError::validation(format!(
                "min_score must be within [-1, 1], got {}",
                self.min_score
            ))
            .into());
        }
        Ok(())
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, vectors: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, vectors }
    }

    /// Ranked citations for `query`, best first.
    ///
    /// An empty result is not an error: it means nothing cleared
    /// `min_score`. A query embedding whose length differs from the
    /// project's stored vectors is a consistency error.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Citation>> {
        query.validate()?;

        let embeddings = self
            .embedder
            .embed(std::slice::from_ref(&query.text))
            .await
            .context("embedding query")?;

        let Some(vector) = embeddings.vectors.into_iter().next() else {
            return Err(RepoChatError::consistency("embedder returned no vector for the query").into());
        };
        if vector.len() != self.embedder.dims() {
            return Err(RepoChatError::consistency(format!(
                "query embedding has {} dims, index expects {}",
                vector.len(),
                self.embedder.dims()
            ))
            .into());
        }
        // Cosine over mismatched lengths is undefined.
        if let Some(stored) = self.vectors.dims(&query.project_id).await? {
            if stored != vector.len() {
                return Err(RepoChatError::consistency(format!(
                    "project {} is indexed with {}-dim vectors, query embedding has {}; \
                     run a full reconcile",
                    query.project_id,
                    stored,
                    vector.len()
                ))
                .into());
            }
        }

        let hits = self
            .vectors
            .query(
                &query.project_id,
                &vector,
                query.top_k,
                query.min_score,
                &query.filter,
            )
            .await?;

        tracing::debug!(
            project = %query.project_id,
            hits = hits.len(),
            top_k = query.top_k,
            "retrieved"
        );

        Ok(hits.into_iter().map(Citation::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_validate_rejects_bad_queries() {
        let ok = RetrievalQuery::new("p", "where is main?");
        assert!(ok.validate().is_ok());

        let cases = [
            RetrievalQuery::new("p", "   "),
            RetrievalQuery { top_k: 0, ..ok.clone() },
            RetrievalQuery { min_score: 1.5, ..ok.clone() },
            RetrievalQuery { min_score: -1.01, ..ok.clone() },
            RetrievalQuery::new("", "q"),
        ];
        for q in cases {
            let err = q.validate().unwrap_err();
            assert_eq!(ErrorKind::of(&err), ErrorKind::Validation, "{:?}", q);
        }
    }
}
