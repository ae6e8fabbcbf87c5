use std::sync::Arc;

use crate::knowledge::{Collection, KnowledgeStore, SearchQuery};
use crate::error::FeedbackError;
use crate::models::{ContextDocument, StandardContext, StandardId};

/// Standard-scoped search over the standards-of-practice collection.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<KnowledgeStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>, top_k: usize) -> Self {
        Self { store, top_k }
    }

    /// Top `k` passages tagged for `standard`, ranked against `query`.
    ///
    /// Zero matching documents is an empty context, not an error. An error
    /// means the store could not be queried at all.
    pub async fn retrieve(
        &self,
        standard: StandardId,
        query: &str,
    ) -> Result<StandardContext, FeedbackError> {
        let hits = self
            .store
            .search(SearchQuery {
                collection: Collection::Standards,
                standard,
                text: query,
                limit: self.top_k,
                include_generic: true,
            })
            .await
            .map_err(|e| FeedbackError::Retrieval(format!("standard {}: {}", standard, e)))?;

        let documents = hits
            .into_iter()
            .map(|hit| ContextDocument {
                text: hit.text,
                score: hit.score,
                source_id: hit.chunk_id,
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            standard = %standard,
            documents = documents.len(),
            "Retrieved standard context"
        );
        Ok(StandardContext::new(standard, documents))
    }

    /// Retrieve using the standard's canonical description as the query.
    pub async fn retrieve_for(&self, standard: StandardId) -> Result<StandardContext, FeedbackError> {
        self.retrieve(standard, &standard.canonical_query()).await
    }
}
