use serde::{Deserialize, Serialize};

use super::standard::StandardId;

/// A retrieved reference passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub text: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
    /// Chunk identity, `doc_id#index`.
    pub source_id: String,
}

/// Standard-scoped retrieval result.
///
/// Produced once per standard transition and only read afterwards; the
/// fields are private so later stages cannot mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardContext {
    standard_id: StandardId,
    documents: Vec<ContextDocument>,
}

impl StandardContext {
    pub fn new(standard_id: StandardId, documents: Vec<ContextDocument>) -> Self {
        Self {
            standard_id,
            documents,
        }
    }

    pub fn empty(standard_id: StandardId) -> Self {
        Self::new(standard_id, Vec::new())
    }

    pub fn standard_id(&self) -> StandardId {
        self.standard_id
    }

    pub fn documents(&self) -> &[ContextDocument] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Passages joined for prompt inclusion.
    pub fn render(&self) -> String {
        if self.documents.is_empty() {
            return "No reference context available.".to_string();
        }
        self.documents
            .iter()
            .map(|d| format!("[{}]\n{}", d.source_id, d.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Pipeline invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub session_id: String,
    pub standard_id: i64,
    pub feedback_text: String,
}

/// Body of `POST /sessions/{id}/feedback`, where the session comes from the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitFeedbackInput {
    pub standard_id: i64,
    pub feedback_text: String,
}

/// A concern whose matched guidance is also tagged for other standards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub concern: String,
    pub also_applies_to: Vec<StandardId>,
}

/// Pipeline invocation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub context: StandardContext,
    pub concerns: Vec<String>,
    pub suggestions: String,
    pub synthesis: String,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_references: Vec<CrossReference>,
}
