//! The feedback synthesis pipeline.
//!
//! ```text
//! retrieve -> extract concerns -> retrieve suggestions -> synthesize
//! ```
//!
//! Each stage starts only after the previous one has returned. Retrieval and
//! extraction problems degrade the invocation; a model that cannot be reached
//! during extraction or synthesis aborts it. The pipeline never writes
//! anything, so an aborted invocation leaves no trace.

mod extractor;
mod retriever;
mod suggestions;
mod synthesizer;

pub use extractor::{
    ground, parse_output, ConcernCandidate, ConcernExtractor, Extraction, ExtractionOutput,
    MAX_STATEMENT_CHARS,
};
pub use retriever::Retriever;
pub use suggestions::{SuggestionRetriever, Suggestions};
pub use synthesizer::{render, CoinDraft, SynthesisInput, Synthesizer};

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::PipelineSettings;
use crate::error::FeedbackError;
use crate::knowledge::KnowledgeStore;
use crate::llm::LanguageModel;
use crate::models::{CrossReference, FeedbackResponse, StandardContext, StandardId};

/// Working state of one invocation. Dropped once the response is built.
#[derive(Debug, Clone)]
pub struct FeedbackState {
    pub standard_id: StandardId,
    pub raw_feedback: String,
    pub context: StandardContext,
    pub concerns: Vec<String>,
    pub strengths: Vec<String>,
    pub suggestions: String,
    pub synthesis: String,
    pub degraded: bool,
    pub cross_references: Vec<CrossReference>,
}

impl FeedbackState {
    fn new(standard_id: StandardId, raw_feedback: &str) -> Self {
        Self {
            standard_id,
            raw_feedback: raw_feedback.to_string(),
            context: StandardContext::empty(standard_id),
            concerns: Vec::new(),
            strengths: Vec::new(),
            suggestions: String::new(),
            synthesis: String::new(),
            degraded: false,
            cross_references: Vec::new(),
        }
    }

    pub fn into_response(self) -> FeedbackResponse {
        FeedbackResponse {
            context: self.context,
            concerns: self.concerns,
            suggestions: self.suggestions,
            synthesis: self.synthesis,
            degraded: self.degraded,
            cross_references: self.cross_references,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    retriever: Retriever,
    extractor: ConcernExtractor,
    suggestions: SuggestionRetriever,
    synthesizer: Synthesizer,
}

impl Pipeline {
    pub fn new(
        store: Arc<KnowledgeStore>,
        model: Arc<dyn LanguageModel>,
        settings: &PipelineSettings,
        synthesis_temperature: f32,
    ) -> Self {
        Self {
            retriever: Retriever::new(Arc::clone(&store), settings.top_k),
            extractor: ConcernExtractor::new(
                Arc::clone(&model),
                Arc::clone(store.embedder()),
                settings.dedup_jaccard,
                settings.dedup_cosine,
            ),
            suggestions: SuggestionRetriever::new(
                store,
                settings.suggestion_candidates,
                settings.suggestion_threshold,
                settings.dual_tag_policy,
            ),
            synthesizer: Synthesizer::new(model, synthesis_temperature),
        }
    }

    pub async fn run(
        &self,
        standard: StandardId,
        feedback: &str,
    ) -> Result<FeedbackResponse, FeedbackError> {
        let mut state = FeedbackState::new(standard, feedback);

        match self.retriever.retrieve_for(standard).await {
            Ok(context) => state.context = context,
            Err(e) => {
                warn!(standard = %standard, "Continuing without standard context: {}", e);
            }
        }
        if state.context.is_empty() {
            state.degraded = true;
        }

        let extraction = self.extractor.extract(feedback, &state.context).await?;
        state.degraded |= extraction.degraded;
        state.concerns = extraction.concerns;
        state.strengths = extraction.strengths;

        let suggestions = self.suggestions.retrieve(standard, &state.concerns).await;
        state.degraded |= suggestions.degraded;
        state.suggestions = suggestions.text;
        state.cross_references = suggestions.cross_references;

        state.synthesis = self
            .synthesizer
            .synthesize(SynthesisInput {
                standard,
                feedback,
                context: &state.context,
                concerns: &state.concerns,
                strengths: &state.strengths,
                suggestions: &state.suggestions,
            })
            .await?;

        info!(
            standard = %standard,
            concerns = state.concerns.len(),
            documents = state.context.documents().len(),
            degraded = state.degraded,
            "Pipeline invocation complete"
        );
        Ok(state.into_response())
    }
}

/// The JSON object inside a model response, without markdown fences.
pub(crate) fn json_payload(raw: &str) -> &str {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    unfenced.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_strips_fences() {
        assert_eq!(json_payload("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(json_payload("```\n{}\n```"), "{}");
        assert_eq!(json_payload("  {\"b\": 2} "), "{\"b\": 2}");
    }
}
