//! Grounded concern extraction.
//!
//! The model proposes concerns as `{statement, evidence}` pairs. Output is
//! validated against a fixed shape, then every concern is checked against the
//! raw feedback: the evidence must be found there and the statement must be
//! worded from that evidence. Survivors are ordered by where their evidence appears
//! and near-duplicates are collapsed, keeping the earliest mention.

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::json_payload;
use crate::error::FeedbackError;
use crate::knowledge::{cosine_similarity, Embedder};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::{StandardContext, StandardId};
use crate::text;

/// Longest accepted concern statement, in characters.
pub const MAX_STATEMENT_CHARS: usize = 200;

/// Share of evidence words that must be found in the feedback when the
/// evidence is paraphrased rather than quoted.
const EVIDENCE_COVERAGE: f32 = 0.6;

/// Share of a statement's words that must come from its evidence span.
const STATEMENT_COVERAGE: f32 = 0.5;

/// Shape the model must return.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExtractionOutput {
    /// Areas needing improvement, each tied to a quoted span of the feedback.
    pub concerns: Vec<ConcernCandidate>,
    /// Strengths the preceptor observed.
    #[serde(default)]
    pub strengths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConcernCandidate {
    /// Short, specific description of the concern.
    pub statement: String,
    /// Span of the feedback the concern is drawn from, quoted verbatim.
    pub evidence: String,
}

/// Concerns and strengths for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub concerns: Vec<String>,
    pub strengths: Vec<String>,
    /// The model output never validated, so the lists are empty by default.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct ConcernExtractor {
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    dedup_jaccard: f32,
    dedup_cosine: f32,
}

impl ConcernExtractor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        dedup_jaccard: f32,
        dedup_cosine: f32,
    ) -> Self {
        Self {
            model,
            embedder,
            dedup_jaccard,
            dedup_cosine,
        }
    }

    /// Extract grounded, deduplicated concerns from `feedback`.
    ///
    /// A shape or validation failure is retried once with a stricter
    /// directive; a second failure yields empty lists with `degraded` set.
    /// A model that cannot be reached is fatal.
    pub async fn extract(
        &self,
        feedback: &str,
        context: &StandardContext,
    ) -> Result<Extraction, FeedbackError> {
        if text::content_words(feedback).is_empty() {
            return Ok(Extraction::default());
        }

        let standard = context.standard_id();
        let mut output = None;
        for strict in [false, true] {
            let request = CompletionRequest::new(
                system_prompt(standard, context, strict),
                user_prompt(feedback),
            )
            .json();
            let raw = self
                .model
                .complete(request)
                .await
                .map_err(|e| FeedbackError::Synthesis(format!("concern extraction: {}", e)))?;
            match parse_output(&raw) {
                Ok(parsed) => {
                    output = Some(parsed);
                    break;
                }
                Err(e) => warn!(strict, "Rejected extraction output: {}", e),
            }
        }

        let Some(output) = output else {
            warn!(standard = %standard, "Extraction failed twice, continuing without concerns");
            return Ok(Extraction {
                degraded: true,
                ..Extraction::default()
            });
        };

        let grounded = ground(feedback, output.concerns);
        let concerns = self.dedup(grounded).await;
        let feedback_words = text::content_words(feedback);
        let strengths = output
            .strengths
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| is_worded_from(s, &feedback_words))
            .collect();

        debug!(standard = %standard, concerns = concerns.len(), "Extracted concerns");
        Ok(Extraction {
            concerns,
            strengths,
            degraded: false,
        })
    }

    /// Drop later statements that restate an earlier one.
    async fn dedup(&self, statements: Vec<String>) -> Vec<String> {
        if statements.len() < 2 {
            return statements;
        }
        let vectors = match self.embedder.embed_batch(&statements).await {
            Ok(v) if v.len() == statements.len() => Some(v),
            Ok(_) => None,
            Err(e) => {
                warn!("Embedding concerns for dedup failed, using lexical similarity only: {}", e);
                None
            }
        };
        let words: Vec<Vec<String>> = statements.iter().map(|s| text::content_words(s)).collect();

        let mut kept: Vec<usize> = Vec::new();
        for i in 0..statements.len() {
            let duplicate = kept.iter().any(|&j| {
                let lexical = text::jaccard(&words[i], &words[j]) >= self.dedup_jaccard;
                let semantic = vectors
                    .as_ref()
                    .and_then(|v| cosine_similarity(&v[i], &v[j]))
                    .is_some_and(|sim| sim >= self.dedup_cosine);
                lexical || semantic
            });
            if duplicate {
                debug!(statement = %statements[i], "Collapsed duplicate concern");
            } else {
                kept.push(i);
            }
        }
        kept.into_iter().map(|i| statements[i].clone()).collect()
    }
}

/// Parse and validate a raw model response.
pub fn parse_output(raw: &str) -> Result<ExtractionOutput, FeedbackError> {
    let output: ExtractionOutput = serde_json::from_str(json_payload(raw))
        .map_err(|e| FeedbackError::Extraction(format!("malformed output: {}", e)))?;
    for (index, concern) in output.concerns.iter().enumerate() {
        let statement = concern.statement.trim();
        if statement.is_empty() {
            return Err(FeedbackError::Extraction(format!(
                "concern {} has an empty statement",
                index
            )));
        }
        if statement.chars().count() > MAX_STATEMENT_CHARS {
            return Err(FeedbackError::Extraction(format!(
                "concern {} exceeds {} characters",
                index, MAX_STATEMENT_CHARS
            )));
        }
        if concern.evidence.trim().is_empty() {
            return Err(FeedbackError::Extraction(format!(
                "concern {} has no evidence",
                index
            )));
        }
    }
    Ok(output)
}

/// Where a concern's evidence sits in the feedback and which of its words
/// were found there.
struct Evidence {
    position: usize,
    words: Vec<String>,
}

/// Keep concerns traceable to `feedback`, ordered by evidence position.
pub fn ground(feedback: &str, candidates: Vec<ConcernCandidate>) -> Vec<String> {
    let mut located: Vec<(usize, usize, String)> = candidates
        .into_iter()
        .enumerate()
        .filter_map(|(index, c)| {
            let statement = c.statement.trim().to_string();
            let Some(evidence) = locate_evidence(feedback, &c.evidence) else {
                debug!(statement = %statement, "Dropped concern with evidence not in feedback");
                return None;
            };
            if !is_worded_from(&statement, &evidence.words) {
                debug!(statement = %statement, "Dropped concern not supported by its evidence");
                return None;
            }
            Some((evidence.position, index, statement))
        })
        .collect();
    located.sort_by_key(|(position, index, _)| (*position, *index));
    located.into_iter().map(|(_, _, s)| s).collect()
}

/// Find `evidence` in the normalized feedback, quoted or paraphrased.
fn locate_evidence(feedback: &str, evidence: &str) -> Option<Evidence> {
    let feedback_norm = text::normalize(feedback);
    let evidence_norm = text::normalize(evidence);
    if evidence_norm.is_empty() {
        return None;
    }
    let evidence_words = text::content_words(evidence);
    if let Some(position) = feedback_norm.find(&evidence_norm) {
        return Some(Evidence {
            position,
            words: evidence_words,
        });
    }

    let feedback_words = text::content_words(feedback);
    if text::coverage(&evidence_words, &feedback_words) < EVIDENCE_COVERAGE {
        return None;
    }
    // Only the paraphrased words actually present in the feedback count.
    let words: Vec<String> = evidence_words
        .into_iter()
        .filter(|e| feedback_words.iter().any(|f| text::stems_match(e, f)))
        .collect();
    let mut offset = 0;
    for word in feedback_norm.split(' ') {
        if words.iter().any(|e| text::stems_match(e, word)) {
            return Some(Evidence {
                position: offset,
                words,
            });
        }
        offset += word.len() + 1;
    }
    None
}

fn is_worded_from(statement: &str, source: &[String]) -> bool {
    let words = text::content_words(statement);
    !words.is_empty() && text::coverage(&words, source) >= STATEMENT_COVERAGE
}

fn system_prompt(standard: StandardId, context: &StandardContext, strict: bool) -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(ExtractionOutput))
        .unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!(
        "You are analyzing clinical feedback about a nursing student against BCCNM \
         Standard {number}: {name}.\n\n\
         Standard context (use it only to judge what is relevant to this standard, \
         never as a source of concerns):\n{context}\n\n\
         Identify:\n\
         1. concerns: specific areas where the student needs improvement. Each concern \
         needs a short statement (at most {max} characters) and the exact words of the \
         feedback it comes from as evidence.\n\
         2. strengths: what the student did well.\n\n\
         Merge concerns that describe the same issue. If the feedback contains no area \
         for improvement, return an empty concerns list.\n\n\
         Respond with JSON matching this schema:\n{schema}",
        number = standard,
        name = standard.full_name(),
        context = context.render(),
        max = MAX_STATEMENT_CHARS,
        schema = schema,
    );
    if strict {
        prompt.push_str(
            "\n\nYour previous answer could not be used. Return ONLY a JSON object with \
             the keys \"concerns\" and \"strengths\". No prose, no markdown fences, no \
             extra keys. Every concern must have a non-empty \"statement\" and an \
             \"evidence\" string copied verbatim from the feedback.",
        );
    }
    prompt
}

fn user_prompt(feedback: &str) -> String {
    format!("Preceptor feedback:\n{}", feedback.trim())
}
