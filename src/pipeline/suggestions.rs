//! Strategy lookup for extracted concerns.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DualTagPolicy;
use crate::knowledge::{Collection, KnowledgeStore, SearchQuery};
use crate::models::{CrossReference, StandardId};

/// Guidance text keyed by concern topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestions {
    /// Never empty.
    pub text: String,
    /// True when no concern matched a strategy and generic guidance was used.
    pub generic: bool,
    /// The strategy collection could not be searched.
    pub degraded: bool,
    pub cross_references: Vec<CrossReference>,
}

#[derive(Clone)]
pub struct SuggestionRetriever {
    store: Arc<KnowledgeStore>,
    candidates: usize,
    threshold: f32,
    policy: DualTagPolicy,
}

impl SuggestionRetriever {
    pub fn new(
        store: Arc<KnowledgeStore>,
        candidates: usize,
        threshold: f32,
        policy: DualTagPolicy,
    ) -> Self {
        Self {
            store,
            candidates,
            threshold,
            policy,
        }
    }

    /// Best strategy block per concern, in concern order, or the standard's
    /// generic guidance when nothing scores strictly above the threshold.
    pub async fn retrieve(&self, standard: StandardId, concerns: &[String]) -> Suggestions {
        let mut blocks: Vec<String> = Vec::new();
        let mut topics: Vec<String> = Vec::new();
        let mut cross_references = Vec::new();

        for concern in concerns {
            let hits = match self
                .store
                .search(SearchQuery {
                    collection: Collection::Strategies,
                    standard,
                    text: concern,
                    limit: self.candidates,
                    include_generic: false,
                })
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(standard = %standard, "Strategy search failed, using generic guidance: {}", e);
                    return self.fallback(standard, true);
                }
            };

            // Hits are ranked, so the first hit is the best chunk of the best topic.
            let Some(best) = hits.into_iter().next() else {
                continue;
            };
            if best.score <= self.threshold {
                debug!(concern = %concern, score = best.score, "No strategy above threshold");
                continue;
            }

            if self.policy == DualTagPolicy::AllTagged {
                let others = best.doc.other_standards(standard);
                if !others.is_empty() {
                    cross_references.push(CrossReference {
                        concern: concern.clone(),
                        also_applies_to: others,
                    });
                }
            }

            if topics.contains(&best.doc.topic) {
                continue;
            }
            topics.push(best.doc.topic.clone());
            blocks.push(format!("### {}\n{}", best.doc.title, best.text));
        }

        if blocks.is_empty() {
            let mut fallback = self.fallback(standard, false);
            fallback.cross_references = cross_references;
            return fallback;
        }

        Suggestions {
            text: blocks.join("\n\n"),
            generic: false,
            degraded: false,
            cross_references,
        }
    }

    fn fallback(&self, standard: StandardId, degraded: bool) -> Suggestions {
        let guidance = self
            .store
            .generic_guidance(standard)
            .unwrap_or_else(|| standard.builtin_guidance());
        Suggestions {
            text: format!("### General guidance: {}\n{}", standard.full_name(), guidance),
            generic: true,
            degraded,
            cross_references: Vec::new(),
        }
    }
}
