//! COIN narrative synthesis.
//!
//! The model writes the prose for each part; the four-part skeleton is always
//! rendered here, and a part the model leaves out is filled from the inputs.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use super::json_payload;
use crate::error::FeedbackError;
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::{StandardContext, StandardId};

const MAX_NEXT_STEPS: usize = 4;

/// Everything the synthesizer reads. Nothing here is modified.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub standard: StandardId,
    pub feedback: &'a str,
    pub context: &'a StandardContext,
    pub concerns: &'a [String],
    pub strengths: &'a [String],
    pub suggestions: &'a str,
}

/// The four filled parts, before rendering.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CoinDraft {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub observation: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, temperature: f32) -> Self {
        Self { model, temperature }
    }

    pub async fn synthesize(&self, input: SynthesisInput<'_>) -> Result<String, FeedbackError> {
        let request = CompletionRequest::new(system_prompt(&input), user_prompt(&input))
            .temperature(self.temperature)
            .json();
        let raw = self
            .model
            .complete(request)
            .await
            .map_err(|e| FeedbackError::Synthesis(e.to_string()))?;

        let draft = match serde_json::from_str::<CoinDraft>(json_payload(&raw)) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(standard = %input.standard, "Synthesis output was not JSON, using fallback parts: {}", e);
                CoinDraft::default()
            }
        };
        Ok(render(&input, draft))
    }
}

/// Render the fixed skeleton, filling any missing part.
pub fn render(input: &SynthesisInput<'_>, draft: CoinDraft) -> String {
    let context = non_empty(draft.context).unwrap_or_else(|| fallback_context(input));
    let observation = non_empty(draft.observation).unwrap_or_else(|| fallback_observation(input));
    let impact = non_empty(draft.impact).unwrap_or_else(|| fallback_impact(input));

    let mut steps: Vec<String> = draft
        .next_steps
        .iter()
        .map(|s| strip_list_marker(s).to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if steps.is_empty() {
        steps = fallback_steps(input);
    }

    let numbered = steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "**Context:** {}\n\n**Observation:** {}\n\n**Impact:** {}\n\n**Next steps:**\n{}",
        context, observation, impact, numbered
    )
}

fn non_empty(part: Option<String>) -> Option<String> {
    part.map(|p| p.trim().to_string()).filter(|p| !p.is_empty())
}

fn fallback_context(input: &SynthesisInput<'_>) -> String {
    format!(
        "Clinical feedback addressing BCCNM Standard {}: {}.",
        input.standard,
        input.standard.full_name()
    )
}

fn fallback_observation(input: &SynthesisInput<'_>) -> String {
    let mut parts = Vec::new();
    if !input.strengths.is_empty() {
        parts.push(format!("Strengths observed: {}.", join_sentence(input.strengths)));
    }
    if !input.concerns.is_empty() {
        parts.push(format!("Areas for growth: {}.", join_sentence(input.concerns)));
    }
    if parts.is_empty() {
        parts.push(format!("The preceptor reported: \"{}\"", input.feedback.trim()));
    }
    parts.join(" ")
}

fn fallback_impact(input: &SynthesisInput<'_>) -> String {
    if input.concerns.is_empty() {
        format!(
            "Continuing these practices supports safe, competent care under {}.",
            input.standard.full_name()
        )
    } else {
        format!(
            "Addressing these areas supports safe, competent care and the expectations of {}.",
            input.standard.full_name()
        )
    }
}

/// List items from the suggestion text, else the standard's built-in guidance.
fn fallback_steps(input: &SynthesisInput<'_>) -> Vec<String> {
    let from = |text: &str| -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|l| is_list_item(l))
            .map(|l| strip_list_marker(l).to_string())
            .filter(|l| !l.is_empty())
            .take(MAX_NEXT_STEPS)
            .collect()
    };
    let steps = from(input.suggestions);
    if steps.is_empty() {
        from(input.standard.builtin_guidance())
    } else {
        steps
    }
}

fn is_list_item(line: &str) -> bool {
    line.starts_with("- ") || line.starts_with("* ") || strip_number(line).is_some()
}

fn strip_number(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    strip_number(line).map(str::trim).unwrap_or(line)
}

fn join_sentence(items: &[String]) -> String {
    items
        .iter()
        .map(|i| i.trim().trim_end_matches('.'))
        .collect::<Vec<_>>()
        .join("; ")
}

fn system_prompt(input: &SynthesisInput<'_>) -> String {
    format!(
        "You are synthesizing clinical feedback for nursing preceptors.\n\n\
         BCCNM Standard {number}: {name}\n\n\
         Standard context:\n{context}\n\n\
         Create a concise COIN-style summary as a JSON object with the keys \
         \"context\", \"observation\", \"impact\" and \"next_steps\" (an array of \
         short actions).\n\
         - context: the practice standard being addressed and the clinical situation\n\
         - observation: what the preceptor observed, strengths and concerns, drawn only \
         from the preceptor's feedback\n\
         - impact: significance for client care and learning under this standard\n\
         - next_steps: actionable strategies taken from the guidance provided\n\n\
         Requirements: no personally identifiable information, at most 150 words in \
         total, professional and constructive tone, specific and actionable.",
        number = input.standard,
        name = input.standard.full_name(),
        context = input.context.render(),
    )
}

fn user_prompt(input: &SynthesisInput<'_>) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "None identified".to_string()
        } else {
            items
                .iter()
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    format!(
        "Preceptor feedback:\n{}\n\nStrengths:\n{}\n\nConcerns:\n{}\n\nGuidance:\n{}",
        input.feedback.trim(),
        list(input.strengths),
        list(input.concerns),
        input.suggestions
    )
}
