#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coin_feedback::config::PipelineSettings;
use coin_feedback::db::Database;
use coin_feedback::knowledge::{
    ChunkConfig, Collection, DocumentMeta, HashingEmbedder, KnowledgeStore, SourceDocument,
    GENERIC_TOPIC, STRATEGY_TYPE,
};
use coin_feedback::llm::{CompletionRequest, LanguageModel, ModelError};
use coin_feedback::models::StandardId;
use coin_feedback::pipeline::Pipeline;
use coin_feedback::session::FeedbackService;
use coin_feedback::sync::SessionHub;

pub const SCENARIO_A: &str = "Student hesitated to ask questions during medication \
                              administration but showed excellent hand hygiene.";

pub const SCENARIO_A_EXTRACTION: &str = r#"{
    "concerns": [{
        "statement": "Hesitation to ask questions during medication administration",
        "evidence": "hesitated to ask questions during medication administration"
    }],
    "strengths": ["Excellent hand hygiene"]
}"#;

pub const SCENARIO_A_SYNTHESIS: &str = r#"{
    "context": "Medication administration on a medical unit under Standard 1.",
    "observation": "The student showed excellent hand hygiene but hesitated to ask questions during medication administration.",
    "impact": "Asking for clarification early keeps clients safe.",
    "next_steps": ["Agree on triggers for checking with the preceptor", "Practise SBAR escalation"]
}"#;

/// Which prompt a request carries.
fn is_synthesis(request: &CompletionRequest) -> bool {
    request.system.starts_with("You are synthesizing")
}

/// Model that answers from per-stage queues and records every request.
///
/// An exhausted extraction queue answers with no concerns; an exhausted
/// synthesis queue answers with an empty JSON object.
#[derive(Default)]
pub struct ScriptedModel {
    extraction: Mutex<VecDeque<Result<String, ModelError>>>,
    synthesis: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenario_a() -> Self {
        Self::new()
            .extraction(SCENARIO_A_EXTRACTION)
            .synthesis(SCENARIO_A_SYNTHESIS)
    }

    pub fn extraction(self, raw: &str) -> Self {
        self.push_extraction(Ok(raw.to_string()));
        self
    }

    pub fn extraction_error(self, err: ModelError) -> Self {
        self.push_extraction(Err(err));
        self
    }

    pub fn synthesis(self, raw: &str) -> Self {
        self.push_synthesis(Ok(raw.to_string()));
        self
    }

    pub fn synthesis_error(self, err: ModelError) -> Self {
        self.push_synthesis(Err(err));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_extraction(&self, response: Result<String, ModelError>) {
        self.extraction.lock().unwrap().push_back(response);
    }

    pub fn push_synthesis(&self, response: Result<String, ModelError>) {
        self.synthesis.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn extraction_calls(&self) -> usize {
        self.requests().iter().filter(|r| !is_synthesis(r)).count()
    }

    pub fn synthesis_calls(&self) -> usize {
        self.requests().iter().filter(|r| is_synthesis(r)).count()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let synthesis = is_synthesis(&request);
        self.requests.lock().unwrap().push(request);
        let next = if synthesis {
            self.synthesis.lock().unwrap().pop_front()
        } else {
            self.extraction.lock().unwrap().pop_front()
        };
        match next {
            Some(response) => response,
            None if synthesis => Ok("{}".to_string()),
            None => Ok(r#"{"concerns": [], "strengths": []}"#.to_string()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn doc(
    doc_id: &str,
    standards: &[i64],
    kind: &str,
    topic: &str,
    title: &str,
    body: &str,
) -> SourceDocument {
    let collection = if kind == STRATEGY_TYPE {
        Collection::Strategies
    } else {
        Collection::Standards
    };
    SourceDocument {
        meta: DocumentMeta {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
            standards: standards
                .iter()
                .map(|n| StandardId::new(*n).unwrap())
                .collect(),
            topic: topic.to_string(),
            kind: kind.to_string(),
            collection,
            source: "test".to_string(),
            version: None,
            path_hint: None,
        },
        body: body.to_string(),
        path: None,
    }
}

pub fn reference(doc_id: &str, standard: i64, body: &str) -> SourceDocument {
    doc(doc_id, &[standard], "practice_standard", "reference", doc_id, body)
}

pub fn strategy(doc_id: &str, standards: &[i64], topic: &str, title: &str, body: &str) -> SourceDocument {
    doc(doc_id, standards, STRATEGY_TYPE, topic, title, body)
}

pub fn generic(standard: i64, body: &str) -> SourceDocument {
    strategy(
        &format!("s{}-generic", standard),
        &[standard],
        GENERIC_TOPIC,
        &format!("General guidance for standard {}", standard),
        body,
    )
}

/// Knowledge base with reference text for standards 1, 2 and 4, none for 3.
pub fn sample_documents() -> Vec<SourceDocument> {
    vec![
        reference(
            "s1-reference",
            1,
            "Nurses are accountable for their practice, recognize the limits of their \
             competence and ask questions or seek help when a situation is beyond it. \
             Professional responsibility includes clinical safety during medication administration.",
        ),
        reference(
            "s2-reference",
            2,
            "Nurses apply evidence-informed knowledge and clinical reasoning to assess and plan care.",
        ),
        reference(
            "s4-reference",
            4,
            "Nurses protect client privacy and confidentiality and maintain professional boundaries.",
        ),
        strategy(
            "asking-questions",
            &[1, 3],
            "asking-questions",
            "Asking questions during medication administration",
            "Hesitation to ask questions during medication administration:\n\
             1. Agree on triggers for checking with the preceptor.\n\
             2. Practise asking questions before each medication administration.",
        ),
        generic(1, "1. Review scope of practice.\n2. Set a weekly learning goal."),
        generic(2, "1. Prepare for each client.\n2. Explain the rationale for care."),
        generic(3, "1. Use SBAR for handover.\n2. Involve the family in planning."),
    ]
}

pub async fn store(documents: Vec<SourceDocument>) -> Arc<KnowledgeStore> {
    Arc::new(
        KnowledgeStore::from_documents(
            documents,
            Arc::new(HashingEmbedder::default()),
            ChunkConfig::default(),
        )
        .await
        .expect("Failed to build knowledge store"),
    )
}

pub fn database() -> Database {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");
    db
}

pub fn pipeline(store: Arc<KnowledgeStore>, model: Arc<ScriptedModel>, settings: &PipelineSettings) -> Pipeline {
    Pipeline::new(store, model, settings, 0.3)
}

pub async fn service_with(model: Arc<ScriptedModel>, settings: PipelineSettings) -> FeedbackService {
    let store = store(sample_documents()).await;
    FeedbackService::new(
        database(),
        pipeline(store, model, &settings),
        SessionHub::new(),
        &settings,
    )
}

pub async fn service(model: Arc<ScriptedModel>) -> FeedbackService {
    service_with(model, PipelineSettings::default()).await
}
