//! Knowledge store: standards reference text and concern strategies.
//!
//! A store is built once from a directory of front-mattered documents and is
//! read-only afterwards, so it can be shared across sessions behind an `Arc`.
//! Every chunk is embedded at load time; a search embeds only the query.
//!
//! Scoping is by tag: a document tagged for several standards is returned
//! under each of them and never under any other.

mod chunker;
mod document;
mod embedding;

pub use chunker::{chunk_text, ChunkConfig};
pub use document::{parse_document, Collection, DocumentMeta, SourceDocument, GENERIC_TOPIC, STRATEGY_TYPE};
pub use embedding::{
    cosine_similarity, Embedder, HashingEmbedder, OpenAiEmbedder, HASHING_EMBEDDING_DIM,
    OPENAI_EMBEDDING_DIM,
};

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::llm::ModelError;
use crate::models::StandardId;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk knowledge directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid front matter in {}: {message}", .path.display())]
    FrontMatter { path: PathBuf, message: String },

    #[error("duplicate doc_id '{doc_id}' in {}", .path.display())]
    DuplicateDocId { doc_id: String, path: PathBuf },

    #[error("knowledge directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to embed knowledge chunks: {0}")]
    Embedding(#[from] ModelError),
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    id: String,
    doc: Arc<DocumentMeta>,
    text: String,
    vector: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub doc: Arc<DocumentMeta>,
    pub text: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchQuery<'a> {
    pub collection: Collection,
    pub standard: StandardId,
    pub text: &'a str,
    pub limit: usize,
    /// Include `topic: generic` strategy blocks in the candidates.
    pub include_generic: bool,
}

/// Chunk counts for `coin ingest`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    /// `(standard, collection) -> chunks`. Dual-tagged chunks count under each tag.
    pub by_standard: BTreeMap<u8, CollectionCounts>,
    /// Standards with no generic guidance document.
    pub missing_generic: Vec<StandardId>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CollectionCounts {
    pub standards: usize,
    pub strategies: usize,
}

pub struct KnowledgeStore {
    chunks: Vec<IndexedChunk>,
    generic: HashMap<StandardId, String>,
    documents: usize,
    embedder: Arc<dyn Embedder>,
}

impl KnowledgeStore {
    /// A store with no documents. Every search returns nothing.
    pub fn empty(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunks: Vec::new(),
            generic: HashMap::new(),
            documents: 0,
            embedder,
        }
    }

    /// Read every `.md` and `.txt` file under `dir`.
    pub fn read_dir(dir: &Path) -> Result<Vec<SourceDocument>, KnowledgeError> {
        if !dir.is_dir() {
            return Err(KnowledgeError::MissingDirectory(dir.to_path_buf()));
        }
        let mut documents = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_knowledge_file(entry.path()) {
                continue;
            }
            let raw = std::fs::read_to_string(entry.path()).map_err(|source| KnowledgeError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            documents.push(parse_document(&raw, entry.path())?);
        }
        tracing::debug!(dir = %dir.display(), count = documents.len(), "Read knowledge documents");
        Ok(documents)
    }

    pub async fn load_dir(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: ChunkConfig,
    ) -> Result<Self, KnowledgeError> {
        let documents = Self::read_dir(dir)?;
        Self::from_documents(documents, embedder, config).await
    }

    pub async fn from_documents(
        documents: Vec<SourceDocument>,
        embedder: Arc<dyn Embedder>,
        config: ChunkConfig,
    ) -> Result<Self, KnowledgeError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut generic: HashMap<StandardId, String> = HashMap::new();
        let mut pending: Vec<(String, Arc<DocumentMeta>, String)> = Vec::new();
        let document_count = documents.len();

        for SourceDocument { meta, body, path } in documents {
            if !seen.insert(meta.doc_id.clone()) {
                return Err(KnowledgeError::DuplicateDocId {
                    path: path.unwrap_or_else(|| PathBuf::from("<memory>")),
                    doc_id: meta.doc_id,
                });
            }
            if meta.is_generic() {
                for standard in &meta.standards {
                    let block = generic.entry(*standard).or_default();
                    if !block.is_empty() {
                        block.push_str("\n\n");
                    }
                    block.push_str(&body);
                }
            }
            let meta = Arc::new(meta);
            for (index, text) in chunk_text(&body, config).into_iter().enumerate() {
                pending.push((format!("{}#{}", meta.doc_id, index), Arc::clone(&meta), text));
            }
        }

        let texts: Vec<String> = pending.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts).await?
        };
        if vectors.len() != pending.len() {
            return Err(KnowledgeError::Embedding(ModelError::Server(format!(
                "expected {} embeddings, got {}",
                pending.len(),
                vectors.len()
            ))));
        }

        let chunks: Vec<IndexedChunk> = pending
            .into_iter()
            .zip(vectors)
            .map(|((id, doc, text), vector)| IndexedChunk {
                id,
                doc,
                text,
                vector,
            })
            .collect();

        tracing::info!(
            documents = document_count,
            chunks = chunks.len(),
            embedder = embedder.model_name(),
            "Knowledge store loaded"
        );

        Ok(Self {
            chunks,
            generic,
            documents: document_count,
            embedder,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Ranked chunks tagged for `query.standard` in `query.collection`.
    ///
    /// Returns an empty list without touching the embedder when nothing is
    /// in scope. Ranking is by score, then chunk id, so it is stable for a
    /// fixed store.
    pub async fn search(&self, query: SearchQuery<'_>) -> Result<Vec<ScoredChunk>, ModelError> {
        let candidates: Vec<&IndexedChunk> = self
            .chunks
            .iter()
            .filter(|c| c.doc.collection == query.collection)
            .filter(|c| c.doc.is_tagged(query.standard))
            .filter(|c| query.include_generic || !c.doc.is_generic())
            .collect();

        if candidates.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query.text).await?;

        let mut hits: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|c| ScoredChunk {
                chunk_id: c.id.clone(),
                doc: Arc::clone(&c.doc),
                text: c.text.clone(),
                score: cosine_similarity(&query_vector, &c.vector)
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    /// The knowledge base's generic guidance block for `standard`, if any.
    pub fn generic_guidance(&self, standard: StandardId) -> Option<&str> {
        self.generic.get(&standard).map(String::as_str)
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_standard: BTreeMap<u8, CollectionCounts> = StandardId::ALL
            .iter()
            .map(|s| (s.number(), CollectionCounts::default()))
            .collect();
        for chunk in &self.chunks {
            for standard in &chunk.doc.standards {
                let counts = by_standard.entry(standard.number()).or_default();
                match chunk.doc.collection {
                    Collection::Standards => counts.standards += 1,
                    Collection::Strategies => counts.strategies += 1,
                }
            }
        }
        StoreStats {
            documents: self.documents,
            chunks: self.chunks.len(),
            by_standard,
            missing_generic: StandardId::ALL
                .iter()
                .copied()
                .filter(|s| !self.generic.contains_key(s))
                .collect(),
        }
    }
}

fn is_knowledge_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md") | Some("txt")
    )
}
