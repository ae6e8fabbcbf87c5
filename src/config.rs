//! Runtime settings.
//!
//! Loaded from `<config dir>/coin-feedback/config.json` when that file exists,
//! then overridden by `COIN_*` environment variables. Every field except the
//! model API key has a default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::ChunkConfig;
use crate::llm::DEFAULT_BASE_URL;

const APP_DIR: &str = "coin-feedback";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub pipeline: PipelineSettings,
    pub knowledge_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub synthesis_temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            synthesis_temperature: 0.3,
            request_timeout_secs: 60,
        }
    }
}

impl ModelSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Whether a concern matched to a dual-tagged strategy is also reported for
/// the other tagged standards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualTagPolicy {
    /// Report concerns only under the active standard.
    #[default]
    ActiveOnly,
    /// Also list the other tagged standards in `cross_references`.
    AllTagged,
}

impl FromStr for DualTagPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "active_only" => Ok(DualTagPolicy::ActiveOnly),
            "all_tagged" => Ok(DualTagPolicy::AllTagged),
            other => anyhow::bail!(
                "unknown dual tag policy '{}': expected active_only or all_tagged",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Documents kept per standard context.
    pub top_k: usize,
    /// Strategy chunks considered per concern.
    pub suggestion_candidates: usize,
    /// Minimum score for a strategy topic to be accepted.
    pub suggestion_threshold: f32,
    pub dedup_jaccard: f32,
    pub dedup_cosine: f32,
    pub max_feedback_chars: usize,
    pub timeout_secs: u64,
    pub dual_tag_policy: DualTagPolicy,
    pub chunk_max_chars: usize,
    pub chunk_overlap: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            suggestion_candidates: 10,
            suggestion_threshold: 0.35,
            dedup_jaccard: 0.6,
            dedup_cosine: 0.88,
            max_feedback_chars: 8000,
            timeout_secs: 90,
            dual_tag_policy: DualTagPolicy::ActiveOnly,
            chunk_max_chars: 1000,
            chunk_overlap: 150,
        }
    }
}

impl PipelineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_chars: self.chunk_max_chars,
            overlap: self.chunk_overlap,
        }
    }
}

impl Settings {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// File (if present) plus process environment.
    pub fn load() -> Result<Self> {
        let mut settings = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `COIN_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("COIN_OPENAI_BASE_URL") {
            self.model.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("COIN_OPENAI_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("COIN_CHAT_MODEL") {
            self.model.chat_model = v;
        }
        if let Some(v) = get("COIN_EMBEDDING_MODEL") {
            self.model.embedding_model = v;
        }
        if let Some(v) = get("COIN_SYNTHESIS_TEMPERATURE") {
            self.model.synthesis_temperature = parse_env("COIN_SYNTHESIS_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("COIN_MODEL_TIMEOUT_SECS") {
            self.model.request_timeout_secs = parse_env("COIN_MODEL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("COIN_TOP_K") {
            self.pipeline.top_k = parse_env("COIN_TOP_K", &v)?;
        }
        if let Some(v) = get("COIN_SUGGESTION_THRESHOLD") {
            self.pipeline.suggestion_threshold = parse_env("COIN_SUGGESTION_THRESHOLD", &v)?;
        }
        if let Some(v) = get("COIN_PIPELINE_TIMEOUT_SECS") {
            self.pipeline.timeout_secs = parse_env("COIN_PIPELINE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("COIN_DUAL_TAG_POLICY") {
            self.pipeline.dual_tag_policy = v.parse()?;
        }
        if let Some(v) = get("COIN_KNOWLEDGE_DIR") {
            self.knowledge_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("COIN_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Configured database path, or `coin.db` in the platform data dir.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", APP_DIR)
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().join("coin.db"))
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))
}
