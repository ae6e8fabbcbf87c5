//! Knowledge documents and their YAML front matter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::KnowledgeError;
use crate::models::StandardId;

/// Value of `type` that marks a concern-to-strategy document.
pub const STRATEGY_TYPE: &str = "concern_strategies";

/// Topic slug of the per-standard generic guidance block.
pub const GENERIC_TOPIC: &str = "generic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Reference text of the standards of practice.
    Standards,
    /// Concern-to-strategy guidance snippets.
    Strategies,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMeta {
    pub doc_id: String,
    pub title: String,
    /// Every standard this document is tagged for. Usually one.
    pub standards: Vec<StandardId>,
    pub topic: String,
    pub kind: String,
    pub collection: Collection,
    pub source: String,
    pub version: Option<String>,
    pub path_hint: Option<String>,
}

impl DocumentMeta {
    pub fn is_tagged(&self, standard: StandardId) -> bool {
        self.standards.contains(&standard)
    }

    pub fn is_generic(&self) -> bool {
        self.collection == Collection::Strategies && self.topic == GENERIC_TOPIC
    }

    /// Standards other than `active` that this document also applies to.
    pub fn other_standards(&self, active: StandardId) -> Vec<StandardId> {
        self.standards
            .iter()
            .copied()
            .filter(|s| *s != active)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub meta: DocumentMeta,
    pub body: String,
    /// File the document was read from, when it came from disk.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StandardTags {
    One(i64),
    Many(Vec<i64>),
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    doc_id: String,
    title: String,
    #[serde(alias = "standards")]
    standard: StandardTags,
    topic: String,
    #[serde(rename = "type")]
    kind: String,
    source: String,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    path_hint: Option<String>,
}

/// Split a raw file into front matter and body, then validate the front matter.
pub fn parse_document(raw: &str, path: &Path) -> Result<SourceDocument, KnowledgeError> {
    let invalid = |message: String| KnowledgeError::FrontMatter {
        path: path.to_path_buf(),
        message,
    };

    let (yaml, body) = split_front_matter(raw)
        .ok_or_else(|| invalid("missing front matter block delimited by ---".to_string()))?;

    let fm: FrontMatter = serde_yaml::from_str(yaml).map_err(|e| invalid(e.to_string()))?;

    if fm.doc_id.trim().is_empty() {
        return Err(invalid("doc_id cannot be empty".to_string()));
    }

    let raw_tags = match fm.standard {
        StandardTags::One(n) => vec![n],
        StandardTags::Many(ns) => ns,
    };
    if raw_tags.is_empty() {
        return Err(invalid("standard must list at least one value".to_string()));
    }
    let mut standards = Vec::with_capacity(raw_tags.len());
    for n in raw_tags {
        let id = StandardId::new(n).map_err(|e| invalid(e.to_string()))?;
        if !standards.contains(&id) {
            standards.push(id);
        }
    }
    standards.sort();

    let collection = if fm.kind == STRATEGY_TYPE {
        Collection::Strategies
    } else {
        Collection::Standards
    };

    // Versions are often written as bare numbers in YAML.
    let version = fm.version.and_then(|v| match v {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(SourceDocument {
        meta: DocumentMeta {
            doc_id: fm.doc_id.trim().to_string(),
            title: fm.title,
            standards,
            topic: fm.topic,
            kind: fm.kind,
            collection,
            source: fm.source,
            version,
            path_hint: fm.path_hint,
        },
        body: body.trim().to_string(),
        path: Some(path.to_path_buf()),
    })
}

fn split_front_matter(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.trim_start_matches('\u{feff}');
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<SourceDocument, KnowledgeError> {
        parse_document(raw, Path::new("kb/test.md"))
    }

    #[test]
    fn parses_single_standard_document() {
        let doc = parse(
            "---\ndoc_id: s1-scope\ntitle: Scope of practice\nstandard: 1\ntopic: scope\n\
             type: standard_text\nsource: BCCNM\nversion: 2024\n---\n\nBody text.\n",
        )
        .unwrap();
        assert_eq!(doc.meta.doc_id, "s1-scope");
        assert_eq!(doc.meta.standards, vec![StandardId::FIRST]);
        assert_eq!(doc.meta.collection, Collection::Standards);
        assert_eq!(doc.meta.version.as_deref(), Some("2024"));
        assert_eq!(doc.body, "Body text.");
    }

    #[test]
    fn accepts_dual_tagging_under_either_key() {
        let doc = parse(
            "---\ndoc_id: comm\ntitle: Communication\nstandards: [3, 1]\ntopic: communication\n\
             type: concern_strategies\nsource: faculty\n---\nUse SBAR.\n",
        )
        .unwrap();
        let expected: Vec<StandardId> = vec![StandardId::new(1).unwrap(), StandardId::new(3).unwrap()];
        assert_eq!(doc.meta.standards, expected);
        assert_eq!(doc.meta.collection, Collection::Strategies);
        assert_eq!(doc.meta.other_standards(StandardId::FIRST), vec![StandardId::new(3).unwrap()]);
    }

    #[test]
    fn generic_strategy_documents_are_flagged() {
        let doc = parse(
            "---\ndoc_id: g2\ntitle: General\nstandard: 2\ntopic: generic\n\
             type: concern_strategies\nsource: faculty\n---\n- Prepare.\n",
        )
        .unwrap();
        assert!(doc.meta.is_generic());
    }

    #[test]
    fn rejects_out_of_range_standard() {
        let err = parse(
            "---\ndoc_id: x\ntitle: X\nstandard: 5\ntopic: t\ntype: standard_text\nsource: s\n---\nbody\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("kb/test.md"));
        assert!(err.to_string().contains("invalid standard index 5"));
    }

    #[test]
    fn rejects_missing_fields_and_missing_block() {
        assert!(parse("---\ndoc_id: x\ntitle: X\n---\nbody\n").is_err());
        assert!(parse("no front matter here").is_err());
        assert!(parse("---\ndoc_id: x\nnever closed\n").is_err());
    }
}
