use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::standard::StandardId;
use crate::session::SessionState;

/// The per-session summary record shared with external collaborators.
///
/// Each `sN_summary` field is written independently by
/// [`Database::upsert_standard_result`](crate::db::Database::upsert_standard_result);
/// a write to one field never reads or rewrites the others. The record is only
/// removed by an explicit session reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s1_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s4_summary: Option<String>,
}

impl SessionRecord {
    pub fn summary(&self, standard: StandardId) -> Option<&str> {
        match standard.number() {
            1 => self.s1_summary.as_deref(),
            2 => self.s2_summary.as_deref(),
            3 => self.s3_summary.as_deref(),
            _ => self.s4_summary.as_deref(),
        }
    }

    pub fn summary_mut(&mut self, standard: StandardId) -> &mut Option<String> {
        match standard.number() {
            1 => &mut self.s1_summary,
            2 => &mut self.s2_summary,
            3 => &mut self.s3_summary,
            _ => &mut self.s4_summary,
        }
    }
}

/// Where a session is in the four-standard sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Concerns projected from one pipeline invocation, stored beside the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardResult {
    pub standard_id: StandardId,
    pub concerns: Vec<String>,
    pub degraded: bool,
    pub updated_at: DateTime<Utc>,
}

/// Input for starting a session. The id is opaque; one is generated when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionInput {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Input for an explicit standard transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceInput {
    pub standard_id: i64,
}

/// Compiled feedback for a whole session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub state: SessionState,
    pub standards: Vec<ReportSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub standard_id: StandardId,
    pub standard_name: String,
    pub summary: Option<String>,
    pub concerns: Vec<String>,
    pub degraded: bool,
}
