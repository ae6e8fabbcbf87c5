//! Error taxonomy shared by the pipeline, the session service and the API.
//!
//! Retrieval and extraction problems are absorbed by the pipeline and surface
//! as the `degraded` flag on the response. Every other variant can reach a
//! caller.

use std::time::Duration;

use thiserror::Error;

use crate::session::TransitionError;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("invalid standard index {0}: must be between 1 and 4")]
    InvalidStandardIndex(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl FeedbackError {
    /// Map a database error, keeping transition rejections typed.
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast::<TransitionError>() {
            Ok(transition) => Self::InvalidTransition(transition),
            Err(other) => Self::Persistence(format!("{:#}", other)),
        }
    }
}

/// Subscription channel failures. Never fatal to a pipeline invocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("subscriber lagged behind by {0} notifications")]
    Lagged(u64),

    #[error("subscription channel closed")]
    Closed,
}
