use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::PipelineSettings;
use crate::db::Database;
use crate::error::FeedbackError;
use crate::models::*;
use crate::pipeline::Pipeline;
use crate::report::build_report;
use crate::sync::{RecordField, SessionHub};

/// Owns session progression: validates requests, runs the pipeline once per
/// standard and commits the result.
#[derive(Clone)]
pub struct FeedbackService {
    db: Database,
    pipeline: Arc<Pipeline>,
    hub: SessionHub,
    timeout: Duration,
    max_feedback_chars: usize,
}

impl FeedbackService {
    pub fn new(db: Database, pipeline: Pipeline, hub: SessionHub, settings: &PipelineSettings) -> Self {
        Self {
            db,
            pipeline: Arc::new(pipeline),
            hub,
            timeout: settings.timeout(),
            max_feedback_chars: settings.max_feedback_chars,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn hub(&self) -> &SessionHub {
        &self.hub
    }

    pub fn start_session(&self, input: CreateSessionInput) -> Result<SessionProgress, FeedbackError> {
        let progress = self
            .db
            .create_session(input)
            .map_err(FeedbackError::from_db)?;
        info!(session_id = %progress.session_id, state = %progress.state, "Session started");
        Ok(progress)
    }

    pub fn progress(&self, session_id: &str) -> Result<SessionProgress, FeedbackError> {
        self.db
            .get_progress(session_id)
            .map_err(FeedbackError::from_db)?
            .ok_or_else(|| FeedbackError::SessionNotFound(session_id.to_string()))
    }

    /// Explicit `advance(n)`. Out-of-range `n` is an invalid transition here.
    pub fn advance(&self, session_id: &str, n: i64) -> Result<SessionProgress, FeedbackError> {
        let progress = self
            .db
            .advance_session(session_id, n)
            .map_err(FeedbackError::from_db)?;
        info!(session_id, state = %progress.state, "Session advanced");
        Ok(progress)
    }

    pub fn record(&self, session_id: &str) -> Result<SessionRecord, FeedbackError> {
        self.db
            .get_record(session_id)
            .map_err(FeedbackError::from_db)?
            .ok_or_else(|| FeedbackError::SessionNotFound(session_id.to_string()))
    }

    /// Run the pipeline for one standard and commit its result.
    ///
    /// Nothing is written unless the whole invocation succeeds. On failure the
    /// session stays in `InStandard(n)` and the same request may be retried.
    pub async fn submit(&self, request: FeedbackRequest) -> Result<FeedbackResponse, FeedbackError> {
        let standard = StandardId::new(request.standard_id)?;
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(FeedbackError::InvalidInput(
                "session_id cannot be empty".to_string(),
            ));
        }
        let feedback = request.feedback_text.trim();
        if feedback.is_empty() {
            return Err(FeedbackError::InvalidInput(
                "feedback text cannot be empty".to_string(),
            ));
        }
        let length = feedback.chars().count();
        if length > self.max_feedback_chars {
            return Err(FeedbackError::InvalidInput(format!(
                "feedback text is {} characters, limit is {}",
                length, self.max_feedback_chars
            )));
        }

        self.db
            .begin_standard(session_id, standard)
            .map_err(FeedbackError::from_db)?;

        let response = tokio::time::timeout(self.timeout, self.pipeline.run(standard, feedback))
            .await
            .map_err(|_| {
                warn!(session_id, standard = %standard, "Pipeline timed out");
                FeedbackError::Timeout {
                    stage: "pipeline",
                    after: self.timeout,
                }
            })??;

        let progress = self
            .db
            .commit_standard(
                session_id,
                standard,
                &response.synthesis,
                &response.concerns,
                response.degraded,
            )
            .map_err(FeedbackError::from_db)?;
        self.hub.publish(session_id, RecordField::Summary(standard));

        info!(
            session_id,
            standard = %standard,
            state = %progress.state,
            degraded = response.degraded,
            "Standard committed"
        );
        Ok(response)
    }

    /// Clear the record and results and return to `NotStarted`.
    pub fn reset(&self, session_id: &str) -> Result<SessionProgress, FeedbackError> {
        let existed = self
            .db
            .reset_session(session_id)
            .map_err(FeedbackError::from_db)?;
        if !existed {
            return Err(FeedbackError::SessionNotFound(session_id.to_string()));
        }
        self.hub.publish(session_id, RecordField::Reset);
        info!(session_id, "Session reset");
        self.progress(session_id)
    }

    pub fn report(&self, session_id: &str) -> Result<FinalReport, FeedbackError> {
        build_report(&self.db, session_id)
    }
}
