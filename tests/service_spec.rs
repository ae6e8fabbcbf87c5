mod common;

use std::sync::Arc;
use std::time::Duration;

use coin_feedback::config::PipelineSettings;
use coin_feedback::error::FeedbackError;
use coin_feedback::llm::ModelError;
use coin_feedback::models::*;
use coin_feedback::session::{FeedbackService, SessionState};
use coin_feedback::sync::RecordField;

use common::*;

fn request(session_id: &str, standard_id: i64, feedback: &str) -> FeedbackRequest {
    FeedbackRequest {
        session_id: session_id.to_string(),
        standard_id,
        feedback_text: feedback.to_string(),
    }
}

fn state(service: &FeedbackService, session_id: &str) -> Option<SessionState> {
    service
        .db()
        .get_progress(session_id)
        .expect("query failed")
        .map(|p| p.state)
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn empty_feedback_is_rejected_before_any_stage() {
        let model = Arc::new(ScriptedModel::new());
        let service = service(Arc::clone(&model)).await;

        let result = service.submit(request("sid", 2, "   ")).await;

        assert!(matches!(result, Err(FeedbackError::InvalidInput(_))));
        assert!(model.requests().is_empty());
        assert!(service.db().get_record("sid").expect("query failed").is_none());
        assert_eq!(state(&service, "sid"), None);
    }

    #[tokio::test]
    async fn out_of_range_standard_is_rejected() {
        let model = Arc::new(ScriptedModel::new());
        let service = service(Arc::clone(&model)).await;

        for n in [0, 5] {
            let result = service.submit(request("sid", n, SCENARIO_A)).await;
            assert!(matches!(result, Err(FeedbackError::InvalidStandardIndex(v)) if v == n));
        }
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn oversized_feedback_is_rejected() {
        let model = Arc::new(ScriptedModel::new());
        let service = service(Arc::clone(&model)).await;

        let result = service.submit(request("sid", 1, &"word ".repeat(2000))).await;

        assert!(matches!(result, Err(FeedbackError::InvalidInput(msg)) if msg.contains("limit")));
    }

    #[tokio::test]
    async fn out_of_order_standard_is_an_invalid_transition() {
        let model = Arc::new(ScriptedModel::new());
        let service = service(Arc::clone(&model)).await;

        let result = service.submit(request("sid", 2, SCENARIO_A)).await;

        assert!(matches!(result, Err(FeedbackError::InvalidTransition(_))));
        assert!(model.requests().is_empty());
    }
}

mod submit {
    use super::*;

    #[tokio::test]
    async fn commits_the_summary_and_completes_the_standard() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;

        let response = service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        let record = service.record("sid").unwrap();
        assert_eq!(record.s1_summary.as_deref(), Some(response.synthesis.as_str()));
        assert!(record.s2_summary.is_none());
        assert_eq!(state(&service, "sid"), Some(SessionState::Complete(StandardId::FIRST)));
    }

    #[tokio::test]
    async fn notifies_subscribers_of_the_written_field() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;
        let mut subscription = service.hub().subscribe("sid");

        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        let change = subscription.recv().await.unwrap();
        assert_eq!(change.session_id, "sid");
        assert_eq!(change.field, RecordField::Summary(StandardId::FIRST));
    }

    #[tokio::test]
    async fn failed_run_writes_nothing_and_can_be_retried() {
        let model = Arc::new(
            ScriptedModel::new()
                .extraction(SCENARIO_A_EXTRACTION)
                .synthesis_error(ModelError::Server("502 bad gateway".to_string())),
        );
        let service = service(Arc::clone(&model)).await;

        let result = service.submit(request("sid", 1, SCENARIO_A)).await;
        assert!(matches!(result, Err(FeedbackError::Synthesis(_))));
        assert!(service.db().get_record("sid").expect("query failed").is_none());
        assert_eq!(state(&service, "sid"), Some(SessionState::InStandard(StandardId::FIRST)));

        model.push_extraction(Ok(SCENARIO_A_EXTRACTION.to_string()));
        model.push_synthesis(Ok(SCENARIO_A_SYNTHESIS.to_string()));
        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        assert_eq!(state(&service, "sid"), Some(SessionState::Complete(StandardId::FIRST)));
    }

    #[tokio::test]
    async fn slow_pipeline_times_out_without_writing() {
        let settings = PipelineSettings {
            timeout_secs: 1,
            ..PipelineSettings::default()
        };
        let model = Arc::new(ScriptedModel::scenario_a().with_delay(Duration::from_secs(5)));
        let service = service_with(model, settings).await;

        let result = service.submit(request("sid", 1, SCENARIO_A)).await;

        assert!(matches!(result, Err(FeedbackError::Timeout { stage: "pipeline", .. })));
        assert!(service.db().get_record("sid").expect("query failed").is_none());
    }

    #[tokio::test]
    async fn cancelled_submit_writes_nothing_and_can_be_retried() {
        let model = Arc::new(ScriptedModel::scenario_a().with_delay(Duration::from_millis(300)));
        let service = service(Arc::clone(&model)).await;

        let in_flight = {
            let service = service.clone();
            tokio::spawn(async move { service.submit(request("sid", 1, SCENARIO_A)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());

        assert!(service.db().get_record("sid").expect("query failed").is_none());
        assert!(service.db().get_standard_results("sid").expect("query failed").is_empty());
        assert_eq!(state(&service, "sid"), Some(SessionState::InStandard(StandardId::FIRST)));

        let response = service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        assert_eq!(response.concerns.len(), 1);
        assert_eq!(state(&service, "sid"), Some(SessionState::Complete(StandardId::FIRST)));
        assert!(service.db().get_record("sid").expect("query failed").is_some());
    }

    #[tokio::test]
    async fn stores_concerns_beside_the_summary() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;

        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        let results = service.db().get_standard_results("sid").expect("query failed");
        assert_eq!(
            results[0].concerns,
            vec!["Hesitation to ask questions during medication administration".to_string()]
        );
        assert!(!results[0].degraded);
    }
}

mod progression {
    use super::*;

    async fn complete_all(service: &FeedbackService) {
        for n in 1..=4 {
            service
                .submit(request("sid", n, "The student communicated clearly with the team."))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn all_four_standards_complete_the_session() {
        let service = service(Arc::new(ScriptedModel::new())).await;

        complete_all(&service).await;

        assert_eq!(state(&service, "sid"), Some(SessionState::AllComplete));
        let record = service.record("sid").unwrap();
        for standard in StandardId::ALL {
            assert!(record.summary(standard).is_some());
        }
    }

    #[tokio::test]
    async fn advancing_after_all_complete_fails() {
        let service = service(Arc::new(ScriptedModel::new())).await;
        complete_all(&service).await;

        let result = service.advance("sid", 1);

        assert!(matches!(result, Err(FeedbackError::InvalidTransition(_))));
        assert_eq!(state(&service, "sid"), Some(SessionState::AllComplete));
    }

    #[tokio::test]
    async fn explicit_advance_then_submit() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;
        service.start_session(CreateSessionInput { session_id: Some("sid".to_string()) }).unwrap();

        let progress = service.advance("sid", 1).unwrap();
        assert_eq!(progress.state, SessionState::InStandard(StandardId::FIRST));

        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();
        assert_eq!(state(&service, "sid"), Some(SessionState::Complete(StandardId::FIRST)));
    }

    #[tokio::test]
    async fn unknown_session_progress_is_not_found() {
        let service = service(Arc::new(ScriptedModel::new())).await;

        assert!(matches!(service.progress("nobody"), Err(FeedbackError::SessionNotFound(_))));
        assert!(matches!(service.record("nobody"), Err(FeedbackError::SessionNotFound(_))));
    }
}

mod reset_and_report {
    use super::*;

    #[tokio::test]
    async fn reset_clears_everything_and_notifies() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;
        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();
        let mut subscription = service.hub().subscribe("sid");

        let progress = service.reset("sid").unwrap();

        assert_eq!(progress.state, SessionState::NotStarted);
        assert!(service.db().get_record("sid").expect("query failed").is_none());
        assert_eq!(subscription.recv().await.unwrap().field, RecordField::Reset);
    }

    #[tokio::test]
    async fn reset_of_unknown_session_is_not_found() {
        let service = service(Arc::new(ScriptedModel::new())).await;

        assert!(matches!(service.reset("nobody"), Err(FeedbackError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn report_lists_every_standard() {
        let service = service(Arc::new(ScriptedModel::scenario_a())).await;
        service.submit(request("sid", 1, SCENARIO_A)).await.unwrap();

        let report = service.report("sid").unwrap();

        assert_eq!(report.standards.len(), 4);
        assert_eq!(report.state, SessionState::Complete(StandardId::FIRST));
        assert!(report.standards[0].summary.is_some());
        assert_eq!(report.standards[0].concerns.len(), 1);
        assert!(report.standards[1..].iter().all(|s| s.summary.is_none()));
    }

    #[tokio::test]
    async fn report_of_unknown_session_is_not_found() {
        let service = service(Arc::new(ScriptedModel::new())).await;

        assert!(matches!(service.report("nobody"), Err(FeedbackError::SessionNotFound(_))));
    }
}
