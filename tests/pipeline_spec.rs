mod common;

use std::sync::Arc;

use coin_feedback::config::{DualTagPolicy, PipelineSettings};
use coin_feedback::error::FeedbackError;
use coin_feedback::llm::ModelError;
use coin_feedback::models::StandardId;

use common::*;

fn standard(n: i64) -> StandardId {
    StandardId::new(n).unwrap()
}

async fn run(
    model: &Arc<ScriptedModel>,
    n: i64,
    feedback: &str,
) -> Result<coin_feedback::models::FeedbackResponse, FeedbackError> {
    let settings = PipelineSettings::default();
    let pipeline = pipeline(store(sample_documents()).await, Arc::clone(model), &settings);
    pipeline.run(standard(n), feedback).await
}

mod scenario_a {
    use super::*;

    #[tokio::test]
    async fn extracts_the_single_grounded_concern() {
        let model = Arc::new(ScriptedModel::scenario_a());

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert_eq!(
            response.concerns,
            vec!["Hesitation to ask questions during medication administration".to_string()]
        );
        assert!(!response.degraded);
        assert!(!response.context.is_empty());
        assert_eq!(response.context.standard_id(), StandardId::FIRST);
    }

    #[tokio::test]
    async fn synthesis_keeps_the_four_part_order() {
        let model = Arc::new(ScriptedModel::scenario_a());

        let response = run(&model, 1, SCENARIO_A).await.unwrap();
        let text = &response.synthesis;

        let positions: Vec<usize> = ["**Context:**", "**Observation:**", "**Impact:**", "**Next steps:**"]
            .iter()
            .map(|heading| text.find(heading).expect("missing part"))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(text.contains("hand hygiene"));
        assert!(text.contains("1. Agree on triggers"));
    }

    #[tokio::test]
    async fn matched_strategy_becomes_the_suggestion() {
        let model = Arc::new(ScriptedModel::scenario_a());

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert!(response
            .suggestions
            .starts_with("### Asking questions during medication administration"));
    }

    #[tokio::test]
    async fn extraction_and_synthesis_run_once_each() {
        let model = Arc::new(ScriptedModel::scenario_a());

        run(&model, 1, SCENARIO_A).await.unwrap();

        assert_eq!(model.extraction_calls(), 1);
        assert_eq!(model.synthesis_calls(), 1);
        assert!(model.requests().iter().all(|r| r.json));
    }
}

mod scenario_c {
    use super::*;

    const FEEDBACK: &str = "Student did not involve the family when planning the discharge.";

    fn model() -> ScriptedModel {
        ScriptedModel::new()
            .extraction(
                r#"{"concerns": [{"statement": "Family not involved in discharge planning",
                    "evidence": "did not involve the family when planning the discharge"}],
                    "strengths": []}"#,
            )
            .synthesis("this is not json")
    }

    #[tokio::test]
    async fn empty_context_marks_the_response_degraded() {
        let model = Arc::new(model());

        let response = run(&model, 3, FEEDBACK).await.unwrap();

        assert!(response.context.documents().is_empty());
        assert!(response.degraded);
    }

    #[tokio::test]
    async fn falls_back_to_generic_guidance() {
        let model = Arc::new(model());

        let response = run(&model, 3, FEEDBACK).await.unwrap();

        assert!(response
            .suggestions
            .starts_with("### General guidance: Client-Focused Provision of Service"));
        assert!(response.suggestions.contains("Use SBAR for handover"));
    }

    #[tokio::test]
    async fn still_produces_all_four_parts() {
        let model = Arc::new(model());

        let response = run(&model, 3, FEEDBACK).await.unwrap();

        for heading in ["**Context:**", "**Observation:**", "**Impact:**", "**Next steps:**"] {
            assert!(response.synthesis.contains(heading), "missing {heading}");
        }
        assert!(response.synthesis.contains("Standard 3"));
        assert!(response.synthesis.contains("Family not involved in discharge planning"));
    }
}

mod extraction {
    use super::*;

    #[tokio::test]
    async fn retries_once_after_malformed_output() {
        let model = Arc::new(
            ScriptedModel::new()
                .extraction("Sure! Here are the concerns you asked for.")
                .extraction(SCENARIO_A_EXTRACTION)
                .synthesis(SCENARIO_A_SYNTHESIS),
        );

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert_eq!(model.extraction_calls(), 2);
        assert_eq!(response.concerns.len(), 1);
        assert!(!response.degraded);
    }

    #[tokio::test]
    async fn degrades_after_two_malformed_outputs() {
        let model = Arc::new(
            ScriptedModel::new()
                .extraction("garbage")
                .extraction(r#"{"concerns": "none"}"#)
                .synthesis(SCENARIO_A_SYNTHESIS),
        );

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert_eq!(model.extraction_calls(), 2);
        assert!(response.concerns.is_empty());
        assert!(response.degraded);
        assert!(!response.synthesis.is_empty());
    }

    #[tokio::test]
    async fn unreachable_model_aborts_the_invocation() {
        let model = Arc::new(
            ScriptedModel::new().extraction_error(ModelError::Server("503 overloaded".to_string())),
        );

        let result = run(&model, 1, SCENARIO_A).await;

        assert!(matches!(result, Err(FeedbackError::Synthesis(_))));
        assert_eq!(model.synthesis_calls(), 0);
    }

    #[tokio::test]
    async fn drops_concerns_not_found_in_the_feedback() {
        let model = Arc::new(ScriptedModel::new().extraction(
            r#"{"concerns": [{"statement": "Incomplete vital sign documentation",
                "evidence": "vital signs were not documented"}],
                "strengths": []}"#,
        ));

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert!(response.concerns.is_empty());
    }

    #[tokio::test]
    async fn drops_statements_that_outrun_their_evidence() {
        let model = Arc::new(ScriptedModel::new().extraction(
            r#"{"concerns": [
                {"statement": "Poor clinical safety and risk management during medication administration",
                 "evidence": "during medication administration"},
                {"statement": "Incomplete hand hygiene documentation and charting",
                 "evidence": "excellent hand hygiene"},
                {"statement": "Hesitation to ask questions during medication administration",
                 "evidence": "hesitated to ask questions during medication administration"}
            ], "strengths": ["Excellent hand hygiene", "Strong leadership on the unit"]}"#,
        ));

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert_eq!(
            response.concerns,
            vec!["Hesitation to ask questions during medication administration".to_string()]
        );
    }

    #[tokio::test]
    async fn same_feedback_yields_the_same_concerns() {
        let feedback = "The student charted late on two clients. Charting was late again at the \
                        end of shift. Later the student hesitated to ask questions during \
                        medication administration.";
        let model = Arc::new(ScriptedModel::new().extraction(
            r#"{"concerns": [
                {"statement": "Late charting", "evidence": "charted late on two clients"},
                {"statement": "Charting late", "evidence": "Charting was late again"},
                {"statement": "Hesitation to ask questions about medications",
                 "evidence": "hesitated to ask questions during medication administration"}
            ], "strengths": []}"#,
        ));
        // Second answer lists the same issues in another order and wording.
        model.push_extraction(Ok(r#"{"concerns": [
                {"statement": "Hesitation to ask questions about medications",
                 "evidence": "hesitated to ask questions during medication administration"},
                {"statement": "Late charting again", "evidence": "Charting was late again"},
                {"statement": "Late charting", "evidence": "charted late on two clients"}
            ], "strengths": []}"#
            .to_string()));

        let first = run(&model, 1, feedback).await.unwrap();
        let second = run(&model, 1, feedback).await.unwrap();

        assert_eq!(first.concerns.len(), 2);
        assert_eq!(first.concerns, second.concerns);
        assert_eq!(first.concerns[0], "Late charting");
    }

    #[tokio::test]
    async fn collapses_restated_concerns() {
        let feedback = "The student charted late on two clients. Charting was late again at the end of shift.";
        let model = Arc::new(ScriptedModel::new().extraction(
            r#"{"concerns": [
                {"statement": "Late charting", "evidence": "charted late on two clients"},
                {"statement": "Charting late", "evidence": "Charting was late again"}
            ], "strengths": []}"#,
        ));

        let response = run(&model, 1, feedback).await.unwrap();

        assert_eq!(response.concerns, vec!["Late charting".to_string()]);
    }

    #[tokio::test]
    async fn orders_concerns_by_position_in_the_feedback() {
        let feedback = "Documentation was incomplete after the assessment. Later the student \
                        hesitated to ask questions during medication administration.";
        let model = Arc::new(ScriptedModel::new().extraction(
            r#"{"concerns": [
                {"statement": "Hesitation to ask questions about medications",
                 "evidence": "hesitated to ask questions during medication administration"},
                {"statement": "Incomplete documentation",
                 "evidence": "Documentation was incomplete"}
            ], "strengths": []}"#,
        ));

        let response = run(&model, 1, feedback).await.unwrap();

        assert_eq!(
            response.concerns,
            vec![
                "Incomplete documentation".to_string(),
                "Hesitation to ask questions about medications".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn feedback_without_content_words_skips_the_model() {
        let model = Arc::new(ScriptedModel::new());

        let response = run(&model, 2, "!!! ...").await.unwrap();

        assert_eq!(model.extraction_calls(), 0);
        assert!(response.concerns.is_empty());
    }
}

mod synthesis {
    use super::*;

    #[tokio::test]
    async fn unreachable_model_is_a_synthesis_failure() {
        let model = Arc::new(
            ScriptedModel::new()
                .extraction(SCENARIO_A_EXTRACTION)
                .synthesis_error(ModelError::Unauthorized),
        );

        let result = run(&model, 1, SCENARIO_A).await;

        assert!(matches!(result, Err(FeedbackError::Synthesis(_))));
    }

    #[tokio::test]
    async fn missing_parts_are_filled_from_the_inputs() {
        let model = Arc::new(
            ScriptedModel::new()
                .extraction(SCENARIO_A_EXTRACTION)
                .synthesis(r#"{"impact": "Unasked questions put clients at risk."}"#),
        );

        let response = run(&model, 1, SCENARIO_A).await.unwrap();

        assert!(response.synthesis.contains("Unasked questions put clients at risk."));
        assert!(response.synthesis.contains("Excellent hand hygiene"));
        assert!(response.synthesis.contains("**Next steps:**\n1. "));
    }
}

mod dual_tagging {
    use super::*;

    async fn run_with(policy: DualTagPolicy) -> coin_feedback::models::FeedbackResponse {
        let settings = PipelineSettings {
            dual_tag_policy: policy,
            ..PipelineSettings::default()
        };
        let model = Arc::new(ScriptedModel::scenario_a());
        let pipeline = pipeline(store(sample_documents()).await, model, &settings);
        pipeline.run(StandardId::FIRST, SCENARIO_A).await.unwrap()
    }

    #[tokio::test]
    async fn active_only_reports_no_cross_references() {
        let response = run_with(DualTagPolicy::ActiveOnly).await;
        assert!(response.cross_references.is_empty());
    }

    #[tokio::test]
    async fn all_tagged_names_the_other_standards() {
        let response = run_with(DualTagPolicy::AllTagged).await;

        assert_eq!(response.cross_references.len(), 1);
        assert_eq!(response.cross_references[0].also_applies_to, vec![standard(3)]);
    }
}
