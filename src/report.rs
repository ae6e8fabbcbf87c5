//! Plain-text rendering of a session's final report.

use chrono::Utc;

use crate::db::Database;
use crate::error::FeedbackError;
use crate::models::{FinalReport, ReportSection, StandardId};
use crate::session::SessionState;

const DONE: char = '●';
const PENDING: char = '○';
const DEGRADED: char = '◐';

/// Compile the stored summaries, concerns and progress for a session.
pub fn build_report(db: &Database, session_id: &str) -> Result<FinalReport, FeedbackError> {
    let progress = db.get_progress(session_id).map_err(FeedbackError::from_db)?;
    let record = db.get_record(session_id).map_err(FeedbackError::from_db)?;
    if progress.is_none() && record.is_none() {
        return Err(FeedbackError::SessionNotFound(session_id.to_string()));
    }
    let results = db
        .get_standard_results(session_id)
        .map_err(FeedbackError::from_db)?;

    let standards = StandardId::ALL
        .iter()
        .map(|&standard| {
            let result = results.iter().find(|r| r.standard_id == standard);
            ReportSection {
                standard_id: standard,
                standard_name: standard.full_name().to_string(),
                summary: record
                    .as_ref()
                    .and_then(|r| r.summary(standard))
                    .map(str::to_string),
                concerns: result.map(|r| r.concerns.clone()).unwrap_or_default(),
                degraded: result.is_some_and(|r| r.degraded),
            }
        })
        .collect();

    Ok(FinalReport {
        session_id: session_id.to_string(),
        generated_at: Utc::now(),
        state: progress.map(|p| p.state).unwrap_or(SessionState::NotStarted),
        standards,
    })
}

fn section_symbol(section: &ReportSection) -> char {
    match (&section.summary, section.degraded) {
        (None, _) => PENDING,
        (Some(_), true) => DEGRADED,
        (Some(_), false) => DONE,
    }
}

/// Render a report for a terminal.
///
/// Example output:
/// ```text
/// COIN Feedback Report
/// Session: 0f6c...
/// Status: standard 1 complete (1/4)
///
/// ● Standard 1: Professional Responsibility and Accountability
/// │   Concerns:
/// │   • Hesitation to ask questions during medication administration
/// │
/// │   **Context:** ...
/// │
/// ○ Standard 2: Knowledge-Based Practice
///     Not yet completed.
/// ```
pub fn render_report(report: &FinalReport) -> String {
    let mut output = String::new();
    output.push_str("COIN Feedback Report\n");
    output.push_str(&format!("Session: {}\n", report.session_id));
    output.push_str(&format!(
        "Status: {} ({}/4)\n",
        report.state,
        report.state.completed_count()
    ));
    output.push_str(&format!(
        "Generated: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    for (i, section) in report.standards.iter().enumerate() {
        let is_last = i == report.standards.len() - 1;
        output.push('\n');
        render_section(&mut output, section, is_last);
    }
    output
}

fn render_section(output: &mut String, section: &ReportSection, is_last: bool) {
    output.push(section_symbol(section));
    output.push_str(&format!(
        " Standard {}: {}\n",
        section.standard_id, section.standard_name
    ));

    let prefix = if is_last { "    " } else { "│   " };
    let Some(summary) = &section.summary else {
        output.push_str(prefix);
        output.push_str("Not yet completed.\n");
        return;
    };

    if section.degraded {
        output.push_str(prefix);
        output.push_str("(generated with limited reference material)\n");
    }
    if !section.concerns.is_empty() {
        output.push_str(prefix);
        output.push_str("Concerns:\n");
        for concern in &section.concerns {
            output.push_str(prefix);
            output.push_str("• ");
            output.push_str(concern);
            output.push('\n');
        }
        output.push_str(prefix.trim_end());
        output.push('\n');
    }
    for line in summary.lines() {
        if line.is_empty() {
            output.push_str(prefix.trim_end());
        } else {
            output.push_str(prefix);
            output.push_str(line);
        }
        output.push('\n');
    }
}
