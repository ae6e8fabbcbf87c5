//! Interactive terminal walk through the four standards.
//!
//! Talks to a running server through [`FeedbackClient`]. Feedback for each
//! standard is typed as one or more lines and ends with an empty line.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{ClientError, FeedbackClient};
use crate::models::{FeedbackResponse, StandardId};

const RULE: &str = "------------------------------------------------------------";

/// Commands accepted at the feedback prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Feedback(String),
    Quit,
}

async fn read_entry<R>(input: &mut R) -> Result<Entry>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if lines.is_empty() && matches!(line.trim(), ":q" | ":quit") {
            return Ok(Entry::Quit);
        }
        if line.trim().is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(line.to_string());
    }
    if lines.is_empty() {
        Ok(Entry::Quit)
    } else {
        Ok(Entry::Feedback(lines.join("\n")))
    }
}

async fn print_standard<W>(output: &mut W, standard: StandardId) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let info = standard.info();
    let mut text = format!("\n{}\nStandard {}: {}\n{}\n\n", RULE, standard, info.full_name, RULE);
    text.push_str(info.description);
    text.push_str("\n\nQuestions to consider:\n");
    for question in info.example_questions {
        text.push_str(&format!("  - {}\n", question));
    }
    text.push_str("\nEnter feedback, finish with an empty line (:q to quit):\n");
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

async fn print_response<W>(output: &mut W, response: &FeedbackResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut text = String::from("\n");
    if response.degraded {
        text.push_str("(generated with limited reference material)\n\n");
    }
    text.push_str(&response.synthesis);
    text.push('\n');
    for reference in &response.cross_references {
        let others: Vec<String> = reference
            .also_applies_to
            .iter()
            .map(|s| s.to_string())
            .collect();
        text.push_str(&format!(
            "\nNote: \"{}\" may also relate to standard {}.\n",
            reference.concern,
            others.join(", ")
        ));
    }
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Run one session against `client`. Returns the session id.
pub async fn run_interactive<R, W>(
    client: &FeedbackClient,
    input: &mut R,
    output: &mut W,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let progress = client.create_session(None).await?;
    let session_id = progress.session_id;
    output
        .write_all(format!("COIN feedback session {}\n", session_id).as_bytes())
        .await?;

    'standards: for standard in StandardId::ALL {
        print_standard(output, standard).await?;
        loop {
            let text = match read_entry(input).await? {
                Entry::Quit => break 'standards,
                Entry::Feedback(text) => text,
            };
            output.write_all(b"\nGenerating feedback...\n").await?;
            match client.submit(&session_id, standard.number().into(), &text).await {
                Ok(response) => {
                    print_response(output, &response).await?;
                    break;
                }
                Err(ClientError::BadRequest(message)) => {
                    output
                        .write_all(format!("{}\nPlease try again:\n", message).as_bytes())
                        .await?;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "Submission failed: {}", e);
                    output
                        .write_all(format!("Submission failed: {}\nPlease try again:\n", e).as_bytes())
                        .await?;
                }
            }
        }
    }

    let report = client.report_text(&session_id).await?;
    output
        .write_all(format!("\n{}\n{}", RULE, report).as_bytes())
        .await?;
    output.flush().await?;
    Ok(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(input: &str) -> Entry {
        let mut reader = input.as_bytes();
        tokio_test::block_on(read_entry(&mut reader)).unwrap()
    }

    #[test]
    fn reads_until_blank_line() {
        assert_eq!(
            entry("\nFirst line\nsecond line\n\nignored\n"),
            Entry::Feedback("First line\nsecond line".to_string())
        );
    }

    #[test]
    fn recognizes_quit() {
        assert_eq!(entry(":q\n"), Entry::Quit);
        assert_eq!(entry(":quit\n"), Entry::Quit);
        assert_eq!(entry(""), Entry::Quit);
    }

    #[test]
    fn end_of_input_submits_what_was_typed() {
        assert_eq!(entry("only line"), Entry::Feedback("only line".to_string()));
    }
}
