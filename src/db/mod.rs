mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use uuid::Uuid;

use crate::models::*;
use crate::session::SessionState;

/// SQLite store for session records, progress and per-standard results.
///
/// Transition rejections come back as an [`anyhow::Error`] wrapping a
/// [`TransitionError`](crate::session::TransitionError); callers that care
/// downcast it (see [`FeedbackError::from_db`](crate::error::FeedbackError::from_db)).
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))
    }

    // ============================================================
    // Session progress
    // ============================================================

    /// Start a session. An existing session id returns its current progress.
    pub fn create_session(&self, input: CreateSessionInput) -> Result<SessionProgress> {
        let conn = self.conn()?;
        let session_id = input
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR IGNORE INTO session_progress (session_id, phase, standard, created_at, updated_at)
             VALUES (?, 'not_started', NULL, ?, ?)",
            (&session_id, &now, &now),
        )?;

        load_progress(&conn, &session_id)?
            .ok_or_else(|| anyhow::anyhow!("session {} vanished after insert", session_id))
    }

    pub fn get_progress(&self, session_id: &str) -> Result<Option<SessionProgress>> {
        let conn = self.conn()?;
        load_progress(&conn, session_id)
    }

    /// Apply `advance(requested)` atomically. Unknown sessions start at `NotStarted`.
    pub fn advance_session(&self, session_id: &str, requested: i64) -> Result<SessionProgress> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = ensure_progress(&tx, session_id)?;
        let next = current.state.advance(requested)?;
        let progress = store_progress(&tx, current, next)?;
        tx.commit()?;
        Ok(progress)
    }

    /// Enter standard `n` for a pipeline run.
    ///
    /// Same as [`advance_session`](Self::advance_session), except that a session
    /// already in `InStandard(n)` is left as is so a failed run can be retried.
    pub fn begin_standard(&self, session_id: &str, n: StandardId) -> Result<SessionProgress> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = ensure_progress(&tx, session_id)?;
        if current.state == SessionState::InStandard(n) {
            return Ok(current);
        }
        let next = current.state.advance(i64::from(n.number()))?;
        let progress = store_progress(&tx, current, next)?;
        tx.commit()?;
        Ok(progress)
    }

    // ============================================================
    // Session record
    // ============================================================

    /// Create the record if absent, otherwise set only `s{n}_summary`.
    pub fn upsert_standard_result(
        &self,
        session_id: &str,
        n: StandardId,
        synthesis: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        upsert_summary(&conn, session_id, n, synthesis)
    }

    /// Commit one pipeline result in a single transaction: the summary field,
    /// the concerns row and the completed progress. Nothing is written if the
    /// session is no longer in a state that accepts the result.
    pub fn commit_standard(
        &self,
        session_id: &str,
        n: StandardId,
        synthesis: &str,
        concerns: &[String],
        degraded: bool,
    ) -> Result<SessionProgress> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current = load_progress(&tx, session_id)?
            .ok_or_else(|| anyhow::anyhow!("session {} has no progress", session_id))?;
        let next = current.state.complete(n)?;

        upsert_summary(&tx, session_id, n, synthesis)?;
        tx.execute(
            "INSERT INTO standard_results (session_id, standard_id, concerns, degraded, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id, standard_id) DO UPDATE SET
                concerns = excluded.concerns,
                degraded = excluded.degraded,
                updated_at = excluded.updated_at",
            (
                session_id,
                n.number(),
                serde_json::to_string(concerns)?,
                degraded,
                Utc::now().to_rfc3339(),
            ),
        )?;
        let progress = store_progress(&tx, current, next)?;
        tx.commit()?;
        Ok(progress)
    }

    pub fn get_record(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT created_at, s1_summary, s2_summary, s3_summary, s4_summary
                 FROM session_records WHERE session_id = ?",
                [session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        [
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                        ],
                    ))
                },
            )
            .optional()?;

        let Some((created_at, [s1_summary, s2_summary, s3_summary, s4_summary])) = row else {
            return Ok(None);
        };
        Ok(Some(SessionRecord {
            session_id: session_id.to_string(),
            created_at: parse_datetime(&created_at, "session_records.created_at")?,
            s1_summary,
            s2_summary,
            s3_summary,
            s4_summary,
        }))
    }

    pub fn get_standard_results(&self, session_id: &str) -> Result<Vec<StandardResult>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT standard_id, concerns, degraded, updated_at
             FROM standard_results WHERE session_id = ? ORDER BY standard_id",
        )?;

        let rows = stmt
            .query_map([session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(standard, concerns, degraded, updated_at)| {
                Ok(StandardResult {
                    standard_id: StandardId::new(standard)
                        .map_err(|e| anyhow::anyhow!("corrupt standard_results row: {}", e))?,
                    concerns: serde_json::from_str(&concerns).with_context(|| {
                        format!(
                            "corrupt concerns for session {} standard {}",
                            session_id, standard
                        )
                    })?,
                    degraded,
                    updated_at: parse_datetime(&updated_at, "standard_results.updated_at")?,
                })
            })
            .collect()
    }

    /// Delete the record and stored results and return progress to `NotStarted`.
    /// Returns false when the session was never seen.
    pub fn reset_session(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let records = tx.execute(
            "DELETE FROM session_records WHERE session_id = ?",
            [session_id],
        )?;
        tx.execute(
            "DELETE FROM standard_results WHERE session_id = ?",
            [session_id],
        )?;
        let progress = tx.execute(
            "UPDATE session_progress SET phase = 'not_started', standard = NULL, updated_at = ?
             WHERE session_id = ?",
            (Utc::now().to_rfc3339(), session_id),
        )?;
        tx.commit()?;
        Ok(records + progress > 0)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn upsert_summary(conn: &Connection, session_id: &str, n: StandardId, synthesis: &str) -> Result<()> {
    let column = n.summary_column();
    conn.execute(
        &format!(
            "INSERT INTO session_records (session_id, created_at, {column})
             VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET {column} = excluded.{column}"
        ),
        (session_id, Utc::now().to_rfc3339(), synthesis),
    )
    .with_context(|| format!("Failed to write {} for session {}", column, session_id))?;
    Ok(())
}

fn load_progress(conn: &Connection, session_id: &str) -> Result<Option<SessionProgress>> {
    let row = conn
        .query_row(
            "SELECT phase, standard, created_at, updated_at
             FROM session_progress WHERE session_id = ?",
            [session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((phase, standard, created_at, updated_at)) = row else {
        return Ok(None);
    };
    let state = SessionState::from_columns(&phase, standard).ok_or_else(|| {
        anyhow::anyhow!(
            "corrupt progress for session {}: phase={} standard={:?}",
            session_id,
            phase,
            standard
        )
    })?;
    Ok(Some(SessionProgress {
        session_id: session_id.to_string(),
        state,
        created_at: parse_datetime(&created_at, "session_progress.created_at")?,
        updated_at: parse_datetime(&updated_at, "session_progress.updated_at")?,
    }))
}

fn ensure_progress(tx: &Transaction<'_>, session_id: &str) -> Result<SessionProgress> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT OR IGNORE INTO session_progress (session_id, phase, standard, created_at, updated_at)
         VALUES (?, 'not_started', NULL, ?, ?)",
        (session_id, &now, &now),
    )?;
    load_progress(tx, session_id)?
        .ok_or_else(|| anyhow::anyhow!("session {} vanished after insert", session_id))
}

fn store_progress(
    tx: &Transaction<'_>,
    current: SessionProgress,
    next: SessionState,
) -> Result<SessionProgress> {
    let now = Utc::now();
    let (phase, standard) = next.to_columns();
    tx.execute(
        "UPDATE session_progress SET phase = ?, standard = ?, updated_at = ? WHERE session_id = ?",
        (phase, standard, now.to_rfc3339(), &current.session_id),
    )?;
    Ok(SessionProgress {
        state: next,
        updated_at: now,
        ..current
    })
}

fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("corrupt timestamp in {}: {:?}", column, raw))
}
