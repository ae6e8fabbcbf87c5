use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StandardId;

/// Progress through the four standards.
///
/// ```text
/// NotStarted -> InStandard(1) -> Complete(1) -> InStandard(2) -> ... -> Complete(3)
///            -> InStandard(4) -> AllComplete
/// ```
///
/// Completing standard 4 lands directly in `AllComplete`, which accepts no
/// further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "standard", rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    InStandard(StandardId),
    Complete(StandardId),
    AllComplete,
}

/// A rejected transition. State is never changed when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: cannot move to standard {requested} from {from}")]
pub struct TransitionError {
    pub requested: i64,
    pub from: SessionState,
}

impl SessionState {
    /// Enter standard `requested`.
    ///
    /// Legal only from `NotStarted` into 1, or from `Complete(n - 1)` into `n`.
    pub fn advance(self, requested: i64) -> Result<SessionState, TransitionError> {
        let reject = || TransitionError {
            requested,
            from: self,
        };
        let target = StandardId::new(requested).map_err(|_| reject())?;
        let legal = match self {
            SessionState::NotStarted => target == StandardId::FIRST,
            SessionState::Complete(done) => done.next() == Some(target),
            SessionState::InStandard(_) | SessionState::AllComplete => false,
        };
        if legal {
            Ok(SessionState::InStandard(target))
        } else {
            Err(reject())
        }
    }

    /// Mark standard `n` complete.
    ///
    /// A second commit for the same standard (a racing duplicate invocation)
    /// is accepted and leaves the state where the first commit put it.
    pub fn complete(self, n: StandardId) -> Result<SessionState, TransitionError> {
        let done = if n == StandardId::LAST {
            SessionState::AllComplete
        } else {
            SessionState::Complete(n)
        };
        match self {
            SessionState::InStandard(active) if active == n => Ok(done),
            state if state == done => Ok(done),
            _ => Err(TransitionError {
                requested: i64::from(n.number()),
                from: self,
            }),
        }
    }

    /// The standard an invocation may currently run against.
    pub fn active_standard(self) -> Option<StandardId> {
        match self {
            SessionState::InStandard(n) => Some(n),
            _ => None,
        }
    }

    /// The standard the caller should work on next, if any.
    pub fn next_standard(self) -> Option<StandardId> {
        match self {
            SessionState::NotStarted => Some(StandardId::FIRST),
            SessionState::InStandard(n) => Some(n),
            SessionState::Complete(n) => n.next(),
            SessionState::AllComplete => None,
        }
    }

    pub fn completed_count(self) -> u8 {
        match self {
            SessionState::NotStarted => 0,
            SessionState::InStandard(n) => n.number() - 1,
            SessionState::Complete(n) => n.number(),
            SessionState::AllComplete => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::AllComplete)
    }

    pub(crate) fn to_columns(self) -> (&'static str, Option<u8>) {
        match self {
            SessionState::NotStarted => ("not_started", None),
            SessionState::InStandard(n) => ("in_standard", Some(n.number())),
            SessionState::Complete(n) => ("complete", Some(n.number())),
            SessionState::AllComplete => ("all_complete", None),
        }
    }

    pub(crate) fn from_columns(phase: &str, standard: Option<i64>) -> Option<Self> {
        let standard = standard.and_then(|n| StandardId::new(n).ok());
        match (phase, standard) {
            ("not_started", _) => Some(SessionState::NotStarted),
            ("in_standard", Some(n)) => Some(SessionState::InStandard(n)),
            ("complete", Some(n)) => Some(SessionState::Complete(n)),
            ("all_complete", _) => Some(SessionState::AllComplete),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::InStandard(n) => write!(f, "in standard {}", n),
            SessionState::Complete(n) => write!(f, "standard {} complete", n),
            SessionState::AllComplete => write!(f, "all standards complete"),
        }
    }
}

/// In-memory holder that applies transitions atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMachine {
    state: SessionState,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::resume(SessionState::NotStarted)
    }

    pub fn resume(state: SessionState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, n: i64) -> Result<SessionState, TransitionError> {
        self.state = self.state.advance(n)?;
        Ok(self.state)
    }

    pub fn complete(&mut self, n: StandardId) -> Result<SessionState, TransitionError> {
        self.state = self.state.complete(n)?;
        Ok(self.state)
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
