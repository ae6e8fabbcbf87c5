//! Session progression through the four standards.

mod service;
mod state;

pub use service::FeedbackService;
pub use state::{SessionMachine, SessionState, TransitionError};
