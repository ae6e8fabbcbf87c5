//! Domain models for the feedback service.
//!
//! # Core Concepts
//!
//! - [`StandardId`]: one of the four practice standards, always in `1..=4`.
//! - [`StandardContext`]: reference passages retrieved once per standard.
//! - [`SessionRecord`]: the persisted per-session summaries, one field per standard.
//! - [`SessionProgress`]: where the session sits in the standard sequence.
//!
//! Sessions are anonymous. Nothing here links a session to a learner.

mod feedback;
mod session;
mod standard;

pub use feedback::*;
pub use session::*;
pub use standard::*;
