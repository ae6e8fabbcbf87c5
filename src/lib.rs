//! Standards-grounded COIN feedback for nursing preceptors.
//!
//! A preceptor's free-text feedback about a student is turned into a
//! structured Context / Observation / Impact / Next-steps summary for each of
//! the four BCCNM practice standards, in order, one session at a time.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod sync;
pub mod text;
