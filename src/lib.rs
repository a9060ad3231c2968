//! Result reconciliation engine for king-of-the-hill scrimmage tracking.
//!
//! The engine turns a stream of reported game outcomes into king, streak and
//! ego-floor state, deduplicates repeated reports, and reconciles edits to
//! already-processed reports under a bounded-recalculation policy. It is a
//! pure state machine: platform side effects (roles, leaderboard posts,
//! logging) come back to the caller as [`models::Intent`] values.

pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod telemetry;

pub use config::Config;
pub use error::EngineError;
pub use service::{MemberDirectory, ScrimEngine};
