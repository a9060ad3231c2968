// Service layer for the scrim crown engine
pub mod king_service;
pub mod message_service;

#[cfg(test)]
mod message_service_test;

pub use king_service::{apply_outcome, expire_king, should_expire};
pub use message_service::{content_fingerprint, MemberDirectory, ScrimEngine};
