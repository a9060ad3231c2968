use thiserror::Error;

/// Engine failure taxonomy. Nothing here is fatal to the caller: snapshot
/// failures fall back to the empty initial state, and per-outcome problems are
/// reported as dispositions rather than errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed snapshot document: {0}")]
    MalformedSnapshot(#[from] serde_json::Error),

    #[error("no state document found in message content")]
    MissingStateDocument,

    #[error("malformed result key: {0}")]
    MalformedResultKey(String),
}
