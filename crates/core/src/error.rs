//! Error taxonomy shared across the ingestion, detection and query paths.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The agent secret did not match any registered agent.
    #[error("unknown agent or invalid secret")]
    Unauthorized,

    /// A batch or attribute set failed validation; the whole request is
    /// rejected, nothing is stored.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A status transition used a value outside {new, ack, closed}.
    #[error("invalid status '{0}' (use new, ack or closed)")]
    InvalidStatus(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Transient failure reaching the event log or alert store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}
