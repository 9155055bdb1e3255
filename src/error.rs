//! Error types for the discovery engine. Per-host and per-probe failures never
//! construct one of these — they collapse to missing optional fields on the
//! device record. Only scan-setup failure and cancellation are surfaced here.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Network/CIDR lookup or expansion failed (scan-setup time).
    #[error("network error: {0}")]
    Network(String),

    /// The storage collaborator returned an error for a framework-level call
    /// (fetching the network or rule, not a per-device upsert).
    #[error("storage error: {0}")]
    Storage(String),

    /// A CIDR or bare IP string could not be parsed.
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    /// The scheduler or network scanner was asked to stop mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A task handler panicked or returned an error outside the discovery
    /// domain (e.g. a non-discovery job submitted to the worker pool).
    #[error("task failed: {0}")]
    TaskFailed(String),
}
