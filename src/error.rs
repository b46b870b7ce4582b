//! Domain error kinds (§7).
//!
//! Transient upstream issues are handled by the caller (dropped provider,
//! counted tunnel failure) and never reach here as an `Err` — this enum
//! exists for the kinds that do need to cross a module boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Broker fatal error or provider 4xx: surfaced to the caller verbatim.
    #[error("fatal upstream error {code}: {message}")]
    Fatal { code: i32, message: String },

    /// Pre-trade admission denial. Never a thrown failure at the risk-gate
    /// boundary itself (`RiskGate::check` returns a `Decision`), but other
    /// callers that only want a yes/no surface this variant.
    #[error("admission denied: {reason}")]
    AdmissionDenied { reason: String },

    /// Modify a non-modifiable order, duplicate subscription with an
    /// incompatible key, lock conflict, etc. State is left untouched.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Logged by the caller; the in-memory operation that provoked it is
    /// still authoritative when it already succeeded against the broker.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Programmer error / invariant violation. Logged at error level by
    /// the caller; never unwinds the process.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
