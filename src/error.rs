//! Error types for the PIR library.

use thiserror::Error;

/// Failures surfaced by query construction, query processing, and proof
/// generation.
///
/// Verification entry points (`auth_check`, `check_audit`) intentionally
/// return a plain `bool` instead: a verifier must not reveal which of its
/// internal checks rejected.
#[derive(Error, Debug)]
pub enum PirError {
    /// Invalid group size, zero-height database, or an index outside the
    /// queryable domain.
    #[error("invalid query geometry: {0}")]
    Geometry(String),

    /// A result vector arrived with a length the protocol does not allow,
    /// e.g. a challenge scan that did not produce exactly one slot.
    #[error("unexpected result shape: {0}")]
    ShapeMismatch(String),

    /// Both nested-subtracted challenge tokens decrypted to nonzero
    /// values, so the server answered neither branch honestly.
    #[error("both challenge tokens are nonzero; server cheating")]
    ServerCheating,

    /// Propagated failure from the Paillier or DPF layer.
    #[error("crypto operation failed: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, PirError>;
