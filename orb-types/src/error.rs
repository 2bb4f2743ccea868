//! The error taxonomy of spec.md §7, realised as a single enum so that
//! every layer (storage, bus, CAS, KMS, federation, REST) propagates the
//! same small set of kinds instead of inventing its own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrbError {
    /// Malformed input (operation, activity, VC). Returned to the caller,
    /// never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Signature or bearer-token failure. Returned to the caller, never
    /// retried.
    #[error("auth error: {0}")]
    Auth(String),

    /// A CAS object or DID is absent. The observer may retry the fetch
    /// against an alternative transport; REST callers get 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, 5xx, connection reset, GOAWAY. Retried with
    /// bounded exponential backoff at the call site.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// Witness policy unsatisfied, or an accept-list rejection.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// An incoming anchor conflicts with the locally-known tip. Resolved
    /// via the canonical-history rule, logged, not fatal.
    #[error("fork detected: {0}")]
    ForkDetected(String),

    /// Storage, KMS, or invariant breach. The owning component halts and
    /// surfaces an operator alert.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl OrbError {
    /// The HTTP status code `orb-server` maps this kind to.
    pub fn http_status(&self) -> u16 {
        match self {
            OrbError::Validation(_) => 400,
            OrbError::Auth(_) => 401,
            OrbError::NotFound(_) => 404,
            OrbError::TransientTransport(_) => 503,
            OrbError::PolicyViolation(_) => 422,
            OrbError::ForkDetected(_) => 409,
            OrbError::Fatal(_) => 500,
        }
    }

    /// Whether a caller should retry this error with backoff. Used by the
    /// outbox delivery worker and the observer's multi-transport fetch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrbError::TransientTransport(_))
    }
}

pub type Result<T> = std::result::Result<T, OrbError>;
