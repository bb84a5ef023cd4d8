// =============================================================================
// Pipeline error taxonomy
// =============================================================================
//
// Call sites use `anyhow::Result` (see binance/client.rs's convention,
// kept from the teacher). This module adds a structured `ErrorKind` that
// components can classify errors into, so the retry helper and the bus
// worker can decide what to do without downcasting strings.
// =============================================================================

use thiserror::Error;

/// Abstract error kinds a component can classify a failure into.
///
/// Transient/RateLimited are retryable; ProtocolInvalid/ConstraintViolation
/// are expected-and-absorbed; Internal/Fatal are not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    RateLimited,
    ProtocolInvalid,
    ConstraintViolation,
    Internal,
    Fatal,
}

impl ErrorKind {
    /// Whether the retry helper should attempt this operation again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientNetwork | ErrorKind::RateLimited)
    }
}

/// Structured pipeline error. Most call sites still return `anyhow::Result`
/// and wrap a `PipelineError` with `.context(...)`; use `PipelineError::kind`
/// where a caller needs to branch on error kind.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient network error in {component}: {source}")]
    TransientNetwork {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited by upstream in {component}")]
    RateLimited { component: String },

    #[error("protocol error in {component}: {detail}")]
    ProtocolInvalid { component: String, detail: String },

    #[error("constraint violation in {collection} (expected under replay): {detail}")]
    ConstraintViolation { collection: String, detail: String },

    #[error("internal error in {component}: {source}")]
    Internal {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fatal error: {detail}")]
    Fatal { detail: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            PipelineError::RateLimited { .. } => ErrorKind::RateLimited,
            PipelineError::ProtocolInvalid { .. } => ErrorKind::ProtocolInvalid,
            PipelineError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            PipelineError::Internal { .. } => ErrorKind::Internal,
            PipelineError::Fatal { .. } => ErrorKind::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_rate_limited_are_retryable() {
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::ProtocolInvalid.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
    }

    #[test]
    fn constraint_violation_kind_maps_correctly() {
        let e = PipelineError::ConstraintViolation {
            collection: "trades_btc".into(),
            detail: "duplicate trade_id".into(),
        };
        assert_eq!(e.kind(), ErrorKind::ConstraintViolation);
    }
}
