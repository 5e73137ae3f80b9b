//! Service-level error taxonomy.
//!
//! One enum covers every failure the facade can surface. Variants are
//! cloneable on purpose: a single-flight leader broadcasts its outcome to
//! every follower, so errors travel through a `broadcast` channel.

use thiserror::Error;

/// Unified error for context retrieval and cache administration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The request failed validation before any work was done.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A case-scoped operation was attempted without a case id.
    #[error("case_id is required for case-scoped operations")]
    MissingCaseId,

    /// The case store has no record of the requested case.
    #[error("case not found: {case_id}")]
    CaseNotFound { case_id: String },

    /// The caller's deadline elapsed before a result could be produced.
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// A required upstream is unreachable: breaker open or retries exhausted.
    #[error("upstream unavailable: {detail}")]
    UpstreamUnavailable { detail: String },

    /// Upstream rejected the request outright (4xx); indicates a client bug.
    #[error("upstream rejected request ({status}): {detail}")]
    UpstreamRejected { status: u16, detail: String },

    /// The single-flight leader for this key was cancelled before completing.
    #[error("context build was cancelled")]
    BuildCancelled,

    /// Anything unexpected. Logged with request context before surfacing.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::MissingCaseId => "missing_case_id",
            Self::CaseNotFound { .. } => "case_not_found",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::BuildCancelled => "build_cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn is_case_not_found(&self) -> bool {
        matches!(self, Self::CaseNotFound { .. })
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = EngineError::CaseNotFound { case_id: "K9".into() };
        assert!(err.to_string().contains("K9"));

        let err = EngineError::UpstreamRejected { status: 422, detail: "bad shape".into() };
        assert!(err.to_string().contains("422"));
        assert!(err.to_string().contains("bad shape"));
    }

    #[test]
    fn codes_are_distinct_per_variant() {
        let variants = [
            EngineError::Validation("x".into()).code(),
            EngineError::MissingCaseId.code(),
            EngineError::CaseNotFound { case_id: "k".into() }.code(),
            EngineError::DeadlineExceeded { elapsed_ms: 1 }.code(),
            EngineError::UpstreamUnavailable { detail: "d".into() }.code(),
            EngineError::UpstreamRejected { status: 400, detail: "d".into() }.code(),
            EngineError::BuildCancelled.code(),
            EngineError::Internal("i".into()).code(),
        ];
        let unique: std::collections::HashSet<_> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len());
    }

    #[test]
    fn predicates_match_their_variants() {
        assert!(EngineError::CaseNotFound { case_id: "k".into() }.is_case_not_found());
        assert!(EngineError::DeadlineExceeded { elapsed_ms: 10 }.is_deadline_exceeded());
        assert!(EngineError::UpstreamUnavailable { detail: "down".into() }.is_unavailable());
        assert!(!EngineError::MissingCaseId.is_case_not_found());
    }
}
