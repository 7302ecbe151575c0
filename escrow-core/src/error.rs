//! Error types for the trade escrow system
//!
//! One variant per caller-visible failure category: input validation,
//! lookup failures, authorization, state-machine guard violations and
//! the settlement backend failure modes.

use thiserror::Error;

/// Main error type for escrow trade operations
#[derive(Error, Debug)]
pub enum TradeError {
    /// Malformed or missing input, detected before any state mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown trade identifier
    #[error("Trade not found: {0}")]
    NotFound(String),

    /// Trade identifier already exists
    #[error("Trade already exists: {0}")]
    Conflict(String),

    /// Actor lacks permission for the requested transition
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// State machine guard failed
    #[error("Invalid transition: {from} -> {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// The value-movement step failed; no state was persisted
    #[error("Settlement failure: {0}")]
    SettlementFailure(String),

    /// Settlement did not confirm within the bounded wait; poll the trade
    #[error("Settlement pending: {0}")]
    SettlementPending(String),

    /// The settlement backend could not be reached at all
    #[error("Settlement backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TradeError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(id: S) -> Self {
        Self::Conflict(id.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an invalid-transition error
    pub fn invalid_transition<S: Into<String>>(from: S, to: S, reason: S) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a settlement failure error
    pub fn settlement<S: Into<String>>(msg: S) -> Self {
        Self::SettlementFailure(msg.into())
    }

    /// Create a settlement-pending error
    pub fn pending<S: Into<String>>(msg: S) -> Self {
        Self::SettlementPending(msg.into())
    }

    /// Create a backend-unavailable error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable category code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SettlementFailure(_) => "settlement_failure",
            Self::SettlementPending(_) => "settlement_pending",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::Serialization(_) | Self::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_category() {
        assert_eq!(TradeError::validation("x").code(), "validation_error");
        assert_eq!(TradeError::not_found("x").code(), "not_found");
        assert_eq!(TradeError::conflict("x").code(), "conflict");
        assert_eq!(
            TradeError::invalid_transition("Created", "Completed", "no deposit").code(),
            "invalid_transition"
        );
        assert_eq!(TradeError::pending("slow").code(), "settlement_pending");
    }

    #[test]
    fn invalid_transition_message_names_both_states() {
        let err = TradeError::invalid_transition("Funded", "Funded", "already funded");
        let msg = err.to_string();
        assert!(msg.contains("Funded -> Funded"));
        assert!(msg.contains("already funded"));
    }
}
