//! Error taxonomy shared by the order, promo and cart operations
use crate::lifecycle::StatusKind;

#[derive(thiserror::Error, Debug)]
pub enum CommerceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("authentication required: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("cannot move order from {current} to {attempted}: {reason}")]
    InvalidTransition {
        current: StatusKind,
        attempted: StatusKind,
        reason: &'static str,
    },
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error(transparent)]
    Promo(#[from] PromoRejection),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Reasons a promo code is refused, in the order they are checked.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PromoRejection {
    #[error("promo code not found")]
    CodeNotFound,
    #[error("promo code is not active")]
    Inactive,
    #[error("promo code is outside its validity window")]
    OutOfWindow,
    #[error("promo code usage limit reached")]
    UsageExhausted,
    #[error("cart total is below the minimum purchase of {minimum}")]
    BelowMinimum { minimum: u64 },
    #[error("promo code does not apply to any category in the cart")]
    CategoryMismatch,
}

impl PromoRejection {
    /// Stable machine-readable reason used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CodeNotFound => "CODE_NOT_FOUND",
            Self::Inactive => "INACTIVE",
            Self::OutOfWindow => "OUT_OF_WINDOW",
            Self::UsageExhausted => "USAGE_EXHAUSTED",
            Self::BelowMinimum { .. } => "BELOW_MINIMUM",
            Self::CategoryMismatch => "CATEGORY_MISMATCH",
        }
    }
}

impl CommerceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

impl From<minicbor::decode::Error> for CommerceError {
    fn from(err: minicbor::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
