use crate::store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Machine-readable reason attached to every conflict so callers can render
/// a specific message instead of a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictCode {
    ChargeAlreadyPublished,
    ChargeClosed,
    InvoiceCanceled,
    InvoiceAlreadyPaid,
    InvoiceHasPayments,
    CannotRemovePaidParticipant,
    IdempotencyKeyReused,
}

impl ConflictCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChargeAlreadyPublished => "CHARGE_ALREADY_PUBLISHED",
            Self::ChargeClosed => "CHARGE_CLOSED",
            Self::InvoiceCanceled => "INVOICE_CANCELED",
            Self::InvoiceAlreadyPaid => "INVOICE_ALREADY_PAID",
            Self::InvoiceHasPayments => "INVOICE_HAS_PAYMENTS",
            Self::CannotRemovePaidParticipant => "CANNOT_REMOVE_PAID_PARTICIPANT",
            Self::IdempotencyKeyReused => "IDEMPOTENCY_KEY_REUSED",
        }
    }
}

/// Coarse error taxonomy used by transport layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Internal,
}

/// Billing engine errors.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict { code: ConflictCode, message: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("ownership directory failure: {0}")]
    Directory(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl BillingError {
    pub fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} '{id}' not found"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Directory(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict { code, .. } => code.as_str(),
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Directory(_) | Self::Store(_) => "INTERNAL",
        }
    }

    pub fn conflict_code(&self) -> Option<ConflictCode> {
        match self {
            Self::Conflict { code, .. } => Some(*code),
            _ => None,
        }
    }
}
