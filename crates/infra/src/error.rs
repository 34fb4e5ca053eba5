//! Service-facing error taxonomy.

use thiserror::Error;

use stockledger_core::{DomainError, UnitId, VariantId};
use stockledger_ledger::StockError;
use stockledger_units::ConversionError;

use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Allocation could not cover the request; nothing was written.
    #[error("insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: f64,
        available: f64,
    },

    #[error("no unit conversion from {from} to {to}")]
    MissingConversion { from: UnitId, to: UnitId },

    #[error("invalid unit equivalence: {0}")]
    InvalidEquivalence(String),

    /// Missing rows and rows of another tenant alike.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(StoreError),

    /// The change was committed but a notification could not be published.
    #[error("failed to publish notification: {0}")]
    Publish(String),
}

impl LedgerError {
    /// Map a domain decision failure for `variant_id`.
    pub fn from_stock(variant_id: VariantId, err: StockError) -> Self {
        match err {
            StockError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                variant_id,
                requested,
                available,
            },
            StockError::Conversion(e) => e.into(),
            StockError::Domain(e) => e.into(),
        }
    }
}

impl From<ConversionError> for LedgerError {
    fn from(value: ConversionError) -> Self {
        match value {
            ConversionError::MissingConversion { from, to } => {
                LedgerError::MissingConversion { from, to }
            }
            ConversionError::InvalidEquivalence { reason } => LedgerError::InvalidEquivalence(reason),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::Validation(msg)
            }
            DomainError::NotFound(kind) => LedgerError::NotFound(kind),
            DomainError::Conflict(msg) | DomainError::InvariantViolation(msg) => {
                LedgerError::Conflict(msg)
            }
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Missing(kind) | StoreError::TenantMismatch(kind) => {
                LedgerError::NotFound(kind)
            }
            other => LedgerError::Store(other),
        }
    }
}
