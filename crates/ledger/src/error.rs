use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_units::ConversionError;

pub type StockResult<T> = Result<T, StockError>;

/// Failures of the pure ledger decisions (allocation, validation, conversion).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StockError {
    /// Allocation could not cover the requested quantity. Nothing is written.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: f64, available: f64 },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
