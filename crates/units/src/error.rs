use thiserror::Error;

use stockledger_core::UnitId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    /// No configured chain connects the two units.
    #[error("no known conversion from unit {from} to unit {to}")]
    MissingConversion { from: UnitId, to: UnitId },

    /// A configured equivalence is degenerate, or its chain is cyclic,
    /// inconsistent or deeper than the traversal cap.
    #[error("invalid unit equivalence: {reason}")]
    InvalidEquivalence { reason: String },
}

impl ConversionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidEquivalence {
            reason: reason.into(),
        }
    }
}
