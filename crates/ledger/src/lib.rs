//! Stock ledger domain: entries, holds, counts and the allocation rules over them.
//!
//! Pure decisions, no IO. The infra crate loads a [`VariantLedger`] under a
//! per-variant lock, asks the planners here what to write, and commits.

pub mod allocation;
pub mod entry;
pub mod error;
pub mod events;
pub mod reservation;
pub mod revision;
pub mod variant;

pub use allocation::{
    plan_deduction, plan_reservation, plan_revert, split, Allocatable, Candidate, DeductionPlan,
    DeductionRequest, RevertPlan,
};
pub use entry::{LedgerEntry, Location, QTY_EPSILON};
pub use error::{StockError, StockResult};
pub use events::{format_price, AuditKind, AuditRecord, AuditRef, StockEvent};
pub use reservation::{
    default_expiry, HoldTerms, Reservation, DEFAULT_RESERVATION_TTL_MINUTES,
    MAX_RESERVATION_TTL_MINUTES,
};
pub use revision::{CountResult, CountSnapshot, Revision, RevisionState};
pub use variant::{ReservationMode, VariantLedger};
