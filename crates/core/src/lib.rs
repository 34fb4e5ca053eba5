//! Shared building blocks for the stock ledger: identifiers, the domain error
//! model, the entity trait and the clock collaborator. No IO.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    EntryId, EquivalenceId, ProductId, ReservationId, RevisionId, TenantId, UnitId, VariantId,
    WarehouseId, WarehouseZoneId,
};
