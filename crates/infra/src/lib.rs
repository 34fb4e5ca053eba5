//! Infrastructure layer: storage boundary, catalog collaborator, configuration,
//! the stock ledger service and its background workers.

pub mod catalog;
pub mod config;
pub mod error;
pub mod locks;
pub mod service;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use catalog::{Catalog, InMemoryCatalog, ProductRecord, VariantRecord, ZoneRecord};
pub use config::{ConfigError, LedgerConfig};
pub use error::{LedgerError, LedgerResult};
pub use service::{
    AddStock, BalanceReport, BalanceSubject, ChangeOutcome, DeductStock, DeductionOutcome,
    FinishRevision, PlanRevision, Quantity, RecordChange, ReleaseTarget, ReserveStock,
    RevisionQuery, StockEnvelope, StockLedgerService, SweepReport, WarehouseStock, ZoneStock,
    ZoneVariant,
};
pub use store::{ChangeSet, InMemoryLedgerStore, LedgerStore, StoreError};
pub use workers::{
    BalanceRefresher, NotificationWorker, ReservationSweeper, SweeperConfig, SweeperHandle,
    SweeperStats, WorkerHandle,
};
