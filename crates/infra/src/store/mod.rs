//! Ledger persistence boundary.
//!
//! Reads are tenant-scoped queries; every write of one service operation is
//! collected into a [`ChangeSet`] and applied by [`LedgerStore::commit`] as a
//! single unit of work: all of it or none of it.

mod in_memory;
mod tenant_map;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use stockledger_core::{
    EntryId, EquivalenceId, ReservationId, RevisionId, TenantId, UnitId, VariantId,
    WarehouseZoneId,
};
use stockledger_ledger::{LedgerEntry, Reservation, Revision};
use stockledger_units::{Unit, UnitEquivalence};

pub use in_memory::InMemoryLedgerStore;
pub use tenant_map::TenantMap;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    /// A delete or reference named a row this tenant does not have.
    #[error("{0} not found")]
    Missing(&'static str),

    /// A row in the change set belongs to another tenant.
    #[error("{0} belongs to another tenant")]
    TenantMismatch(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Inserts and deletes of one operation, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub insert_entries: Vec<LedgerEntry>,
    pub delete_entries: Vec<EntryId>,
    pub insert_reservations: Vec<Reservation>,
    pub delete_reservations: Vec<ReservationId>,
    pub upsert_revisions: Vec<Revision>,
    pub delete_revisions: Vec<RevisionId>,
    pub upsert_units: Vec<Unit>,
    pub insert_equivalences: Vec<UnitEquivalence>,
    pub delete_equivalences: Vec<EquivalenceId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entry(mut self, entry: LedgerEntry) -> Self {
        self.insert_entries.push(entry);
        self
    }

    pub fn insert_reservation(mut self, reservation: Reservation) -> Self {
        self.insert_reservations.push(reservation);
        self
    }

    pub fn delete_reservation(mut self, id: ReservationId) -> Self {
        self.delete_reservations.push(id);
        self
    }

    pub fn upsert_revision(mut self, revision: Revision) -> Self {
        self.upsert_revisions.push(revision);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.insert_entries.is_empty()
            && self.delete_entries.is_empty()
            && self.insert_reservations.is_empty()
            && self.delete_reservations.is_empty()
            && self.upsert_revisions.is_empty()
            && self.delete_revisions.is_empty()
            && self.upsert_units.is_empty()
            && self.insert_equivalences.is_empty()
            && self.delete_equivalences.is_empty()
    }
}

/// Tenant-scoped ledger storage.
///
/// Implementations must never return rows of another tenant and must apply a
/// [`ChangeSet`] atomically.
pub trait LedgerStore: Send + Sync {
    fn entries_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    fn entry(&self, tenant_id: TenantId, id: EntryId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries of every variant recorded in one warehouse zone.
    fn entries_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    fn reservations_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Reservation>, StoreError>;

    fn reservation(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;

    fn cart_reservations(
        &self,
        tenant_id: TenantId,
        cart_id: &str,
        variant_id: Option<VariantId>,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Reservations of every tenant whose expiry is at or before `now`.
    fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError>;

    fn revision(&self, tenant_id: TenantId, id: RevisionId) -> Result<Option<Revision>, StoreError>;

    fn revisions_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Revision>, StoreError>;

    fn revisions_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<Revision>, StoreError>;

    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Result<Option<Unit>, StoreError>;

    fn units(&self, tenant_id: TenantId) -> Result<Vec<Unit>, StoreError>;

    fn equivalences(&self, tenant_id: TenantId) -> Result<Vec<UnitEquivalence>, StoreError>;

    fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<(), StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn entries_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries_for_variant(tenant_id, variant_id)
    }

    fn entry(&self, tenant_id: TenantId, id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).entry(tenant_id, id)
    }

    fn entries_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries_in_zone(tenant_id, zone_id)
    }

    fn reservations_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).reservations_for_variant(tenant_id, variant_id)
    }

    fn reservation(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        (**self).reservation(tenant_id, id)
    }

    fn cart_reservations(
        &self,
        tenant_id: TenantId,
        cart_id: &str,
        variant_id: Option<VariantId>,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).cart_reservations(tenant_id, cart_id, variant_id)
    }

    fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        (**self).expired_reservations(now)
    }

    fn revision(&self, tenant_id: TenantId, id: RevisionId) -> Result<Option<Revision>, StoreError> {
        (**self).revision(tenant_id, id)
    }

    fn revisions_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Revision>, StoreError> {
        (**self).revisions_for_variant(tenant_id, variant_id)
    }

    fn revisions_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<Revision>, StoreError> {
        (**self).revisions_in_zone(tenant_id, zone_id)
    }

    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Result<Option<Unit>, StoreError> {
        (**self).unit(tenant_id, id)
    }

    fn units(&self, tenant_id: TenantId) -> Result<Vec<Unit>, StoreError> {
        (**self).units(tenant_id)
    }

    fn equivalences(&self, tenant_id: TenantId) -> Result<Vec<UnitEquivalence>, StoreError> {
        (**self).equivalences(tenant_id)
    }

    fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<(), StoreError> {
        (**self).commit(tenant_id, changes)
    }
}
