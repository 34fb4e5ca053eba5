use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use stockledger_core::{
    Entity, EntryId, EquivalenceId, ReservationId, RevisionId, TenantId, UnitId, VariantId,
    WarehouseZoneId,
};
use stockledger_ledger::{LedgerEntry, Reservation, Revision};
use stockledger_units::{Unit, UnitEquivalence};

use super::{ChangeSet, LedgerStore, StoreError, TenantMap};

#[derive(Debug, Default)]
struct Tables {
    entries: TenantMap<EntryId, LedgerEntry>,
    reservations: TenantMap<ReservationId, Reservation>,
    revisions: TenantMap<RevisionId, Revision>,
    units: TenantMap<UnitId, Unit>,
    equivalences: TenantMap<EquivalenceId, UnitEquivalence>,
}

/// In-memory ledger store for tests/dev.
///
/// One lock guards every table, so a commit is validated in full before the
/// first row changes.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Number of ledger entries across all tenants.
    pub fn entry_count(&self) -> usize {
        self.read().map(|t| t.entries.len()).unwrap_or(0)
    }
}

fn check_tenant<T: Entity>(tenant_id: TenantId, row: &T, kind: &'static str) -> Result<(), StoreError> {
    if row.tenant_id() == tenant_id {
        Ok(())
    } else {
        Err(StoreError::TenantMismatch(kind))
    }
}

fn sorted_entries(mut entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    entries.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id())));
    entries
}

fn sorted_revisions(mut revisions: Vec<Revision>) -> Vec<Revision> {
    revisions.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id())));
    revisions
}

fn sorted_reservations(mut reservations: Vec<Reservation>) -> Vec<Reservation> {
    reservations.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id())));
    reservations
}

impl Tables {
    /// Reject the change set unless every reference resolves after applying it.
    fn validate(&self, tenant_id: TenantId, changes: &ChangeSet) -> Result<(), StoreError> {
        let deleted_entries: HashSet<EntryId> = changes.delete_entries.iter().copied().collect();
        let inserted_entries: HashSet<EntryId> =
            changes.insert_entries.iter().map(|e| e.id()).collect();
        let entry_survives = |id: EntryId| {
            !deleted_entries.contains(&id)
                && (inserted_entries.contains(&id) || self.entries.contains(tenant_id, &id))
        };

        for id in &changes.delete_entries {
            if !self.entries.contains(tenant_id, id) {
                return Err(StoreError::Missing("ledger entry"));
            }
        }
        for entry in &changes.insert_entries {
            check_tenant(tenant_id, entry, "ledger entry")?;
            if let Some(origin) = entry.origin_entry() {
                if !entry_survives(origin) {
                    return Err(StoreError::Missing("origin ledger entry"));
                }
            }
        }
        for entry in self.entries.values(tenant_id) {
            if deleted_entries.contains(&entry.id()) {
                continue;
            }
            if entry.origin_entry().is_some_and(|o| deleted_entries.contains(&o)) {
                return Err(StoreError::Conflict(format!(
                    "ledger entry {} still derives from a deleted entry",
                    entry.id()
                )));
            }
        }

        let deleted_reservations: HashSet<ReservationId> =
            changes.delete_reservations.iter().copied().collect();
        for id in &changes.delete_reservations {
            if !self.reservations.contains(tenant_id, id) {
                return Err(StoreError::Missing("reservation"));
            }
        }
        for r in &changes.insert_reservations {
            check_tenant(tenant_id, r, "reservation")?;
            if !entry_survives(r.origin_entry()) {
                return Err(StoreError::Missing("origin ledger entry"));
            }
        }
        for r in self.reservations.values(tenant_id) {
            if !deleted_reservations.contains(&r.id()) && deleted_entries.contains(&r.origin_entry()) {
                return Err(StoreError::Conflict(format!(
                    "reservation {} still holds a deleted entry",
                    r.id()
                )));
            }
        }

        let upserted_revisions: HashSet<RevisionId> =
            changes.upsert_revisions.iter().map(|r| r.id()).collect();
        for id in &changes.delete_revisions {
            if !self.revisions.contains(tenant_id, id) {
                return Err(StoreError::Missing("revision"));
            }
        }
        for rev in &changes.upsert_revisions {
            check_tenant(tenant_id, rev, "revision")?;
            if let Some(origin) = rev.origin_entry() {
                if !entry_survives(origin) {
                    return Err(StoreError::Missing("origin ledger entry"));
                }
            }
        }
        for rev in self.revisions.values(tenant_id) {
            if !upserted_revisions.contains(&rev.id())
                && rev.origin_entry().is_some_and(|o| deleted_entries.contains(&o))
            {
                return Err(StoreError::Conflict(format!(
                    "revision {} still references a deleted entry",
                    rev.id()
                )));
            }
        }

        for unit in &changes.upsert_units {
            check_tenant(tenant_id, unit, "unit")?;
        }
        let known_unit = |id: UnitId| {
            self.units.contains(tenant_id, &id)
                || changes.upsert_units.iter().any(|u| u.id() == id)
        };
        let deleted_equivalences: HashSet<EquivalenceId> =
            changes.delete_equivalences.iter().copied().collect();
        for id in &changes.delete_equivalences {
            if !self.equivalences.contains(tenant_id, id) {
                return Err(StoreError::Missing("unit equivalence"));
            }
        }
        let mut pairs: HashSet<(UnitId, UnitId)> = self
            .equivalences
            .values(tenant_id)
            .filter(|eq| !deleted_equivalences.contains(&eq.id()))
            .map(|eq| eq.pair_key())
            .collect();
        for eq in &changes.insert_equivalences {
            check_tenant(tenant_id, eq, "unit equivalence")?;
            if !known_unit(eq.sale_unit()) || !known_unit(eq.storage_unit()) {
                return Err(StoreError::Missing("unit"));
            }
            if !pairs.insert(eq.pair_key()) {
                return Err(StoreError::Conflict(
                    "an equivalence for this unit pair already exists".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn apply(&mut self, tenant_id: TenantId, changes: ChangeSet) {
        for id in &changes.delete_reservations {
            self.reservations.remove(tenant_id, id);
        }
        for id in &changes.delete_entries {
            self.entries.remove(tenant_id, id);
        }
        for id in &changes.delete_revisions {
            self.revisions.remove(tenant_id, id);
        }
        for id in &changes.delete_equivalences {
            self.equivalences.remove(tenant_id, id);
        }
        for unit in changes.upsert_units {
            self.units.upsert(tenant_id, unit.id(), unit);
        }
        for eq in changes.insert_equivalences {
            self.equivalences.upsert(tenant_id, eq.id(), eq);
        }
        for entry in changes.insert_entries {
            self.entries.upsert(tenant_id, entry.id(), entry);
        }
        for r in changes.insert_reservations {
            self.reservations.upsert(tenant_id, r.id(), r);
        }
        for rev in changes.upsert_revisions {
            self.revisions.upsert(tenant_id, rev.id(), rev);
        }
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn entries_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_entries(
            tables
                .entries
                .values(tenant_id)
                .filter(|e| e.variant_id() == variant_id)
                .cloned()
                .collect(),
        ))
    }

    fn entry(&self, tenant_id: TenantId, id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read()?.entries.get(tenant_id, &id).cloned())
    }

    fn entries_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_entries(
            tables
                .entries
                .values(tenant_id)
                .filter(|e| e.location().zone_id == zone_id)
                .cloned()
                .collect(),
        ))
    }

    fn reservations_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_reservations(
            tables
                .reservations
                .values(tenant_id)
                .filter(|r| r.variant_id() == variant_id)
                .cloned()
                .collect(),
        ))
    }

    fn reservation(
        &self,
        tenant_id: TenantId,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.read()?.reservations.get(tenant_id, &id).cloned())
    }

    fn cart_reservations(
        &self,
        tenant_id: TenantId,
        cart_id: &str,
        variant_id: Option<VariantId>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_reservations(
            tables
                .reservations
                .values(tenant_id)
                .filter(|r| r.belongs_to_cart(cart_id))
                .filter(|r| variant_id.is_none_or(|v| r.variant_id() == v))
                .cloned()
                .collect(),
        ))
    }

    fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_reservations(
            tables
                .reservations
                .all()
                .map(|(_, r)| r)
                .filter(|r| !r.is_active(now))
                .cloned()
                .collect(),
        ))
    }

    fn revision(&self, tenant_id: TenantId, id: RevisionId) -> Result<Option<Revision>, StoreError> {
        Ok(self.read()?.revisions.get(tenant_id, &id).cloned())
    }

    fn revisions_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Vec<Revision>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_revisions(
            tables
                .revisions
                .values(tenant_id)
                .filter(|r| r.variant_id() == variant_id)
                .cloned()
                .collect(),
        ))
    }

    fn revisions_in_zone(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> Result<Vec<Revision>, StoreError> {
        let tables = self.read()?;
        Ok(sorted_revisions(
            tables
                .revisions
                .values(tenant_id)
                .filter(|r| r.zone_id() == zone_id)
                .cloned()
                .collect(),
        ))
    }

    fn unit(&self, tenant_id: TenantId, id: UnitId) -> Result<Option<Unit>, StoreError> {
        Ok(self.read()?.units.get(tenant_id, &id).cloned())
    }

    fn units(&self, tenant_id: TenantId) -> Result<Vec<Unit>, StoreError> {
        let mut units = self.read()?.units.list(tenant_id);
        units.sort_by(|a, b| a.title().cmp(b.title()).then(a.id().cmp(&b.id())));
        Ok(units)
    }

    fn equivalences(&self, tenant_id: TenantId) -> Result<Vec<UnitEquivalence>, StoreError> {
        let mut equivalences = self.read()?.equivalences.list(tenant_id);
        equivalences.sort_by_key(|eq| eq.id());
        Ok(equivalences)
    }

    fn commit(&self, tenant_id: TenantId, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tables = self.write()?;
        tables.validate(tenant_id, &changes)?;
        tables.apply(tenant_id, changes);
        Ok(())
    }
}
