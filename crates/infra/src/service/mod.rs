//! Stock ledger service: the orchestration layer over the ledger domain.
//!
//! Every write follows the same pipeline:
//!
//! ```text
//! request
//!   -> validate references (catalog, units) for the tenant
//!   -> take the (tenant, variant) lock
//!   -> load the variant's entries and holds
//!   -> plan (pure, in stockledger-ledger)
//!   -> commit one ChangeSet
//!   -> release the lock
//!   -> publish notifications
//! ```
//!
//! Notifications go out only after the commit. A publish failure is returned
//! as [`LedgerError::Publish`]; the committed change stays.

mod balance;
mod commands;
mod reservation_book;
mod revision_tracker;
mod units;
mod zone_map;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use stockledger_core::{Clock, Entity, EntryId, TenantId, UnitId, VariantId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_ledger::{
    plan_deduction, plan_revert, AuditRecord, DeductionPlan, DeductionRequest, LedgerEntry,
    Location, Reservation, StockEvent, VariantLedger,
};
use stockledger_units::{ConversionCache, ConversionGraph, Converter, Unit};

use crate::catalog::{Catalog, VariantRecord};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::locks::VariantLocks;
use crate::store::{ChangeSet, LedgerStore};

pub use commands::{
    AddStock, BalanceReport, BalanceSubject, ChangeOutcome, DeductStock, DeductionOutcome,
    FinishRevision, PlanRevision, Quantity, RecordChange, ReleaseTarget, ReserveStock,
    RevisionQuery, SweepReport, WarehouseStock, ZoneStock, ZoneVariant,
};

/// Notification stream type published by the service.
pub type StockEnvelope = EventEnvelope<StockEvent>;

pub struct StockLedgerService<S, C, B, K> {
    store: S,
    catalog: C,
    bus: B,
    clock: K,
    config: LedgerConfig,
    conversions: ConversionCache,
    locks: VariantLocks,
}

impl<S, C, B, K> StockLedgerService<S, C, B, K>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<StockEnvelope>,
    K: Clock,
{
    pub fn new(store: S, catalog: C, bus: B, clock: K, config: LedgerConfig) -> Self {
        Self {
            conversions: ConversionCache::new(config.max_chain_depth),
            locks: VariantLocks::new(),
            store,
            catalog,
            bus,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append a stock addition.
    #[tracing::instrument(skip_all, fields(%tenant_id, variant_id = %cmd.variant_id, qty = cmd.qty))]
    pub fn add_stock(&self, tenant_id: TenantId, cmd: AddStock) -> LedgerResult<LedgerEntry> {
        self.require_variant(tenant_id, cmd.variant_id)?;
        self.require_unit(tenant_id, cmd.unit_id)?;
        let zone = self
            .catalog
            .zone(tenant_id, cmd.zone_id)
            .ok_or(LedgerError::NotFound("warehouse zone"))?;
        let now = self.clock.now();

        let entry = self.locks.with_lock(tenant_id, cmd.variant_id, || -> LedgerResult<_> {
            if let Some(origin) = cmd.origin_entry {
                self.require_entry_of(tenant_id, origin, cmd.variant_id)?;
            }
            let entry = LedgerEntry::addition(
                tenant_id,
                cmd.variant_id,
                cmd.unit_id,
                Location {
                    warehouse_id: zone.warehouse_id,
                    zone_id: zone.zone_id,
                },
                cmd.qty,
                cmd.price,
                now,
            )?
            .with_origin(cmd.origin_entry)
            .with_external_item(cmd.external_item_id.clone())
            .with_external_cart(cmd.external_cart_id.clone());
            self.store
                .commit(tenant_id, ChangeSet::new().insert_entry(entry.clone()))?;
            Ok(entry)
        })?;

        info!(entry_id = %entry.id(), "stock added");
        let label = self.unit_label(tenant_id, entry.unit_id());
        self.publish(
            tenant_id,
            vec![
                StockEvent::Audit(AuditRecord::balance_change(
                    tenant_id,
                    entry.variant_id(),
                    entry.id(),
                    entry.changes(),
                    &label,
                    entry.price(),
                    now,
                )),
                StockEvent::balance_changed(entry.variant_id(), now),
            ],
        )?;
        Ok(entry)
    }

    /// Deduct stock: replay check, then the cart's holds, then FIFO.
    ///
    /// Writes nothing on [`LedgerError::InsufficientStock`].
    #[tracing::instrument(skip_all, fields(%tenant_id, variant_id = %cmd.variant_id, qty = cmd.qty))]
    pub fn deduct_stock(
        &self,
        tenant_id: TenantId,
        cmd: DeductStock,
    ) -> LedgerResult<DeductionOutcome> {
        if !cmd.qty.is_finite() || cmd.qty >= 0.0 {
            return Err(LedgerError::Validation(format!(
                "deducted change must be negative, got {}",
                cmd.qty
            )));
        }
        self.require_variant(tenant_id, cmd.variant_id)?;
        self.require_unit(tenant_id, cmd.unit_id)?;
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let now = self.clock.now();
        let request = DeductionRequest {
            unit_id: cmd.unit_id,
            qty: -cmd.qty,
            external_item_id: cmd.external_item_id.clone(),
            external_cart_id: cmd.external_cart_id.clone(),
        };

        let applied = self.locks.with_lock(tenant_id, cmd.variant_id, || -> LedgerResult<_> {
            let ledger = self.load_variant(tenant_id, cmd.variant_id)?;
            let plan = plan_deduction(&ledger, &request, &conv, now)
                .map_err(|e| LedgerError::from_stock(cmd.variant_id, e))?;
            match plan {
                DeductionPlan::NoOpReplay => Ok(None),
                DeductionPlan::Apply { entries, released } => {
                    let released: Vec<Reservation> = ledger
                        .reservations()
                        .iter()
                        .filter(|r| released.contains(&r.id()))
                        .cloned()
                        .collect();
                    let mut changes = ChangeSet::new();
                    changes.insert_entries = entries.clone();
                    changes.delete_reservations = released.iter().map(|r| r.id()).collect();
                    self.store.commit(tenant_id, changes)?;
                    Ok(Some((entries, released)))
                }
            }
        })?;

        let Some((entries, released)) = applied else {
            info!("order line already deducted; replay is a no-op");
            return Ok(DeductionOutcome::NoOpReplay);
        };
        info!(
            entries = entries.len(),
            released = released.len(),
            "stock deducted"
        );

        let mut events = Vec::with_capacity(entries.len() + released.len() + 2);
        for entry in &entries {
            let label = self.unit_label(tenant_id, entry.unit_id());
            events.push(StockEvent::Audit(AuditRecord::balance_change(
                tenant_id,
                entry.variant_id(),
                entry.id(),
                entry.changes(),
                &label,
                entry.price(),
                now,
            )));
        }
        events.extend(self.removal_audits(tenant_id, &released, now));
        events.push(StockEvent::balance_changed(cmd.variant_id, now));
        if !released.is_empty() {
            events.push(StockEvent::reserve_changed(cmd.variant_id, now));
        }
        self.publish(tenant_id, events)?;
        Ok(DeductionOutcome::Deducted(entries))
    }

    /// Route a signed change: positive adds, negative deducts.
    pub fn record_change(&self, tenant_id: TenantId, cmd: RecordChange) -> LedgerResult<ChangeOutcome> {
        if cmd.qty > 0.0 {
            let zone_id = cmd.zone_id.ok_or_else(|| {
                LedgerError::Validation("a warehouse zone is required to add stock".to_string())
            })?;
            self.add_stock(
                tenant_id,
                AddStock {
                    variant_id: cmd.variant_id,
                    unit_id: cmd.unit_id,
                    zone_id,
                    qty: cmd.qty,
                    price: cmd.price,
                    external_item_id: cmd.external_item_id,
                    external_cart_id: cmd.external_cart_id,
                    origin_entry: cmd.origin_entry,
                },
            )
            .map(ChangeOutcome::Added)
        } else if cmd.qty < 0.0 {
            self.deduct_stock(
                tenant_id,
                DeductStock {
                    variant_id: cmd.variant_id,
                    unit_id: cmd.unit_id,
                    qty: cmd.qty,
                    external_item_id: cmd.external_item_id,
                    external_cart_id: cmd.external_cart_id,
                },
            )
            .map(ChangeOutcome::Deducted)
        } else {
            Err(LedgerError::Validation(format!(
                "stock change must be non-zero, got {}",
                cmd.qty
            )))
        }
    }

    /// Delete an entry and everything derived from it, in one commit.
    ///
    /// Holds placed on the deleted entries are removed and revisions that
    /// referenced them lose their origin. Returns the deleted entries.
    #[tracing::instrument(skip_all, fields(%tenant_id, %entry_id))]
    pub fn revert_entry(&self, tenant_id: TenantId, entry_id: EntryId) -> LedgerResult<Vec<LedgerEntry>> {
        let variant_id = self
            .store
            .entry(tenant_id, entry_id)?
            .ok_or(LedgerError::NotFound("ledger entry"))?
            .variant_id();
        let now = self.clock.now();

        let (removed, released) = self.locks.with_lock(tenant_id, variant_id, || -> LedgerResult<_> {
            let ledger = self.load_variant(tenant_id, variant_id)?;
            let plan = plan_revert(&ledger, entry_id)
                .map_err(|e| LedgerError::from_stock(variant_id, e))?;

            let mut changes = ChangeSet::new();
            changes.delete_entries = plan.entries.clone();
            changes.delete_reservations = plan.reservations.clone();
            for mut revision in self.store.revisions_for_variant(tenant_id, variant_id)? {
                if revision
                    .origin_entry()
                    .is_some_and(|o| plan.entries.contains(&o))
                {
                    revision.detach_origin();
                    changes.upsert_revisions.push(revision);
                }
            }
            self.store.commit(tenant_id, changes)?;

            let removed: Vec<LedgerEntry> = plan
                .entries
                .iter()
                .filter_map(|id| ledger.entry(*id).cloned())
                .collect();
            let released: Vec<Reservation> = ledger
                .reservations()
                .iter()
                .filter(|r| plan.reservations.contains(&r.id()))
                .cloned()
                .collect();
            Ok((removed, released))
        })?;

        info!(
            %variant_id,
            entries = removed.len(),
            released = released.len(),
            "ledger entry reverted"
        );
        let mut events = Vec::with_capacity(removed.len() + released.len() + 2);
        for entry in &removed {
            let label = self.unit_label(tenant_id, entry.unit_id());
            events.push(StockEvent::Audit(AuditRecord::entry_reverted(
                tenant_id,
                variant_id,
                entry.id(),
                entry.changes(),
                &label,
                now,
            )));
        }
        events.extend(self.removal_audits(tenant_id, &released, now));
        events.push(StockEvent::balance_changed(variant_id, now));
        if !released.is_empty() {
            events.push(StockEvent::reserve_changed(variant_id, now));
        }
        self.publish(tenant_id, events)?;
        Ok(removed)
    }

    fn graph(&self, tenant_id: TenantId) -> LedgerResult<Arc<ConversionGraph>> {
        Ok(self
            .conversions
            .get_or_build(tenant_id, || self.store.equivalences(tenant_id))?)
    }

    fn load_variant(&self, tenant_id: TenantId, variant_id: VariantId) -> LedgerResult<VariantLedger> {
        let entries = self.store.entries_for_variant(tenant_id, variant_id)?;
        let reservations = self.store.reservations_for_variant(tenant_id, variant_id)?;
        debug!(
            %variant_id,
            entries = entries.len(),
            reservations = reservations.len(),
            "loaded variant ledger"
        );
        Ok(VariantLedger::new(tenant_id, variant_id, entries, reservations))
    }

    fn require_variant(&self, tenant_id: TenantId, variant_id: VariantId) -> LedgerResult<VariantRecord> {
        self.catalog
            .variant(tenant_id, variant_id)
            .ok_or(LedgerError::NotFound("variant"))
    }

    fn require_unit(&self, tenant_id: TenantId, unit_id: UnitId) -> LedgerResult<Unit> {
        self.store
            .unit(tenant_id, unit_id)?
            .ok_or(LedgerError::NotFound("unit"))
    }

    fn require_entry_of(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
        variant_id: VariantId,
    ) -> LedgerResult<LedgerEntry> {
        let entry = self
            .store
            .entry(tenant_id, entry_id)?
            .ok_or(LedgerError::NotFound("ledger entry"))?;
        if entry.variant_id() != variant_id {
            return Err(LedgerError::Validation(format!(
                "entry {entry_id} belongs to another variant"
            )));
        }
        Ok(entry)
    }

    /// The variant's default unit, falling back to its product's.
    fn default_unit(&self, tenant_id: TenantId, variant: &VariantRecord) -> Option<UnitId> {
        variant.default_unit.or_else(|| {
            self.catalog
                .product(tenant_id, variant.product_id)
                .and_then(|p| p.default_unit)
        })
    }

    fn unit_label(&self, tenant_id: TenantId, unit_id: UnitId) -> String {
        match self.store.unit(tenant_id, unit_id) {
            Ok(Some(unit)) => unit.descriptor().to_string(),
            _ => unit_id.to_string(),
        }
    }

    fn removal_audits(
        &self,
        tenant_id: TenantId,
        released: &[Reservation],
        now: DateTime<Utc>,
    ) -> Vec<StockEvent> {
        released
            .iter()
            .map(|r| {
                let label = self.unit_label(tenant_id, r.unit_id());
                StockEvent::Audit(AuditRecord::reservation_removed(
                    tenant_id,
                    r.variant_id(),
                    r.id(),
                    r.changes(),
                    &label,
                    now,
                ))
            })
            .collect()
    }

    /// Publish every event; the first failure is reported after trying all.
    fn publish(&self, tenant_id: TenantId, events: Vec<StockEvent>) -> LedgerResult<()> {
        let mut first_error = None;
        for event in events {
            if let Err(err) = self.bus.publish(EventEnvelope::wrap(tenant_id, event)) {
                warn!(%tenant_id, error = ?err, "failed to publish stock notification");
                first_error.get_or_insert_with(|| LedgerError::Publish(format!("{err:?}")));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
