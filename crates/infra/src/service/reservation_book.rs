//! Holds on stock: reserve, release and the expiry sweep.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use stockledger_core::{Clock, Entity, ReservationId, TenantId, VariantId};
use stockledger_events::EventBus;
use stockledger_ledger::{
    default_expiry, plan_reservation, AuditRecord, HoldTerms, Reservation, StockEvent,
};
use stockledger_units::Converter;

use super::{ReleaseTarget, ReserveStock, StockEnvelope, StockLedgerService, SweepReport};
use crate::catalog::Catalog;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{ChangeSet, LedgerStore};

impl<S, C, B, K> StockLedgerService<S, C, B, K>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<StockEnvelope>,
    K: Clock,
{
    /// Hold `qty` for a cart, split oldest-first across open entries.
    #[tracing::instrument(skip_all, fields(%tenant_id, variant_id = %cmd.variant_id, qty = cmd.qty))]
    pub fn reserve_stock(
        &self,
        tenant_id: TenantId,
        cmd: ReserveStock,
    ) -> LedgerResult<Vec<Reservation>> {
        self.require_variant(tenant_id, cmd.variant_id)?;
        self.require_unit(tenant_id, cmd.unit_id)?;
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let now = self.clock.now();
        let expires_at = match cmd.expires_at {
            Some(at) => at,
            None => default_expiry(now, self.config.reservation_ttl_minutes)?,
        };
        let terms = HoldTerms {
            unit_id: cmd.unit_id,
            price: cmd.price,
            external_cart_id: cmd.external_cart_id.clone(),
            expires_at,
        };

        let holds = self.locks.with_lock(tenant_id, cmd.variant_id, || -> LedgerResult<_> {
            let ledger = self.load_variant(tenant_id, cmd.variant_id)?;
            let holds = plan_reservation(&ledger, cmd.qty, &terms, &conv, now)
                .map_err(|e| LedgerError::from_stock(cmd.variant_id, e))?;
            let mut changes = ChangeSet::new();
            changes.insert_reservations = holds.clone();
            self.store.commit(tenant_id, changes)?;
            Ok(holds)
        })?;

        info!(rows = holds.len(), expires_at = %terms.expires_at, "stock reserved");
        let label = self.unit_label(tenant_id, cmd.unit_id);
        let mut events: Vec<StockEvent> = holds
            .iter()
            .map(|h| {
                StockEvent::Audit(AuditRecord::reserved(
                    tenant_id,
                    cmd.variant_id,
                    h.id(),
                    h.changes(),
                    &label,
                    h.price(),
                    h.expires_at(),
                    now,
                ))
            })
            .collect();
        events.push(StockEvent::reserve_changed(cmd.variant_id, now));
        self.publish(tenant_id, events)?;
        Ok(holds)
    }

    /// Release one hold or a cart's holds. Returns the deleted holds.
    #[tracing::instrument(skip_all, fields(%tenant_id))]
    pub fn release_reservation(
        &self,
        tenant_id: TenantId,
        target: ReleaseTarget,
    ) -> LedgerResult<Vec<Reservation>> {
        let now = self.clock.now();
        let groups = match target {
            ReleaseTarget::Reservation(id) => {
                let hold = self
                    .store
                    .reservation(tenant_id, id)?
                    .ok_or(LedgerError::NotFound("reservation"))?;
                BTreeMap::from([(hold.variant_id(), self.release_scope(tenant_id, &hold, now)?)])
            }
            ReleaseTarget::Cart {
                cart_id,
                variant_id,
            } => {
                let mut groups: BTreeMap<VariantId, Vec<ReservationId>> = BTreeMap::new();
                for hold in self.store.cart_reservations(tenant_id, &cart_id, variant_id)? {
                    if hold.is_active(now) {
                        groups.entry(hold.variant_id()).or_default().push(hold.id());
                    }
                }
                groups
            }
        };

        let mut released = Vec::new();
        for (variant_id, ids) in groups {
            released.extend(self.delete_holds(tenant_id, variant_id, &ids, now)?);
        }
        info!(released = released.len(), "reservations released");
        Ok(released)
    }

    /// Release every hold that has expired, across all tenants, the same way
    /// [`ReleaseTarget::Reservation`] would: a cart hold takes the cart's live
    /// holds on that variant with it.
    ///
    /// A failing variant is logged and counted; the sweep carries on.
    #[tracing::instrument(skip_all)]
    pub fn sweep_expired(&self) -> LedgerResult<SweepReport> {
        let now = self.clock.now();
        let mut groups: BTreeMap<(TenantId, VariantId), Vec<ReservationId>> = BTreeMap::new();
        for hold in self.store.expired_reservations(now)? {
            let ids = groups
                .entry((hold.tenant_id(), hold.variant_id()))
                .or_default();
            for id in self.release_scope(hold.tenant_id(), &hold, now)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        let mut report = SweepReport::default();
        for ((tenant_id, variant_id), ids) in groups {
            match self.delete_holds(tenant_id, variant_id, &ids, now) {
                Ok(deleted) if deleted.is_empty() => {}
                Ok(deleted) => {
                    report.released += deleted.len();
                    report.variants += 1;
                }
                Err(err) => {
                    warn!(%tenant_id, %variant_id, error = %err, "failed to sweep expired reservations");
                    report.failures += 1;
                }
            }
        }
        if report.released > 0 {
            info!(
                released = report.released,
                variants = report.variants,
                "expired reservations swept"
            );
        }
        Ok(report)
    }

    /// Ids a release of `hold` covers: the hold itself plus, for a cart hold,
    /// the cart's active holds on the same variant.
    fn release_scope(
        &self,
        tenant_id: TenantId,
        hold: &Reservation,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<ReservationId>> {
        let mut ids = match hold.external_cart_id() {
            Some(cart) => active_ids(
                self.store
                    .cart_reservations(tenant_id, cart, Some(hold.variant_id()))?,
                now,
            ),
            None => Vec::new(),
        };
        if !ids.contains(&hold.id()) {
            ids.push(hold.id());
        }
        Ok(ids)
    }

    /// Delete the listed holds of one variant that still exist,
    /// then notify once for the variant.
    fn delete_holds(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        ids: &[ReservationId],
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<Reservation>> {
        let deleted = self.locks.with_lock(tenant_id, variant_id, || -> LedgerResult<_> {
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(hold) = self.store.reservation(tenant_id, *id)? {
                    rows.push(hold);
                }
            }
            if rows.is_empty() {
                return Ok(rows);
            }
            let mut changes = ChangeSet::new();
            changes.delete_reservations = rows.iter().map(|r| r.id()).collect();
            self.store.commit(tenant_id, changes)?;
            Ok(rows)
        })?;

        if !deleted.is_empty() {
            let mut events = self.removal_audits(tenant_id, &deleted, now);
            events.push(StockEvent::reserve_changed(variant_id, now));
            self.publish(tenant_id, events)?;
        }
        Ok(deleted)
    }
}

fn active_ids(holds: Vec<Reservation>, now: DateTime<Utc>) -> Vec<ReservationId> {
    holds
        .into_iter()
        .filter(|h| h.is_active(now))
        .map(|h| h.id())
        .collect()
}
