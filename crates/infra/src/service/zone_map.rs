//! Stock map of a warehouse: zones, the variants stocked in them and the
//! state of their counts.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use stockledger_core::{Clock, TenantId, VariantId, WarehouseId, WarehouseZoneId};
use stockledger_events::EventBus;
use stockledger_ledger::{Revision, RevisionState};

use super::{StockEnvelope, StockLedgerService, WarehouseStock, ZoneStock, ZoneVariant};
use crate::catalog::{Catalog, ZoneRecord};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

const OPEN_STATES: [RevisionState; 2] = [RevisionState::Planned, RevisionState::Recalculating];

impl<S, C, B, K> StockLedgerService<S, C, B, K>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<StockEnvelope>,
    K: Clock,
{
    /// Revisions of every variant in the zone that are in one of `states`
    /// (all states when empty), oldest first.
    pub fn zone_revisions_by_state(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
        states: &[RevisionState],
    ) -> LedgerResult<Vec<Revision>> {
        self.require_zone(tenant_id, zone_id)?;
        Ok(self
            .store
            .revisions_in_zone(tenant_id, zone_id)?
            .into_iter()
            .filter(|r| states.is_empty() || states.contains(&r.state()))
            .collect())
    }

    /// The zone, the variants stocked in it with their open and last finished
    /// counts, and its nested zones.
    pub fn zone_stock_map(
        &self,
        tenant_id: TenantId,
        zone_id: WarehouseZoneId,
    ) -> LedgerResult<ZoneStock> {
        let zone = self.require_zone(tenant_id, zone_id)?;
        let zones = self.catalog.warehouse_zones(tenant_id, zone.warehouse_id);
        let mut seen = BTreeSet::new();
        self.build_zone(tenant_id, zone, &zones, true, &mut seen)
    }

    /// Every top-level zone of the warehouse as a [`ZoneStock`].
    pub fn warehouse_stock_map(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<WarehouseStock> {
        let zones = self.catalog.warehouse_zones(tenant_id, warehouse_id);
        let mut seen = BTreeSet::new();
        let mut top = Vec::new();
        for zone in zones.iter().filter(|z| z.parent_id.is_none()) {
            top.push(self.build_zone(tenant_id, *zone, &zones, true, &mut seen)?);
        }
        debug!(%tenant_id, %warehouse_id, zones = top.len(), "warehouse stock map built");
        Ok(WarehouseStock {
            warehouse_id,
            zones: top,
        })
    }

    fn build_zone(
        &self,
        tenant_id: TenantId,
        zone: ZoneRecord,
        zones: &[ZoneRecord],
        with_variants: bool,
        seen: &mut BTreeSet<WarehouseZoneId>,
    ) -> LedgerResult<ZoneStock> {
        // Guards against a parent cycle in catalog data.
        seen.insert(zone.zone_id);

        let stocked: BTreeSet<VariantId> = self
            .store
            .entries_in_zone(tenant_id, zone.zone_id)?
            .iter()
            .map(|e| e.variant_id())
            .collect();

        let mut variants = Vec::new();
        if with_variants {
            let mut by_variant: BTreeMap<VariantId, Vec<Revision>> = BTreeMap::new();
            for revision in self.store.revisions_in_zone(tenant_id, zone.zone_id)? {
                by_variant.entry(revision.variant_id()).or_default().push(revision);
            }
            for variant_id in &stocked {
                let Some(record) = self.catalog.variant(tenant_id, *variant_id) else {
                    continue;
                };
                let revisions = by_variant.remove(variant_id).unwrap_or_default();
                let last_finished_revision = revisions
                    .iter()
                    .filter(|r| r.state() == RevisionState::Finished)
                    .max_by_key(|r| (r.recalculated_at(), r.created_at()))
                    .cloned();
                let open_revisions = revisions
                    .into_iter()
                    .filter(|r| OPEN_STATES.contains(&r.state()))
                    .collect();
                variants.push(ZoneVariant {
                    variant_id: *variant_id,
                    product_id: record.product_id,
                    on_stock: record.on_stock,
                    open_revisions,
                    last_finished_revision,
                });
            }
        }

        let mut sub_zones = Vec::new();
        for child in zones.iter().filter(|z| z.parent_id == Some(zone.zone_id)) {
            if seen.contains(&child.zone_id) {
                continue;
            }
            sub_zones.push(self.build_zone(tenant_id, *child, zones, false, seen)?);
        }

        Ok(ZoneStock {
            zone_id: zone.zone_id,
            warehouse_id: zone.warehouse_id,
            parent_id: zone.parent_id,
            variants_count: stocked.len(),
            variants,
            sub_zones,
        })
    }

    fn require_zone(&self, tenant_id: TenantId, zone_id: WarehouseZoneId) -> LedgerResult<ZoneRecord> {
        self.catalog
            .zone(tenant_id, zone_id)
            .ok_or(LedgerError::NotFound("warehouse zone"))
    }
}
