//! Physical counts per (variant, zone).

use tracing::info;

use stockledger_core::{Clock, Entity, EntryId, RevisionId, TenantId, VariantId, WarehouseZoneId};
use stockledger_events::EventBus;
use stockledger_ledger::{
    AuditRecord, CountResult, CountSnapshot, Revision, RevisionState, StockEvent,
};

use super::{FinishRevision, PlanRevision, RevisionQuery, StockEnvelope, StockLedgerService};
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
    /// Schedule a count, reusing the first still-planned one for the zone.
    #[tracing::instrument(skip_all, fields(%tenant_id, variant_id = %cmd.variant_id, zone_id = %cmd.zone_id))]
    pub fn plan_revision(&self, tenant_id: TenantId, cmd: PlanRevision) -> LedgerResult<Revision> {
        self.require_revision_scope(tenant_id, cmd.variant_id, cmd.zone_id, cmd.origin_entry)?;
        let now = self.clock.now();

        let existing = self
            .zone_revisions(
                tenant_id,
                cmd.variant_id,
                RevisionQuery {
                    zone_id: Some(cmd.zone_id),
                    states: vec![RevisionState::Planned],
                },
            )?
            .into_iter()
            .next();
        let revision = match existing {
            Some(mut revision) => {
                revision.reschedule(cmd.planned_on)?;
                keep_or_replace_origin(revision, cmd.origin_entry)
            }
            None => Revision::planned(tenant_id, cmd.variant_id, cmd.zone_id, cmd.planned_on, now)
                .with_origin(cmd.origin_entry),
        };

        self.store
            .commit(tenant_id, ChangeSet::new().upsert_revision(revision.clone()))?;
        info!(revision_id = %revision.id(), planned_on = %cmd.planned_on, "revision planned");
        Ok(revision)
    }

    /// Record a count, snapshotting the cached on-stock quantity and default unit.
    #[tracing::instrument(skip_all, fields(%tenant_id, variant_id = %cmd.variant_id, zone_id = %cmd.zone_id))]
    pub fn finish_revision(&self, tenant_id: TenantId, cmd: FinishRevision) -> LedgerResult<Revision> {
        let variant =
            self.require_revision_scope(tenant_id, cmd.variant_id, cmd.zone_id, cmd.origin_entry)?;
        self.require_unit(tenant_id, cmd.unit_id)?;
        let now = self.clock.now();

        let revision = match cmd.revision_id {
            Some(id) => {
                let revision = self
                    .store
                    .revision(tenant_id, id)?
                    .ok_or(LedgerError::NotFound("revision"))?;
                if revision.variant_id() != cmd.variant_id || revision.zone_id() != cmd.zone_id {
                    return Err(LedgerError::NotFound("revision"));
                }
                revision
            }
            None => Revision::unplanned(tenant_id, cmd.variant_id, cmd.zone_id, now),
        };
        let mut revision = keep_or_replace_origin(revision, cmd.origin_entry);
        revision.finish(
            CountResult {
                qty: cmd.qty,
                unit_id: cmd.unit_id,
            },
            CountSnapshot {
                current_qty: variant.on_stock,
                default_unit: self.default_unit(tenant_id, &variant),
            },
            now,
        )?;

        self.store
            .commit(tenant_id, ChangeSet::new().upsert_revision(revision.clone()))?;
        info!(revision_id = %revision.id(), qty = cmd.qty, "revision finished");
        Ok(revision)
    }

    #[tracing::instrument(skip_all, fields(%tenant_id, %revision_id))]
    pub fn delete_revision(&self, tenant_id: TenantId, revision_id: RevisionId) -> LedgerResult<()> {
        let revision = self
            .store
            .revision(tenant_id, revision_id)?
            .ok_or(LedgerError::NotFound("revision"))?;
        let mut changes = ChangeSet::new();
        changes.delete_revisions.push(revision_id);
        self.store.commit(tenant_id, changes)?;

        info!("revision deleted");
        let now = self.clock.now();
        self.publish(
            tenant_id,
            vec![StockEvent::Audit(AuditRecord::revision_removed(
                tenant_id,
                revision.variant_id(),
                revision_id,
                now,
            ))],
        )
    }

    /// Most recently finished count of the variant in the zone.
    pub fn last_finished_revision(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        zone_id: WarehouseZoneId,
    ) -> LedgerResult<Option<Revision>> {
        Ok(self
            .store
            .revisions_for_variant(tenant_id, variant_id)?
            .into_iter()
            .filter(|r| r.zone_id() == zone_id && r.state() == RevisionState::Finished)
            .max_by_key(|r| (r.recalculated_at(), r.created_at())))
    }

    /// Revisions of a variant ordered by planned date (unplanned last).
    pub fn zone_revisions(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        query: RevisionQuery,
    ) -> LedgerResult<Vec<Revision>> {
        let mut revisions: Vec<Revision> = self
            .store
            .revisions_for_variant(tenant_id, variant_id)?
            .into_iter()
            .filter(|r| query.zone_id.is_none_or(|z| r.zone_id() == z))
            .filter(|r| query.states.is_empty() || query.states.contains(&r.state()))
            .collect();
        revisions.sort_by(|a, b| match (a.planned_on(), b.planned_on()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.created_at().cmp(&b.created_at()),
        });
        Ok(revisions)
    }

    fn require_revision_scope(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        zone_id: WarehouseZoneId,
        origin_entry: Option<EntryId>,
    ) -> LedgerResult<crate::catalog::VariantRecord> {
        let variant = self.require_variant(tenant_id, variant_id)?;
        self.catalog
            .zone(tenant_id, zone_id)
            .ok_or(LedgerError::NotFound("warehouse zone"))?;
        if let Some(origin) = origin_entry {
            self.require_entry_of(tenant_id, origin, variant_id)?;
        }
        Ok(variant)
    }
}

/// A reused revision keeps its origin unless the caller names a new one.
fn keep_or_replace_origin(revision: Revision, origin_entry: Option<EntryId>) -> Revision {
    match origin_entry {
        Some(_) => revision.with_origin(origin_entry),
        None => revision,
    }
}
