//! Units of measure and the equivalences between them.
//!
//! Every equivalence write drops the tenant's cached conversion graph.

use tracing::info;

use stockledger_core::{Clock, Entity, EquivalenceId, TenantId, UnitId};
use stockledger_events::EventBus;
use stockledger_units::{ConversionGraph, Converter, Unit, UnitEquivalence};

use super::{StockEnvelope, StockLedgerService};
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
    /// Create or update a unit. A per-item unit must name a known product.
    #[tracing::instrument(skip_all, fields(%tenant_id, unit_id = %unit.id()))]
    pub fn register_unit(&self, tenant_id: TenantId, unit: Unit) -> LedgerResult<Unit> {
        if unit.tenant_id() != tenant_id {
            return Err(LedgerError::NotFound("unit"));
        }
        if unit.title().trim().is_empty() {
            return Err(LedgerError::Validation("unit title must not be blank".to_string()));
        }
        if let Some(product_id) = unit.product_id() {
            self.catalog
                .product(tenant_id, product_id)
                .ok_or(LedgerError::NotFound("product"))?;
        }

        let mut changes = ChangeSet::new();
        changes.upsert_units.push(unit.clone());
        self.store.commit(tenant_id, changes)?;
        info!(title = unit.title(), "unit registered");
        Ok(unit)
    }

    pub fn units(&self, tenant_id: TenantId) -> LedgerResult<Vec<Unit>> {
        Ok(self.store.units(tenant_id)?)
    }

    /// Configure `1 sale = equal storage`.
    ///
    /// Rejected when the pair is degenerate or already configured, or when the
    /// new edge would leave the chain inconsistent, cyclic or too deep.
    #[tracing::instrument(skip_all, fields(%tenant_id, %sale_unit, %storage_unit, equal))]
    pub fn configure_equivalence(
        &self,
        tenant_id: TenantId,
        sale_unit: UnitId,
        storage_unit: UnitId,
        equal: f64,
    ) -> LedgerResult<UnitEquivalence> {
        self.require_unit(tenant_id, sale_unit)?;
        self.require_unit(tenant_id, storage_unit)?;
        let equivalence = UnitEquivalence::new(tenant_id, sale_unit, storage_unit, equal)?;

        let mut candidate = self.store.equivalences(tenant_id)?;
        if candidate
            .iter()
            .any(|eq| eq.pair_key() == equivalence.pair_key())
        {
            return Err(LedgerError::InvalidEquivalence(format!(
                "units {sale_unit} and {storage_unit} are already related"
            )));
        }
        candidate.push(equivalence.clone());
        ConversionGraph::build(&candidate, self.config.max_chain_depth)
            .multiplier(sale_unit, storage_unit)?;

        let mut changes = ChangeSet::new();
        changes.insert_equivalences.push(equivalence.clone());
        self.store.commit(tenant_id, changes)?;
        self.conversions.invalidate(tenant_id);
        info!(equivalence_id = %equivalence.id(), "unit equivalence configured");
        Ok(equivalence)
    }

    #[tracing::instrument(skip_all, fields(%tenant_id, %equivalence_id))]
    pub fn remove_equivalence(
        &self,
        tenant_id: TenantId,
        equivalence_id: EquivalenceId,
    ) -> LedgerResult<()> {
        let mut changes = ChangeSet::new();
        changes.delete_equivalences.push(equivalence_id);
        self.store.commit(tenant_id, changes)?;
        self.conversions.invalidate(tenant_id);
        info!("unit equivalence removed");
        Ok(())
    }

    /// Multiplier `m` with `qty_in_to = qty_in_from * m`, under the configured policy.
    pub fn multiplier(&self, tenant_id: TenantId, from: UnitId, to: UnitId) -> LedgerResult<f64> {
        let graph = self.graph(tenant_id)?;
        Ok(Converter::new(&graph, self.config.conversion_policy)
            .multiplier(from, to)?)
    }
}
