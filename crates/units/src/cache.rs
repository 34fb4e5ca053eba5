//! Per-tenant conversion graph cache with explicit invalidation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockledger_core::TenantId;

use crate::graph::{ConversionGraph, DEFAULT_MAX_CHAIN_DEPTH};
use crate::unit::UnitEquivalence;

#[derive(Debug, Default)]
struct TenantSlot {
    /// Bumped on every invalidation; a build started under an older generation
    /// is not stored.
    generation: u64,
    graph: Option<Arc<ConversionGraph>>,
}

/// Lazily built, tenant-scoped conversion graphs.
///
/// Owned by a service instance (never process-global). Writers of equivalence
/// rows must call [`ConversionCache::invalidate`] for the affected tenant.
#[derive(Debug)]
pub struct ConversionCache {
    max_depth: usize,
    slots: RwLock<HashMap<TenantId, TenantSlot>>,
}

impl Default for ConversionCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHAIN_DEPTH)
    }
}

impl ConversionCache {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Return the tenant's graph, building it from `load` on a miss.
    pub fn get_or_build<E>(
        &self,
        tenant_id: TenantId,
        load: impl FnOnce() -> Result<Vec<UnitEquivalence>, E>,
    ) -> Result<Arc<ConversionGraph>, E> {
        let generation = match self.read().get(&tenant_id) {
            Some(TenantSlot {
                graph: Some(graph), ..
            }) => return Ok(graph.clone()),
            Some(slot) => slot.generation,
            None => 0,
        };

        let equivalences = load()?;
        let graph = Arc::new(ConversionGraph::build(&equivalences, self.max_depth));
        for issue in graph.issues() {
            tracing::warn!(%tenant_id, error = %issue, "unit equivalence configuration problem");
        }
        tracing::debug!(%tenant_id, pairs = graph.len(), "built unit conversion graph");

        let mut slots = self.write();
        let slot = slots.entry(tenant_id).or_default();
        if slot.generation == generation {
            slot.graph = Some(graph.clone());
        }
        drop(slots);

        Ok(graph)
    }

    /// Drop the tenant's graph; the next lookup rebuilds it.
    pub fn invalidate(&self, tenant_id: TenantId) {
        let mut slots = self.write();
        let slot = slots.entry(tenant_id).or_default();
        slot.generation += 1;
        slot.graph = None;
    }

    pub fn is_cached(&self, tenant_id: TenantId) -> bool {
        self.read()
            .get(&tenant_id)
            .is_some_and(|s| s.graph.is_some())
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TenantId, TenantSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TenantId, TenantSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
