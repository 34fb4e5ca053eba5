//! Per-variant mutual exclusion for read-allocate-commit sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use stockledger_core::{TenantId, VariantId};

/// One mutex per `(tenant, variant)`, created on first use.
///
/// Deductions, reservations and reverts of the same variant run one at a
/// time; different variants never contend.
#[derive(Debug, Default)]
pub struct VariantLocks {
    locks: Mutex<HashMap<(TenantId, VariantId), Arc<Mutex<()>>>>,
}

impl VariantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tenant_id: TenantId, variant_id: VariantId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry((tenant_id, variant_id)).or_default().clone()
    }

    /// Run `f` while holding the variant's lock.
    ///
    /// The guarded data is `()`, so a lock poisoned by a panicking holder is
    /// still safe to take.
    pub fn with_lock<T>(&self, tenant_id: TenantId, variant_id: VariantId, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(tenant_id, variant_id);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
