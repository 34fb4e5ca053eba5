use std::collections::HashMap;
use std::hash::Hash;

use stockledger_core::TenantId;

/// Tenant-isolated key/value table.
///
/// Every access names the tenant; a key stored under one tenant is invisible
/// to every other. Not synchronized: owners wrap a set of tables in one lock so
/// multi-table writes stay atomic.
#[derive(Debug, Clone)]
pub struct TenantMap<K, V> {
    inner: HashMap<(TenantId, K), V>,
}

impl<K, V> Default for TenantMap<K, V> {
    fn default() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }
}

impl<K, V> TenantMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: TenantId, key: &K) -> Option<&V> {
        self.inner.get(&(tenant_id, key.clone()))
    }

    pub fn contains(&self, tenant_id: TenantId, key: &K) -> bool {
        self.inner.contains_key(&(tenant_id, key.clone()))
    }

    pub fn upsert(&mut self, tenant_id: TenantId, key: K, value: V) {
        self.inner.insert((tenant_id, key), value);
    }

    pub fn remove(&mut self, tenant_id: TenantId, key: &K) -> Option<V> {
        self.inner.remove(&(tenant_id, key.clone()))
    }

    /// Values of one tenant (unordered).
    pub fn values(&self, tenant_id: TenantId) -> impl Iterator<Item = &V> {
        self.inner
            .iter()
            .filter(move |((t, _), _)| *t == tenant_id)
            .map(|(_, v)| v)
    }

    /// Values across every tenant, with their tenant.
    pub fn all(&self) -> impl Iterator<Item = (TenantId, &V)> {
        self.inner.iter().map(|((t, _), v)| (*t, v))
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.values(tenant_id).cloned().collect()
    }

    pub fn clear_tenant(&mut self, tenant_id: TenantId) {
        self.inner.retain(|(t, _k), _v| *t != tenant_id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
