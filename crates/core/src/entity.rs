//! Entity trait: identity + tenant ownership.

use crate::id::TenantId;

/// Tenant-owned record with a stable identity.
///
/// Every ledger row belongs to exactly one tenant; stores use `tenant_id` to
/// refuse cross-tenant reads and writes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// Returns the owning tenant.
    fn tenant_id(&self) -> TenantId;
}
