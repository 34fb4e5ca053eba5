use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, EntryId, TenantId, UnitId, VariantId, WarehouseId,
    WarehouseZoneId,
};

/// Tolerance for comparing quantities that went through unit conversion.
pub const QTY_EPSILON: f64 = 1e-9;

/// Where a quantity physically sits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub warehouse_id: WarehouseId,
    pub zone_id: WarehouseZoneId,
}

/// One immutable, signed stock change of a variant.
///
/// Positive `changes` add stock; negative `changes` deduct it and always point
/// at the entry they were allocated from via `origin_entry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: EntryId,
    tenant_id: TenantId,
    variant_id: VariantId,
    unit_id: UnitId,
    location: Location,
    changes: f64,
    /// Minor currency units.
    price: i64,
    origin_entry: Option<EntryId>,
    external_item_id: Option<String>,
    external_cart_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A new stock addition (positive change).
    pub fn addition(
        tenant_id: TenantId,
        variant_id: VariantId,
        unit_id: UnitId,
        location: Location,
        qty: f64,
        price: i64,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !qty.is_finite() || qty <= 0.0 {
            return Err(DomainError::validation(format!(
                "added quantity must be positive, got {qty}"
            )));
        }
        Ok(Self {
            id: EntryId::new(),
            tenant_id,
            variant_id,
            unit_id,
            location,
            changes: qty,
            price,
            origin_entry: None,
            external_item_id: None,
            external_cart_id: None,
            created_at,
        })
    }

    /// A deduction of `qty` (in `unit_id`) split off `origin`.
    ///
    /// Warehouse, zone and price are inherited from the origin entry.
    pub fn deduction_from(
        origin: &LedgerEntry,
        unit_id: UnitId,
        qty: f64,
        external_item_id: Option<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !qty.is_finite() || qty <= 0.0 {
            return Err(DomainError::validation(format!(
                "deducted quantity must be positive, got {qty}"
            )));
        }
        Ok(Self {
            id: EntryId::new(),
            tenant_id: origin.tenant_id,
            variant_id: origin.variant_id,
            unit_id,
            location: origin.location,
            changes: -qty,
            price: origin.price,
            origin_entry: Some(origin.id),
            external_item_id,
            external_cart_id: None,
            created_at,
        })
    }

    pub fn with_origin(mut self, origin: Option<EntryId>) -> Self {
        self.origin_entry = origin;
        self
    }

    pub fn with_external_item(mut self, external_item_id: Option<String>) -> Self {
        self.external_item_id = external_item_id;
        self
    }

    pub fn with_external_cart(mut self, external_cart_id: Option<String>) -> Self {
        self.external_cart_id = external_cart_id;
        self
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn changes(&self) -> f64 {
        self.changes
    }

    pub fn is_addition(&self) -> bool {
        self.changes > 0.0
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn origin_entry(&self) -> Option<EntryId> {
        self.origin_entry
    }

    pub fn external_item_id(&self) -> Option<&str> {
        self.external_item_id.as_deref()
    }

    pub fn external_cart_id(&self) -> Option<&str> {
        self.external_cart_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for LedgerEntry {
    type Id = EntryId;

    fn id(&self) -> EntryId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
