//! Catalog collaborator: the ledger's read-only view of products, variants and
//! warehouse zones, plus the cached balance fields it keeps up to date.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, TenantId, UnitId, VariantId, WarehouseId, WarehouseZoneId};

use crate::store::{StoreError, TenantMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub default_unit: Option<UnitId>,
    /// Cached balance (reservations ignored), in the default unit.
    pub on_stock: Option<f64>,
    /// Cached reserve, in the default unit.
    pub reserved: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub default_unit: Option<UnitId>,
    pub variants: Vec<VariantId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub zone_id: WarehouseZoneId,
    pub warehouse_id: WarehouseId,
    /// Enclosing zone; `None` for a top-level zone of the warehouse.
    pub parent_id: Option<WarehouseZoneId>,
}

pub trait Catalog: Send + Sync {
    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<VariantRecord>;

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord>;

    fn zone(&self, tenant_id: TenantId, id: WarehouseZoneId) -> Option<ZoneRecord>;

    /// Every zone of the warehouse, nested ones included.
    fn warehouse_zones(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<ZoneRecord>;

    /// Overwrite the variant's cached `on_stock` / `reserved` fields.
    fn set_cached_balance(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        on_stock: f64,
        reserved: f64,
    ) -> Result<(), StoreError>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<VariantRecord> {
        (**self).variant(tenant_id, id)
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        (**self).product(tenant_id, id)
    }

    fn zone(&self, tenant_id: TenantId, id: WarehouseZoneId) -> Option<ZoneRecord> {
        (**self).zone(tenant_id, id)
    }

    fn warehouse_zones(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<ZoneRecord> {
        (**self).warehouse_zones(tenant_id, warehouse_id)
    }

    fn set_cached_balance(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        on_stock: f64,
        reserved: f64,
    ) -> Result<(), StoreError> {
        (**self).set_cached_balance(tenant_id, variant_id, on_stock, reserved)
    }
}

#[derive(Debug, Default)]
struct CatalogTables {
    products: TenantMap<ProductId, ProductRecord>,
    variants: TenantMap<VariantId, VariantRecord>,
    zones: TenantMap<WarehouseZoneId, ZoneRecord>,
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: RwLock<CatalogTables>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, tenant_id: TenantId, default_unit: Option<UnitId>) -> ProductId {
        let product_id = ProductId::new();
        if let Ok(mut t) = self.tables.write() {
            t.products.upsert(
                tenant_id,
                product_id,
                ProductRecord {
                    product_id,
                    default_unit,
                    variants: Vec::new(),
                },
            );
        }
        product_id
    }

    /// Register a variant under `product_id`; `None` if the product is unknown
    /// for this tenant.
    pub fn add_variant(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        default_unit: Option<UnitId>,
    ) -> Option<VariantId> {
        let mut t = self.tables.write().ok()?;
        let mut product = t.products.get(tenant_id, &product_id)?.clone();
        let variant_id = VariantId::new();
        product.variants.push(variant_id);
        t.products.upsert(tenant_id, product_id, product);
        t.variants.upsert(
            tenant_id,
            variant_id,
            VariantRecord {
                variant_id,
                product_id,
                default_unit,
                on_stock: None,
                reserved: None,
            },
        );
        Some(variant_id)
    }

    pub fn add_zone(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> WarehouseZoneId {
        let zone_id = WarehouseZoneId::new();
        if let Ok(mut t) = self.tables.write() {
            t.zones.upsert(
                tenant_id,
                zone_id,
                ZoneRecord {
                    zone_id,
                    warehouse_id,
                    parent_id: None,
                },
            );
        }
        zone_id
    }

    /// Register a zone nested in `parent_id`, in the parent's warehouse; `None`
    /// if the parent is unknown for this tenant.
    pub fn add_sub_zone(
        &self,
        tenant_id: TenantId,
        parent_id: WarehouseZoneId,
    ) -> Option<WarehouseZoneId> {
        let mut t = self.tables.write().ok()?;
        let parent = *t.zones.get(tenant_id, &parent_id)?;
        let zone_id = WarehouseZoneId::new();
        t.zones.upsert(
            tenant_id,
            zone_id,
            ZoneRecord {
                zone_id,
                warehouse_id: parent.warehouse_id,
                parent_id: Some(parent_id),
            },
        );
        Some(zone_id)
    }
}

impl Catalog for InMemoryCatalog {
    fn variant(&self, tenant_id: TenantId, id: VariantId) -> Option<VariantRecord> {
        self.tables.read().ok()?.variants.get(tenant_id, &id).cloned()
    }

    fn product(&self, tenant_id: TenantId, id: ProductId) -> Option<ProductRecord> {
        self.tables.read().ok()?.products.get(tenant_id, &id).cloned()
    }

    fn zone(&self, tenant_id: TenantId, id: WarehouseZoneId) -> Option<ZoneRecord> {
        self.tables.read().ok()?.zones.get(tenant_id, &id).copied()
    }

    fn warehouse_zones(&self, tenant_id: TenantId, warehouse_id: WarehouseId) -> Vec<ZoneRecord> {
        let Ok(t) = self.tables.read() else {
            return Vec::new();
        };
        let mut zones: Vec<ZoneRecord> = t
            .zones
            .values(tenant_id)
            .filter(|z| z.warehouse_id == warehouse_id)
            .copied()
            .collect();
        zones.sort_by_key(|z| z.zone_id);
        zones
    }

    fn set_cached_balance(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        on_stock: f64,
        reserved: f64,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let mut record = t
            .variants
            .get(tenant_id, &variant_id)
            .cloned()
            .ok_or(StoreError::Missing("variant"))?;
        record.on_stock = Some(on_stock);
        record.reserved = Some(reserved);
        t.variants.upsert(tenant_id, variant_id, record);
        Ok(())
    }
}
