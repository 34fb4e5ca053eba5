//! Requests and results of the ledger service operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    EntryId, ProductId, ReservationId, RevisionId, UnitId, VariantId, WarehouseId,
    WarehouseZoneId,
};
use stockledger_ledger::{LedgerEntry, Revision, RevisionState};

/// Put stock into a warehouse zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddStock {
    pub variant_id: VariantId,
    pub unit_id: UnitId,
    pub zone_id: WarehouseZoneId,
    /// Positive.
    pub qty: f64,
    /// Minor currency units.
    pub price: i64,
    pub external_item_id: Option<String>,
    pub external_cart_id: Option<String>,
    /// Entry this addition was derived from (e.g. a move between zones).
    pub origin_entry: Option<EntryId>,
}

/// Take stock out, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductStock {
    pub variant_id: VariantId,
    pub unit_id: UnitId,
    /// Signed change; must be negative.
    pub qty: f64,
    /// Idempotency key of the external order line.
    pub external_item_id: Option<String>,
    /// Cart whose holds this deduction finalizes.
    pub external_cart_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeductionOutcome {
    Deducted(Vec<LedgerEntry>),
    /// The external order line was already deducted in full; nothing written.
    NoOpReplay,
}

/// A signed change routed to [`AddStock`] or [`DeductStock`] by its sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    pub variant_id: VariantId,
    pub unit_id: UnitId,
    /// Required for additions.
    pub zone_id: Option<WarehouseZoneId>,
    pub qty: f64,
    pub price: i64,
    pub external_item_id: Option<String>,
    pub external_cart_id: Option<String>,
    pub origin_entry: Option<EntryId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    Added(LedgerEntry),
    Deducted(DeductionOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub variant_id: VariantId,
    pub unit_id: UnitId,
    /// Positive.
    pub qty: f64,
    pub external_cart_id: Option<String>,
    /// Defaults to now plus the configured hold lifetime.
    pub expires_at: Option<DateTime<Utc>>,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseTarget {
    /// One hold; a hold with a cart id releases the cart's holds on its variant.
    Reservation(ReservationId),
    /// Every unexpired hold of the cart, optionally on one variant only.
    Cart {
        cart_id: String,
        variant_id: Option<VariantId>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released: usize,
    pub variants: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRevision {
    pub variant_id: VariantId,
    pub zone_id: WarehouseZoneId,
    pub planned_on: DateTime<Utc>,
    pub origin_entry: Option<EntryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishRevision {
    pub variant_id: VariantId,
    pub zone_id: WarehouseZoneId,
    pub qty: f64,
    pub unit_id: UnitId,
    pub origin_entry: Option<EntryId>,
    /// Finish this revision instead of recording a new one.
    pub revision_id: Option<RevisionId>,
}

/// Filter for [`zone_revisions`](super::StockLedgerService::zone_revisions).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionQuery {
    pub zone_id: Option<WarehouseZoneId>,
    /// Empty means every state.
    pub states: Vec<RevisionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum BalanceSubject {
    Variant(VariantId),
    Product(ProductId),
    Entry(EntryId),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: UnitId,
}

/// `balance` ignores holds; `reserve` is the sum of unexpired holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub balance: Quantity,
    pub reserve: Quantity,
}

impl BalanceReport {
    /// What is left for new deductions or holds.
    pub fn available(&self) -> f64 {
        self.balance.value - self.reserve.value
    }
}

/// One variant with stock recorded in a zone, and its counts there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneVariant {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    /// Cached on-stock quantity of the whole variant.
    pub on_stock: Option<f64>,
    /// Counts still open in this zone (planned or recalculating).
    pub open_revisions: Vec<Revision>,
    pub last_finished_revision: Option<Revision>,
}

/// A zone with the variants stocked in it and its nested zones.
///
/// Nested zones carry only their `variants_count`; their `variants` are empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStock {
    pub zone_id: WarehouseZoneId,
    pub warehouse_id: WarehouseId,
    pub parent_id: Option<WarehouseZoneId>,
    pub variants_count: usize,
    pub variants: Vec<ZoneVariant>,
    pub sub_zones: Vec<ZoneStock>,
}

/// Top-level zones of a warehouse, each as a [`ZoneStock`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseStock {
    pub warehouse_id: WarehouseId,
    pub zones: Vec<ZoneStock>,
}
