//! In-memory view of one variant's ledger, used for every balance decision.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use stockledger_core::{DomainError, Entity, EntryId, TenantId, UnitId, VariantId};
use stockledger_units::{ConversionError, Converter};

use crate::entry::LedgerEntry;
use crate::error::StockResult;
use crate::reservation::Reservation;

/// Whether unexpired holds lower a balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReservationMode {
    /// Gross on-hand balance.
    Ignore,
    /// Balance available for new deductions or holds.
    Subtract,
}

/// All entries and holds of one `(tenant, variant)`.
///
/// Loaded from the store inside the variant lock; pending entries are pushed
/// onto it while a multi-step operation is being planned so later steps see
/// earlier ones.
#[derive(Debug, Clone)]
pub struct VariantLedger {
    tenant_id: TenantId,
    variant_id: VariantId,
    entries: Vec<LedgerEntry>,
    by_id: HashMap<EntryId, usize>,
    children: HashMap<EntryId, Vec<usize>>,
    reservations: Vec<Reservation>,
}

impl VariantLedger {
    pub fn new(
        tenant_id: TenantId,
        variant_id: VariantId,
        entries: Vec<LedgerEntry>,
        reservations: Vec<Reservation>,
    ) -> Self {
        let mut ledger = Self {
            tenant_id,
            variant_id,
            entries: Vec::with_capacity(entries.len()),
            by_id: HashMap::new(),
            children: HashMap::new(),
            reservations: Vec::new(),
        };
        for entry in entries {
            ledger.push_entry(entry);
        }
        ledger.reservations = reservations
            .into_iter()
            .filter(|r| r.tenant_id() == tenant_id && r.variant_id() == variant_id)
            .collect();
        ledger
    }

    /// Add an entry to the view; entries of other tenants or variants are ignored.
    pub fn push_entry(&mut self, entry: LedgerEntry) {
        if entry.tenant_id() != self.tenant_id || entry.variant_id() != self.variant_id {
            return;
        }
        let idx = self.entries.len();
        self.by_id.insert(entry.id(), idx);
        if let Some(parent) = entry.origin_entry() {
            self.children.entry(parent).or_default().push(idx);
        }
        self.entries.push(entry);
    }

    /// Forget every hold of `cart` (used before re-allocating a cart's stock).
    pub fn drop_cart(&mut self, cart: &str) {
        self.reservations.retain(|r| !r.belongs_to_cart(cart));
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    pub fn entry(&self, id: EntryId) -> Option<&LedgerEntry> {
        self.by_id.get(&id).map(|&idx| &self.entries[idx])
    }

    pub fn children(&self, id: EntryId) -> impl Iterator<Item = &LedgerEntry> {
        self.children
            .get(&id)
            .into_iter()
            .flatten()
            .map(|&idx| &self.entries[idx])
    }

    pub fn active_reservations(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(move |r| r.is_active(now))
    }

    /// Sum of all signed changes, optionally net of unexpired holds.
    pub fn balance(
        &self,
        unit: UnitId,
        conv: &Converter<'_>,
        mode: ReservationMode,
        now: DateTime<Utc>,
    ) -> Result<f64, ConversionError> {
        let mut total = 0.0;
        for entry in &self.entries {
            total += conv.convert(entry.changes(), entry.unit_id(), unit)?;
        }
        if mode == ReservationMode::Subtract {
            total -= self.reserved(unit, conv, now)?;
        }
        Ok(total)
    }

    /// Sum of unexpired holds.
    pub fn reserved(
        &self,
        unit: UnitId,
        conv: &Converter<'_>,
        now: DateTime<Utc>,
    ) -> Result<f64, ConversionError> {
        let mut total = 0.0;
        for r in self.active_reservations(now) {
            total += conv.convert(r.changes(), r.unit_id(), unit)?;
        }
        Ok(total)
    }

    /// Remaining balance of one entry: itself plus the deductions taken from it,
    /// optionally net of the holds placed on it.
    pub fn entry_balance(
        &self,
        id: EntryId,
        unit: UnitId,
        conv: &Converter<'_>,
        mode: ReservationMode,
        now: DateTime<Utc>,
    ) -> StockResult<f64> {
        let entry = self
            .entry(id)
            .ok_or_else(|| DomainError::not_found("ledger entry"))?;
        let mut total = conv.convert(entry.changes(), entry.unit_id(), unit)?;
        for child in self.children(id).filter(|c| !c.is_addition()) {
            total += conv.convert(child.changes(), child.unit_id(), unit)?;
        }
        if mode == ReservationMode::Subtract {
            for r in self.active_reservations(now).filter(|r| r.origin_entry() == id) {
                total -= conv.convert(r.changes(), r.unit_id(), unit)?;
            }
        }
        Ok(total)
    }

    /// Creation time of the entry at the root of `entry`'s origin chain.
    ///
    /// The walk is bounded by the number of entries, so a corrupt cyclic chain
    /// terminates.
    pub fn provenance_time(&self, entry: &LedgerEntry) -> DateTime<Utc> {
        let mut current = entry;
        for _ in 0..self.entries.len() {
            match current.origin_entry().and_then(|id| self.entry(id)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current.created_at()
    }

    /// Total already deducted for an external order line, in `unit`.
    pub fn deducted_for_item(
        &self,
        external_item_id: &str,
        unit: UnitId,
        conv: &Converter<'_>,
    ) -> Result<f64, ConversionError> {
        let mut total = 0.0;
        for entry in self
            .entries
            .iter()
            .filter(|e| !e.is_addition() && e.external_item_id() == Some(external_item_id))
        {
            total += conv.convert(-entry.changes(), entry.unit_id(), unit)?;
        }
        Ok(total)
    }

    /// `id` and every entry transitively derived from it, parents first.
    pub fn descendants(&self, id: EntryId) -> StockResult<Vec<EntryId>> {
        if self.entry(id).is_none() {
            return Err(DomainError::not_found("ledger entry").into());
        }
        let mut seen = HashSet::from([id]);
        let mut out = vec![id];
        let mut cursor = 0;
        while cursor < out.len() {
            let parent = out[cursor];
            cursor += 1;
            for child in self.children(parent) {
                if seen.insert(child.id()) {
                    out.push(child.id());
                }
            }
        }
        Ok(out)
    }
}
