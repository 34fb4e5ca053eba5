//! FIFO allocation of requested quantities over a variant's open entries.
//!
//! Decisions only: the planners return the rows to write and never touch a
//! store. Callers run them under the variant lock and commit the result in one
//! change set.

use chrono::{DateTime, Utc};

use stockledger_core::{DomainError, Entity, EntryId, ReservationId, UnitId};
use stockledger_units::Converter;

use crate::entry::{LedgerEntry, QTY_EPSILON};
use crate::error::{StockError, StockResult};
use crate::reservation::{HoldTerms, Reservation};
use crate::variant::{ReservationMode, VariantLedger};

/// An entry with stock left to give, and how much (in the requested unit).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Candidate {
    pub entry_id: EntryId,
    pub available: f64,
}

/// Result of a FIFO search.
#[derive(Debug, Clone, PartialEq)]
pub enum Allocatable {
    /// Oldest-first prefix of open entries that covers the request.
    Sufficient(Vec<Candidate>),
    /// Everything open together is not enough.
    Insufficient { available: f64 },
}

impl VariantLedger {
    /// Oldest-first open entries whose available balances cover `required`.
    ///
    /// Age is the creation time of the entry's ultimate origin, ties broken by
    /// entry id. Holds are subtracted from every entry's balance.
    pub fn find_allocatable(
        &self,
        unit: UnitId,
        required: f64,
        conv: &Converter<'_>,
        now: DateTime<Utc>,
    ) -> StockResult<Allocatable> {
        let mut open = Vec::new();
        for entry in self.entries().iter().filter(|e| e.is_addition()) {
            let available =
                self.entry_balance(entry.id(), unit, conv, ReservationMode::Subtract, now)?;
            if available > QTY_EPSILON {
                open.push((self.provenance_time(entry), entry.id(), available));
            }
        }
        open.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut picked = Vec::new();
        let mut covered = 0.0;
        for (_, entry_id, available) in open {
            if covered + QTY_EPSILON >= required {
                break;
            }
            covered += available;
            picked.push(Candidate { entry_id, available });
        }

        if covered + QTY_EPSILON >= required {
            Ok(Allocatable::Sufficient(picked))
        } else {
            Ok(Allocatable::Insufficient { available: covered })
        }
    }
}

/// Split `qty` over candidates, taking as much as possible from each in order.
pub fn split(candidates: &[Candidate], qty: f64) -> Vec<(EntryId, f64)> {
    let mut remaining = qty;
    let mut parts = Vec::new();
    for c in candidates {
        if remaining <= QTY_EPSILON {
            break;
        }
        let take = remaining.min(c.available);
        parts.push((c.entry_id, take));
        remaining -= take;
    }
    parts
}

/// A request to take stock out of a variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DeductionRequest {
    pub unit_id: UnitId,
    /// Magnitude, always positive.
    pub qty: f64,
    pub external_item_id: Option<String>,
    pub external_cart_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeductionPlan {
    /// The external order line was already deducted in full.
    NoOpReplay,
    Apply {
        entries: Vec<LedgerEntry>,
        /// Holds of the cart that this deduction consumes.
        released: Vec<ReservationId>,
    },
}

/// Plan a deduction: idempotency check, cart holds first, then FIFO.
///
/// Deductions already recorded for the same external item reduce what is
/// still needed. A cart's unexpired holds are converted into deductions
/// against the entries they were placed on; whatever is left is allocated
/// oldest-first from stock nobody else holds.
pub fn plan_deduction(
    ledger: &VariantLedger,
    request: &DeductionRequest,
    conv: &Converter<'_>,
    now: DateTime<Utc>,
) -> StockResult<DeductionPlan> {
    if !request.qty.is_finite() || request.qty <= 0.0 {
        return Err(DomainError::validation(format!(
            "deducted quantity must be positive, got {}",
            request.qty
        ))
        .into());
    }

    let already = match request.external_item_id.as_deref() {
        Some(item) => ledger.deducted_for_item(item, request.unit_id, conv)?,
        None => 0.0,
    };
    if already + QTY_EPSILON >= request.qty {
        return Ok(DeductionPlan::NoOpReplay);
    }
    let mut need = request.qty - already;

    let mut working = ledger.clone();
    let mut entries = Vec::new();
    let mut released = Vec::new();

    if let Some(cart) = request.external_cart_id.as_deref() {
        let mut holds: Vec<&Reservation> = ledger
            .reservations()
            .iter()
            .filter(|r| r.belongs_to_cart(cart))
            .collect();
        holds.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then(a.id().cmp(&b.id())));

        for hold in holds {
            released.push(hold.id());
            if !hold.is_active(now) || need <= QTY_EPSILON {
                continue;
            }
            let Some(origin) = ledger.entry(hold.origin_entry()) else {
                continue;
            };
            let held = conv.convert(hold.changes(), hold.unit_id(), request.unit_id)?;
            let take = need.min(held);
            if take <= QTY_EPSILON {
                continue;
            }
            let entry = LedgerEntry::deduction_from(
                origin,
                request.unit_id,
                take,
                request.external_item_id.clone(),
                now,
            )?;
            working.push_entry(entry.clone());
            entries.push(entry);
            need -= take;
        }
        working.drop_cart(cart);
    }

    if need > QTY_EPSILON {
        let covered_by_cart = request.qty - already - need;
        match working.find_allocatable(request.unit_id, need, conv, now)? {
            Allocatable::Insufficient { available } => {
                return Err(StockError::InsufficientStock {
                    requested: request.qty - already,
                    available: covered_by_cart + available,
                });
            }
            Allocatable::Sufficient(candidates) => {
                for (entry_id, take) in split(&candidates, need) {
                    let origin = working
                        .entry(entry_id)
                        .ok_or_else(|| DomainError::invariant("allocated entry vanished"))?;
                    entries.push(LedgerEntry::deduction_from(
                        origin,
                        request.unit_id,
                        take,
                        request.external_item_id.clone(),
                        now,
                    )?);
                }
            }
        }
    }

    Ok(DeductionPlan::Apply { entries, released })
}

/// Plan the hold rows for one reserve request.
///
/// Every row shares the cart, unit, price and expiry in `terms`.
pub fn plan_reservation(
    ledger: &VariantLedger,
    qty: f64,
    terms: &HoldTerms,
    conv: &Converter<'_>,
    now: DateTime<Utc>,
) -> StockResult<Vec<Reservation>> {
    if !qty.is_finite() || qty <= 0.0 {
        return Err(DomainError::validation(format!(
            "reserved quantity must be positive, got {qty}"
        ))
        .into());
    }
    if terms.expires_at <= now {
        return Err(DomainError::validation("reservation expiry must be in the future").into());
    }

    match ledger.find_allocatable(terms.unit_id, qty, conv, now)? {
        Allocatable::Insufficient { available } => Err(StockError::InsufficientStock {
            requested: qty,
            available,
        }),
        Allocatable::Sufficient(candidates) => split(&candidates, qty)
            .into_iter()
            .map(|(entry_id, take)| {
                Reservation::new(ledger.tenant_id(), ledger.variant_id(), entry_id, take, terms, now)
                    .map_err(StockError::from)
            })
            .collect(),
    }
}

/// Everything removed by reverting one entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevertPlan {
    /// The entry and its descendants, parents first.
    pub entries: Vec<EntryId>,
    /// Holds placed on any of those entries.
    pub reservations: Vec<ReservationId>,
}

pub fn plan_revert(ledger: &VariantLedger, entry_id: EntryId) -> StockResult<RevertPlan> {
    let entries = ledger.descendants(entry_id)?;
    let reservations = ledger
        .reservations()
        .iter()
        .filter(|r| entries.contains(&r.origin_entry()))
        .map(|r| r.id())
        .collect();
    Ok(RevertPlan {
        entries,
        reservations,
    })
}
