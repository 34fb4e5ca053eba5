use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, EntryId, ReservationId, TenantId, UnitId, VariantId,
};

/// Hold lifetime applied when the caller does not pass an explicit expiry.
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 15;

/// Longest accepted hold lifetime: one year.
pub const MAX_RESERVATION_TTL_MINUTES: i64 = 366 * 24 * 60;

/// `now + ttl_minutes`, or a validation error when the sum does not fit.
pub fn default_expiry(now: DateTime<Utc>, ttl_minutes: i64) -> DomainResult<DateTime<Utc>> {
    Duration::try_minutes(ttl_minutes)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            DomainError::validation(format!("reservation ttl of {ttl_minutes} minutes is out of range"))
        })
}

/// A temporary hold on part of one ledger entry's remaining balance.
///
/// Holds never touch the ledger itself; an unexpired hold only lowers the
/// available balance of its origin entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    tenant_id: TenantId,
    variant_id: VariantId,
    unit_id: UnitId,
    origin_entry: EntryId,
    changes: f64,
    price: i64,
    external_cart_id: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Shared attributes of every row written by one reserve request.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldTerms {
    pub unit_id: UnitId,
    pub price: i64,
    pub external_cart_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        tenant_id: TenantId,
        variant_id: VariantId,
        origin_entry: EntryId,
        qty: f64,
        terms: &HoldTerms,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !qty.is_finite() || qty <= 0.0 {
            return Err(DomainError::validation(format!(
                "reserved quantity must be positive, got {qty}"
            )));
        }
        Ok(Self {
            id: ReservationId::new(),
            tenant_id,
            variant_id,
            unit_id: terms.unit_id,
            origin_entry,
            changes: qty,
            price: terms.price,
            external_cart_id: terms.external_cart_id.clone(),
            expires_at: terms.expires_at,
            created_at,
        })
    }

    /// Expiry is strict: a hold expiring exactly at `now` no longer counts.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn belongs_to_cart(&self, cart: &str) -> bool {
        self.external_cart_id.as_deref() == Some(cart)
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn origin_entry(&self) -> EntryId {
        self.origin_entry
    }

    pub fn changes(&self) -> f64 {
        self.changes
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn external_cart_id(&self) -> Option<&str> {
        self.external_cart_id.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> ReservationId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
