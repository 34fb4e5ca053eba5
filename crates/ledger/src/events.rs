//! Notifications emitted after a committed ledger change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{EntryId, ReservationId, RevisionId, TenantId, VariantId};
use stockledger_events::Event;

/// Which audit stream a record belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    StockBalanceChange,
    StockReservation,
    StockRevision,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::StockBalanceChange => "stock_balance_change",
            AuditKind::StockReservation => "stock_reservation",
            AuditKind::StockRevision => "stock_revision",
        }
    }
}

/// A record an audit record is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditRef {
    Variant(VariantId),
    Entry(EntryId),
    Reservation(ReservationId),
    Revision(RevisionId),
}

/// Human-readable description of one ledger change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub kind: AuditKind,
    pub message: String,
    pub references: Vec<AuditRef>,
    pub occurred_at: DateTime<Utc>,
}

/// Format minor currency units as `12.34`.
pub fn format_price(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn format_qty(qty: f64) -> String {
    let rounded = (qty * 1000.0).round() / 1000.0;
    format!("{rounded}")
}

impl AuditRecord {
    pub fn new(
        tenant_id: TenantId,
        kind: AuditKind,
        message: impl Into<String>,
        references: Vec<AuditRef>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            kind,
            message: message.into(),
            references,
            occurred_at,
        }
    }

    /// "Variant X: 12 pcs added to stock at price 1.50" (or "deducted from").
    pub fn balance_change(
        tenant_id: TenantId,
        variant_id: VariantId,
        entry_id: EntryId,
        signed_qty: f64,
        unit: &str,
        price: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let verb = if signed_qty > 0.0 {
            "added to"
        } else {
            "deducted from"
        };
        Self::new(
            tenant_id,
            AuditKind::StockBalanceChange,
            format!(
                "Variant {variant_id}: {} {unit} {verb} stock at price {}",
                format_qty(signed_qty.abs()),
                format_price(price)
            ),
            vec![AuditRef::Variant(variant_id), AuditRef::Entry(entry_id)],
            occurred_at,
        )
    }

    pub fn entry_reverted(
        tenant_id: TenantId,
        variant_id: VariantId,
        entry_id: EntryId,
        signed_qty: f64,
        unit: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let what = if signed_qty > 0.0 {
            "addition"
        } else {
            "deduction"
        };
        Self::new(
            tenant_id,
            AuditKind::StockBalanceChange,
            format!(
                "Variant {variant_id}: entry about {what} of {} {unit} deleted",
                format_qty(signed_qty.abs())
            ),
            vec![AuditRef::Variant(variant_id), AuditRef::Entry(entry_id)],
            occurred_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reserved(
        tenant_id: TenantId,
        variant_id: VariantId,
        reservation_id: ReservationId,
        qty: f64,
        unit: &str,
        price: i64,
        expires_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            tenant_id,
            AuditKind::StockReservation,
            format!(
                "Variant {variant_id}: {} {unit} reserved at price {} until {}",
                format_qty(qty),
                format_price(price),
                expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            vec![
                AuditRef::Variant(variant_id),
                AuditRef::Reservation(reservation_id),
            ],
            occurred_at,
        )
    }

    pub fn reservation_removed(
        tenant_id: TenantId,
        variant_id: VariantId,
        reservation_id: ReservationId,
        qty: f64,
        unit: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            tenant_id,
            AuditKind::StockReservation,
            format!(
                "Variant {variant_id}: reservation of {} {unit} removed",
                format_qty(qty)
            ),
            vec![
                AuditRef::Variant(variant_id),
                AuditRef::Reservation(reservation_id),
            ],
            occurred_at,
        )
    }

    pub fn revision_removed(
        tenant_id: TenantId,
        variant_id: VariantId,
        revision_id: RevisionId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            tenant_id,
            AuditKind::StockRevision,
            format!("Variant {variant_id}: revision {revision_id} removed"),
            vec![AuditRef::Variant(variant_id), AuditRef::Revision(revision_id)],
            occurred_at,
        )
    }
}

/// Everything the ledger publishes.
///
/// Balance and reserve notifications carry no amounts: consumers recompute
/// from the ledger, which makes redelivery harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StockEvent {
    BalanceChanged {
        variant_id: VariantId,
        occurred_at: DateTime<Utc>,
    },
    ReserveChanged {
        variant_id: VariantId,
        occurred_at: DateTime<Utc>,
    },
    Audit(AuditRecord),
}

impl StockEvent {
    pub fn balance_changed(variant_id: VariantId, occurred_at: DateTime<Utc>) -> Self {
        Self::BalanceChanged {
            variant_id,
            occurred_at,
        }
    }

    pub fn reserve_changed(variant_id: VariantId, occurred_at: DateTime<Utc>) -> Self {
        Self::ReserveChanged {
            variant_id,
            occurred_at,
        }
    }

    /// Variant whose cached balance fields should be refreshed, if any.
    pub fn refresh_target(&self) -> Option<VariantId> {
        match self {
            StockEvent::BalanceChanged { variant_id, .. }
            | StockEvent::ReserveChanged { variant_id, .. } => Some(*variant_id),
            StockEvent::Audit(_) => None,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::BalanceChanged { .. } => "stock.variant.balance_changed",
            StockEvent::ReserveChanged { .. } => "stock.variant.reserve_changed",
            StockEvent::Audit(record) => match record.kind {
                AuditKind::StockBalanceChange => "stock.audit.stock_balance_change",
                AuditKind::StockReservation => "stock.audit.stock_reservation",
                AuditKind::StockRevision => "stock.audit.stock_revision",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::BalanceChanged { occurred_at, .. }
            | StockEvent::ReserveChanged { occurred_at, .. } => *occurred_at,
            StockEvent::Audit(record) => record.occurred_at,
        }
    }
}
