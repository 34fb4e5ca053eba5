use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, Entity, EntryId, RevisionId, TenantId, UnitId, VariantId,
    WarehouseZoneId,
};

/// Lifecycle of a physical count.
///
/// `Planned -> Finished`. `Recalculating` is reserved for a future
/// recalculation step; nothing transitions into it today.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionState {
    Planned,
    Recalculating,
    Finished,
}

/// What the system believed when the count was finished.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub current_qty: Option<f64>,
    pub default_unit: Option<UnitId>,
}

/// The counted result of a finished revision.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    pub qty: f64,
    pub unit_id: UnitId,
}

/// A scheduled or completed physical count of a variant in a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    id: RevisionId,
    tenant_id: TenantId,
    variant_id: VariantId,
    zone_id: WarehouseZoneId,
    state: RevisionState,
    planned_on: Option<DateTime<Utc>>,
    recalculated_at: Option<DateTime<Utc>>,
    result: Option<CountResult>,
    snapshot: Option<CountSnapshot>,
    origin_entry: Option<EntryId>,
    created_at: DateTime<Utc>,
}

impl Revision {
    pub fn planned(
        tenant_id: TenantId,
        variant_id: VariantId,
        zone_id: WarehouseZoneId,
        planned_on: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RevisionId::new(),
            tenant_id,
            variant_id,
            zone_id,
            state: RevisionState::Planned,
            planned_on: Some(planned_on),
            recalculated_at: None,
            result: None,
            snapshot: None,
            origin_entry: None,
            created_at,
        }
    }

    /// A count recorded without having been planned first.
    pub fn unplanned(
        tenant_id: TenantId,
        variant_id: VariantId,
        zone_id: WarehouseZoneId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            planned_on: None,
            ..Self::planned(tenant_id, variant_id, zone_id, created_at, created_at)
        }
    }

    pub fn with_origin(mut self, origin_entry: Option<EntryId>) -> Self {
        self.origin_entry = origin_entry;
        self
    }

    /// Move a still-planned count to another date.
    pub fn reschedule(&mut self, planned_on: DateTime<Utc>) -> DomainResult<()> {
        if self.state != RevisionState::Planned {
            return Err(DomainError::conflict(format!(
                "revision {} is {:?}, only planned revisions can be rescheduled",
                self.id, self.state
            )));
        }
        self.planned_on = Some(planned_on);
        Ok(())
    }

    /// Record the counted quantity together with the believed one.
    ///
    /// A finished revision may be finished again to correct its count.
    pub fn finish(
        &mut self,
        result: CountResult,
        snapshot: CountSnapshot,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.state == RevisionState::Recalculating {
            return Err(DomainError::conflict(format!(
                "revision {} is being recalculated",
                self.id
            )));
        }
        if !result.qty.is_finite() || result.qty < 0.0 {
            return Err(DomainError::validation(format!(
                "counted quantity must be zero or more, got {}",
                result.qty
            )));
        }
        self.state = RevisionState::Finished;
        self.result = Some(result);
        self.snapshot = Some(snapshot);
        self.recalculated_at = Some(now);
        Ok(())
    }

    pub fn detach_origin(&mut self) {
        self.origin_entry = None;
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn zone_id(&self) -> WarehouseZoneId {
        self.zone_id
    }

    pub fn state(&self) -> RevisionState {
        self.state
    }

    pub fn planned_on(&self) -> Option<DateTime<Utc>> {
        self.planned_on
    }

    pub fn recalculated_at(&self) -> Option<DateTime<Utc>> {
        self.recalculated_at
    }

    pub fn result(&self) -> Option<CountResult> {
        self.result
    }

    pub fn snapshot(&self) -> Option<CountSnapshot> {
        self.snapshot
    }

    pub fn origin_entry(&self) -> Option<EntryId> {
        self.origin_entry
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for Revision {
    type Id = RevisionId;

    fn id(&self) -> RevisionId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
