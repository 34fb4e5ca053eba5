use serde::{Deserialize, Serialize};

use stockledger_core::{Entity, EquivalenceId, ProductId, TenantId, UnitId};

use crate::error::ConversionError;

/// A named measure, either global to the tenant ("standard unit") or scoped to
/// one catalog product ("per-item unit").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    id: UnitId,
    tenant_id: TenantId,
    title: String,
    short_title: Option<String>,
    product_id: Option<ProductId>,
}

impl Unit {
    pub fn standard(tenant_id: TenantId, title: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(),
            tenant_id,
            title: title.into(),
            short_title: None,
            product_id: None,
        }
    }

    pub fn for_product(tenant_id: TenantId, product_id: ProductId, title: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::standard(tenant_id, title)
        }
    }

    pub fn with_short_title(mut self, short: impl Into<String>) -> Self {
        self.short_title = Some(short.into());
        self
    }

    pub fn with_id(mut self, id: UnitId) -> Self {
        self.id = id;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn is_standard(&self) -> bool {
        self.product_id.is_none()
    }

    /// Label used in balance reports and audit messages (short form if set).
    pub fn descriptor(&self) -> &str {
        self.short_title.as_deref().unwrap_or(&self.title)
    }
}

impl Entity for Unit {
    type Id = UnitId;

    fn id(&self) -> UnitId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// `1 sale_unit = equal storage_unit`.
///
/// Edges of the conversion graph. Unique per unordered unit pair per tenant
/// (enforced by the store on write).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEquivalence {
    id: EquivalenceId,
    tenant_id: TenantId,
    sale_unit: UnitId,
    storage_unit: UnitId,
    equal: f64,
}

impl UnitEquivalence {
    pub fn new(
        tenant_id: TenantId,
        sale_unit: UnitId,
        storage_unit: UnitId,
        equal: f64,
    ) -> Result<Self, ConversionError> {
        let eq = Self {
            id: EquivalenceId::new(),
            tenant_id,
            sale_unit,
            storage_unit,
            equal,
        };
        eq.validate()?;
        Ok(eq)
    }

    /// Reject degenerate pairs and non-positive ratios.
    pub fn validate(&self) -> Result<(), ConversionError> {
        if self.sale_unit == self.storage_unit {
            return Err(ConversionError::invalid(format!(
                "sale and storage unit are the same ({})",
                self.sale_unit
            )));
        }
        if !self.equal.is_finite() || self.equal <= 0.0 {
            return Err(ConversionError::invalid(format!(
                "ratio must be a positive number, got {}",
                self.equal
            )));
        }
        Ok(())
    }

    pub fn sale_unit(&self) -> UnitId {
        self.sale_unit
    }

    pub fn storage_unit(&self) -> UnitId {
        self.storage_unit
    }

    pub fn equal(&self) -> f64 {
        self.equal
    }

    /// Order-independent key; `(a, b)` and `(b, a)` collide.
    pub fn pair_key(&self) -> (UnitId, UnitId) {
        if self.sale_unit <= self.storage_unit {
            (self.sale_unit, self.storage_unit)
        } else {
            (self.storage_unit, self.sale_unit)
        }
    }

    pub fn involves(&self, unit: UnitId) -> bool {
        self.sale_unit == unit || self.storage_unit == unit
    }
}

impl Entity for UnitEquivalence {
    type Id = EquivalenceId;

    fn id(&self) -> EquivalenceId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
