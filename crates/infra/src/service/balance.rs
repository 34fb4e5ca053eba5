//! Balance reads and the cached-balance refresh.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use stockledger_core::{Clock, EntryId, ProductId, TenantId, UnitId, VariantId};
use stockledger_events::EventBus;
use stockledger_ledger::{Allocatable, ReservationMode};
use stockledger_units::Converter;

use super::{BalanceReport, BalanceSubject, Quantity, StockEnvelope, StockLedgerService};
use crate::catalog::Catalog;
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

impl<S, C, B, K> StockLedgerService<S, C, B, K>
where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<StockEnvelope>,
    K: Clock,
{
    /// Balance (holds ignored) and reserve of a variant, product or entry.
    ///
    /// Without `unit` the subject's default unit is used: the variant's (or
    /// its product's), the product's, or the entry's own unit.
    pub fn get_balance(
        &self,
        tenant_id: TenantId,
        subject: BalanceSubject,
        unit: Option<UnitId>,
    ) -> LedgerResult<BalanceReport> {
        if let Some(unit) = unit {
            self.require_unit(tenant_id, unit)?;
        }
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let now = self.clock.now();

        let (unit, balance, reserve) = match subject {
            BalanceSubject::Variant(variant_id) => {
                let variant = self.require_variant(tenant_id, variant_id)?;
                let unit = report_unit(unit.or_else(|| self.default_unit(tenant_id, &variant)))?;
                let ledger = self.load_variant(tenant_id, variant_id)?;
                (
                    unit,
                    ledger.balance(unit, &conv, ReservationMode::Ignore, now)?,
                    ledger.reserved(unit, &conv, now)?,
                )
            }
            BalanceSubject::Product(product_id) => {
                let product = self
                    .catalog
                    .product(tenant_id, product_id)
                    .ok_or(LedgerError::NotFound("product"))?;
                let unit = report_unit(unit.or(product.default_unit))?;
                let (mut balance, mut reserve) = (0.0, 0.0);
                for variant_id in product.variants {
                    let ledger = self.load_variant(tenant_id, variant_id)?;
                    balance += ledger.balance(unit, &conv, ReservationMode::Ignore, now)?;
                    reserve += ledger.reserved(unit, &conv, now)?;
                }
                (unit, balance, reserve)
            }
            BalanceSubject::Entry(entry_id) => {
                let entry = self
                    .store
                    .entry(tenant_id, entry_id)?
                    .ok_or(LedgerError::NotFound("ledger entry"))?;
                let unit = unit.unwrap_or(entry.unit_id());
                let ledger = self.load_variant(tenant_id, entry.variant_id())?;
                let balance = ledger
                    .entry_balance(entry_id, unit, &conv, ReservationMode::Ignore, now)
                    .map_err(|e| LedgerError::from_stock(entry.variant_id(), e))?;
                let mut reserve = 0.0;
                for hold in ledger
                    .active_reservations(now)
                    .filter(|r| r.origin_entry() == entry_id)
                {
                    reserve += conv.convert(hold.changes(), hold.unit_id(), unit)?;
                }
                (unit, balance, reserve)
            }
        };

        debug!(%tenant_id, ?subject, %unit, balance, reserve, "balance read");
        Ok(BalanceReport {
            balance: Quantity { value: balance, unit },
            reserve: Quantity { value: reserve, unit },
        })
    }

    pub fn variant_balance(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        unit: UnitId,
        mode: ReservationMode,
    ) -> LedgerResult<f64> {
        self.require_variant(tenant_id, variant_id)?;
        self.require_unit(tenant_id, unit)?;
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let ledger = self.load_variant(tenant_id, variant_id)?;
        Ok(ledger.balance(unit, &conv, mode, self.clock.now())?)
    }

    pub fn entry_balance(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
        unit: UnitId,
        mode: ReservationMode,
    ) -> LedgerResult<f64> {
        let entry = self
            .store
            .entry(tenant_id, entry_id)?
            .ok_or(LedgerError::NotFound("ledger entry"))?;
        self.require_unit(tenant_id, unit)?;
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let ledger = self.load_variant(tenant_id, entry.variant_id())?;
        ledger
            .entry_balance(entry_id, unit, &conv, mode, self.clock.now())
            .map_err(|e| LedgerError::from_stock(entry.variant_id(), e))
    }

    /// Read-only FIFO search; nothing is held or written.
    pub fn find_allocatable(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
        unit: UnitId,
        qty: f64,
    ) -> LedgerResult<Allocatable> {
        self.require_variant(tenant_id, variant_id)?;
        self.require_unit(tenant_id, unit)?;
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let ledger = self.load_variant(tenant_id, variant_id)?;
        ledger
            .find_allocatable(unit, qty, &conv, self.clock.now())
            .map_err(|e| LedgerError::from_stock(variant_id, e))
    }

    /// Units the variant has ledger entries in, without duplicates.
    pub fn variant_stock_units(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> LedgerResult<Vec<UnitId>> {
        self.require_variant(tenant_id, variant_id)?;
        let units: BTreeSet<UnitId> = self
            .store
            .entries_for_variant(tenant_id, variant_id)?
            .iter()
            .map(|e| e.unit_id())
            .collect();
        Ok(units.into_iter().collect())
    }

    /// Units used by the product's stock that have no known conversion to the
    /// product's default unit. Without a default unit every stock unit is listed.
    pub fn missing_conversions(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> LedgerResult<Vec<UnitId>> {
        let product = self
            .catalog
            .product(tenant_id, product_id)
            .ok_or(LedgerError::NotFound("product"))?;
        let graph = self.graph(tenant_id)?;

        let mut used = BTreeSet::new();
        for variant_id in &product.variants {
            used.extend(self.variant_stock_units(tenant_id, *variant_id)?);
        }
        Ok(used
            .into_iter()
            .filter(|unit| match product.default_unit {
                Some(default) => graph.multiplier(*unit, default).is_err(),
                None => true,
            })
            .collect())
    }

    /// Write the variant's balance and reserve, in its default unit, into the
    /// catalog's cached fields. A variant without a default unit is skipped.
    pub fn refresh_cached_balance(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> LedgerResult<()> {
        let variant = self.require_variant(tenant_id, variant_id)?;
        let Some(unit) = self.default_unit(tenant_id, &variant) else {
            warn!(%tenant_id, %variant_id, "variant has no default unit; cached balance not refreshed");
            return Ok(());
        };
        let graph = self.graph(tenant_id)?;
        let conv = Converter::new(&graph, self.config.conversion_policy);
        let now = self.clock.now();
        let ledger = self.load_variant(tenant_id, variant_id)?;
        let on_stock = ledger.balance(unit, &conv, ReservationMode::Ignore, now)?;
        let reserved = ledger.reserved(unit, &conv, now)?;

        self.catalog
            .set_cached_balance(tenant_id, variant_id, on_stock, reserved)?;
        debug!(%tenant_id, %variant_id, on_stock, reserved, "cached balance refreshed");
        Ok(())
    }
}

fn report_unit(unit: Option<UnitId>) -> LedgerResult<UnitId> {
    unit.ok_or_else(|| {
        LedgerError::Validation("no unit given and the subject has no default unit".to_string())
    })
}
