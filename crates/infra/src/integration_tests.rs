//! Scenario tests for the stock ledger service over the in-memory collaborators.
//!
//! Verifies:
//! - balances, FIFO allocation, replay and cart finalization end to end
//! - holds stop counting once expired, before and after the sweep
//! - tenant isolation and atomic failure
//! - revisions, reverts, notifications and the background workers

use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use stockledger_core::{
    Clock, Entity, EntryId, ManualClock, TenantId, UnitId, VariantId, WarehouseId, WarehouseZoneId,
};
use stockledger_events::{EventBus, InMemoryEventBus, Subscription};
use stockledger_ledger::{
    Allocatable, AuditKind, LedgerEntry, Reservation, ReservationMode, RevisionState, StockEvent,
};
use stockledger_units::{ConversionPolicy, Unit};

use crate::catalog::{Catalog, InMemoryCatalog};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::service::{
    AddStock, BalanceReport, BalanceSubject, ChangeOutcome, DeductStock, DeductionOutcome,
    FinishRevision, PlanRevision, RecordChange, ReleaseTarget, ReserveStock, RevisionQuery,
    StockEnvelope, StockLedgerService,
};
use crate::store::{InMemoryLedgerStore, LedgerStore};
use crate::workers::{BalanceRefresher, ReservationSweeper, SweeperConfig};

type Service = StockLedgerService<
    Arc<InMemoryLedgerStore>,
    Arc<InMemoryCatalog>,
    Arc<InMemoryEventBus<StockEnvelope>>,
    Arc<ManualClock>,
>;

struct Fixture {
    tenant: TenantId,
    store: Arc<InMemoryLedgerStore>,
    catalog: Arc<InMemoryCatalog>,
    bus: Arc<InMemoryEventBus<StockEnvelope>>,
    clock: Arc<ManualClock>,
    service: Arc<Service>,
    /// "unit", the product's default unit.
    unit: UnitId,
    /// 1 case = 12 unit.
    case: UnitId,
    variant: VariantId,
    zone: WarehouseZoneId,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn fixture() -> Fixture {
    fixture_with(LedgerConfig::default())
}

fn fixture_with(config: LedgerConfig) -> Fixture {
    let tenant = TenantId::new();
    let store = Arc::new(InMemoryLedgerStore::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let bus: Arc<InMemoryEventBus<StockEnvelope>> = Arc::new(InMemoryEventBus::new());
    let clock = Arc::new(ManualClock::new(start()));
    let service = Arc::new(StockLedgerService::new(
        store.clone(),
        catalog.clone(),
        bus.clone(),
        clock.clone(),
        config,
    ));

    let unit = service
        .register_unit(tenant, Unit::standard(tenant, "unit").with_short_title("pcs"))
        .unwrap()
        .id();
    let case = service
        .register_unit(tenant, Unit::standard(tenant, "case"))
        .unwrap()
        .id();
    service.configure_equivalence(tenant, case, unit, 12.0).unwrap();

    let product = catalog.add_product(tenant, Some(unit));
    let variant = catalog.add_variant(tenant, product, None).unwrap();
    let zone = catalog.add_zone(tenant, WarehouseId::new());

    Fixture {
        tenant,
        store,
        catalog,
        bus,
        clock,
        service,
        unit,
        case,
        variant,
        zone,
    }
}

impl Fixture {
    fn add(&self, qty: f64, unit: UnitId) -> LedgerEntry {
        self.service
            .add_stock(
                self.tenant,
                AddStock {
                    variant_id: self.variant,
                    unit_id: unit,
                    zone_id: self.zone,
                    qty,
                    price: 1250,
                    external_item_id: None,
                    external_cart_id: None,
                    origin_entry: None,
                },
            )
            .unwrap()
    }

    fn deduct(&self, qty: f64, item: Option<&str>, cart: Option<&str>) -> LedgerResult<DeductionOutcome> {
        self.service.deduct_stock(
            self.tenant,
            DeductStock {
                variant_id: self.variant,
                unit_id: self.unit,
                qty,
                external_item_id: item.map(str::to_string),
                external_cart_id: cart.map(str::to_string),
            },
        )
    }

    fn reserve(&self, qty: f64, cart: &str, expires_at: Option<DateTime<Utc>>) -> LedgerResult<Vec<Reservation>> {
        self.service.reserve_stock(
            self.tenant,
            ReserveStock {
                variant_id: self.variant,
                unit_id: self.unit,
                qty,
                external_cart_id: Some(cart.to_string()),
                expires_at,
                price: 1250,
            },
        )
    }

    fn balance(&self) -> BalanceReport {
        self.service
            .get_balance(self.tenant, BalanceSubject::Variant(self.variant), Some(self.unit))
            .unwrap()
    }

    fn tick(&self) {
        self.clock.advance(Duration::seconds(1));
    }

    fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn deducted(outcome: DeductionOutcome) -> Vec<LedgerEntry> {
    match outcome {
        DeductionOutcome::Deducted(entries) => entries,
        DeductionOutcome::NoOpReplay => panic!("expected a deduction, got a replay"),
    }
}

fn payloads(sub: &Subscription<StockEnvelope>) -> Vec<StockEvent> {
    sub.drain().into_iter().map(|e| e.into_payload()).collect()
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + StdDuration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(StdDuration::from_millis(10));
    }
    done()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ---------------------------------------------------------------------------
// Core properties
// ---------------------------------------------------------------------------

#[test]
fn conversion_multipliers_are_reciprocal() {
    let fx = fixture();
    let there = fx.service.multiplier(fx.tenant, fx.case, fx.unit).unwrap();
    let back = fx.service.multiplier(fx.tenant, fx.unit, fx.case).unwrap();
    assert!(close(there, 12.0));
    assert!(close(there * back, 1.0));
    assert!(close(fx.service.multiplier(fx.tenant, fx.unit, fx.unit).unwrap(), 1.0));
}

#[test]
fn deducting_from_an_addition_leaves_the_difference() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.deduct(-5.0, None, None).unwrap();

    let report = fx.balance();
    assert!(close(report.balance.value, 5.0));
    assert!(close(report.reserve.value, 0.0));
    assert_eq!(report.balance.unit, fx.unit);
}

#[test]
fn deduction_consumes_oldest_entries_first() {
    let fx = fixture();
    let first = fx.add(3.0, fx.unit);
    fx.tick();
    let second = fx.add(5.0, fx.unit);
    fx.tick();

    let entries = deducted(fx.deduct(-4.0, None, None).unwrap());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].origin_entry(), Some(first.id()));
    assert!(close(entries[0].changes(), -3.0));
    assert_eq!(entries[1].origin_entry(), Some(second.id()));
    assert!(close(entries[1].changes(), -1.0));

    let left = |id: EntryId| {
        fx.service
            .entry_balance(fx.tenant, id, fx.unit, ReservationMode::Ignore)
            .unwrap()
    };
    assert!(close(left(first.id()), 0.0));
    assert!(close(left(second.id()), 4.0));
}

#[test]
fn derived_entries_inherit_location_and_price() {
    let fx = fixture();
    let origin = fx.add(4.0, fx.unit);
    let entries = deducted(fx.deduct(-1.0, Some("line-9"), None).unwrap());

    assert_eq!(entries[0].location(), origin.location());
    assert_eq!(entries[0].price(), origin.price());
    assert_eq!(entries[0].external_item_id(), Some("line-9"));
}

#[test]
fn replaying_an_order_line_writes_nothing() {
    let fx = fixture();
    fx.add(10.0, fx.unit);

    let first = fx.deduct(-2.0, Some("order-1/line-1"), None).unwrap();
    assert_eq!(deducted(first).len(), 1);
    let rows = fx.store.entry_count();

    let sub = fx.bus.subscribe();
    let replay = fx.deduct(-2.0, Some("order-1/line-1"), None).unwrap();
    assert_eq!(replay, DeductionOutcome::NoOpReplay);
    assert_eq!(fx.store.entry_count(), rows);
    assert!(payloads(&sub).is_empty());
    assert!(close(fx.balance().balance.value, 8.0));
}

#[test]
fn a_larger_replay_deducts_only_the_remainder() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.deduct(-2.0, Some("line-1"), None).unwrap();

    let entries = deducted(fx.deduct(-3.0, Some("line-1"), None).unwrap());
    assert_eq!(entries.len(), 1);
    assert!(close(entries[0].changes(), -1.0));
    assert!(close(fx.balance().balance.value, 7.0));
}

#[test]
fn finalizing_a_cart_consumes_its_hold() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.reserve(4.0, "C", None).unwrap();

    let report = fx.balance();
    assert!(close(report.balance.value, 10.0));
    assert!(close(report.reserve.value, 4.0));
    assert!(close(report.available(), 6.0));

    let sub = fx.bus.subscribe();
    fx.deduct(-4.0, None, Some("C")).unwrap();

    let report = fx.balance();
    assert!(close(report.balance.value, 6.0));
    assert!(close(report.reserve.value, 0.0));
    assert!(fx.store.reservations_for_variant(fx.tenant, fx.variant).unwrap().is_empty());

    let events = payloads(&sub);
    assert!(events.contains(&StockEvent::balance_changed(fx.variant, start())));
    assert!(events.contains(&StockEvent::reserve_changed(fx.variant, start())));
}

#[test]
fn cart_deduction_beyond_the_hold_allocates_the_rest_fifo() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.reserve(2.0, "C", None).unwrap();
    fx.reserve(3.0, "other", None).unwrap();

    let entries = deducted(fx.deduct(-6.0, None, Some("C")).unwrap());
    let total: f64 = entries.iter().map(|e| e.changes()).sum();
    assert!(close(total, -6.0));

    let report = fx.balance();
    assert!(close(report.balance.value, 4.0));
    assert!(close(report.reserve.value, 3.0));

    // The other cart's hold is still covered by what is left.
    assert!(matches!(fx.deduct(-2.0, None, None), Err(LedgerError::InsufficientStock { .. })));
}

#[test]
fn expired_holds_neither_count_nor_block() {
    let fx = fixture();
    fx.add(5.0, fx.unit);
    fx.reserve(5.0, "A", Some(start() + Duration::minutes(1))).unwrap();

    assert!(matches!(
        fx.deduct(-1.0, None, None),
        Err(LedgerError::InsufficientStock { .. })
    ));

    fx.clock.advance(Duration::minutes(2));
    assert!(close(fx.balance().reserve.value, 0.0));
    assert!(fx.service.reserve_stock(fx.tenant, ReserveStock {
        variant_id: fx.variant,
        unit_id: fx.unit,
        qty: 2.0,
        external_cart_id: Some("B".into()),
        expires_at: None,
        price: 0,
    }).is_ok());
    fx.deduct(-3.0, None, None).unwrap();
    assert!(close(fx.balance().balance.value, 2.0));

    let report = fx.service.sweep_expired().unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(fx.store.reservations_for_variant(fx.tenant, fx.variant).unwrap().len(), 1);
}

#[test]
fn insufficient_stock_writes_and_publishes_nothing() {
    let fx = fixture();
    fx.add(3.0, fx.unit);
    let rows = fx.store.entry_count();
    let sub = fx.bus.subscribe();

    let err = fx.deduct(-4.0, Some("line-1"), None).unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientStock {
            variant_id: fx.variant,
            requested: 4.0,
            available: 3.0,
        }
    );
    assert_eq!(fx.store.entry_count(), rows);
    assert!(payloads(&sub).is_empty());

    let err = fx.reserve(4.0, "C", None).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientStock { .. }));
    assert!(fx.store.reservations_for_variant(fx.tenant, fx.variant).unwrap().is_empty());
}

#[test]
fn cyclic_equivalences_are_rejected_and_leave_the_graph_intact() {
    let fx = fixture();
    let t = fx.tenant;
    let a = fx.service.register_unit(t, Unit::standard(t, "a")).unwrap().id();
    let b = fx.service.register_unit(t, Unit::standard(t, "b")).unwrap().id();
    let c = fx.service.register_unit(t, Unit::standard(t, "c")).unwrap().id();
    fx.service.configure_equivalence(t, a, b, 2.0).unwrap();
    fx.service.configure_equivalence(t, b, c, 3.0).unwrap();

    let err = fx.service.configure_equivalence(t, c, a, 1.0 / 6.0).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidEquivalence(_)));
    assert!(close(fx.service.multiplier(t, a, c).unwrap(), 6.0));
}

#[test]
fn chains_deeper_than_the_cap_are_rejected() {
    let fx = fixture_with(LedgerConfig {
        max_chain_depth: 2,
        ..LedgerConfig::default()
    });
    let t = fx.tenant;
    let units: Vec<UnitId> = (0..4)
        .map(|i| fx.service.register_unit(t, Unit::standard(t, format!("u{i}"))).unwrap().id())
        .collect();
    fx.service.configure_equivalence(t, units[0], units[1], 10.0).unwrap();
    fx.service.configure_equivalence(t, units[1], units[2], 10.0).unwrap();

    let err = fx
        .service
        .configure_equivalence(t, units[2], units[3], 10.0)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidEquivalence(_)));
}

#[test]
fn degenerate_and_duplicate_pairs_are_rejected() {
    let fx = fixture();
    assert!(matches!(
        fx.service.configure_equivalence(fx.tenant, fx.unit, fx.unit, 2.0),
        Err(LedgerError::InvalidEquivalence(_))
    ));
    assert!(matches!(
        fx.service.configure_equivalence(fx.tenant, fx.unit, fx.case, 0.5),
        Err(LedgerError::InvalidEquivalence(_))
    ));
}

#[test]
fn removing_an_equivalence_drops_the_cached_conversion() {
    let fx = fixture();
    let t = fx.tenant;
    let box_unit = fx.service.register_unit(t, Unit::standard(t, "box")).unwrap().id();
    let eq = fx.service.configure_equivalence(t, box_unit, fx.unit, 6.0).unwrap();
    assert!(close(fx.service.multiplier(t, box_unit, fx.unit).unwrap(), 6.0));

    fx.service.remove_equivalence(t, eq.id()).unwrap();
    assert!(matches!(
        fx.service.multiplier(t, box_unit, fx.unit),
        Err(LedgerError::MissingConversion { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_adds_and_deductions_conserve_stock(
        ops in prop::collection::vec((any::<bool>(), 1u8..10), 1..30)
    ) {
        let fx = fixture();
        let mut expected = 0.0;
        for (is_add, qty) in ops {
            let qty = f64::from(qty);
            if is_add {
                fx.add(qty, fx.unit);
                expected += qty;
            } else {
                match fx.deduct(-qty, None, None) {
                    Ok(_) => expected -= qty,
                    Err(LedgerError::InsufficientStock { .. }) => prop_assert!(qty > expected),
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }
            prop_assert!(close(fx.balance().balance.value, expected));
        }
    }
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn cases_and_units_scenario() {
    let fx = fixture();
    let case_entry = fx.add(2.0, fx.case);
    assert!(close(fx.balance().balance.value, 24.0));

    fx.reserve(6.0, "cart1", None).unwrap();
    let report = fx.balance();
    assert!(close(report.reserve.value, 6.0));
    assert!(close(report.balance.value, 24.0));
    assert!(close(report.available(), 18.0));

    let entries = deducted(fx.deduct(-6.0, None, Some("cart1")).unwrap());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].origin_entry(), Some(case_entry.id()));
    assert_eq!(entries[0].unit_id(), fx.unit);
    assert!(close(entries[0].changes(), -6.0));

    let report = fx.balance();
    assert!(close(report.balance.value, 18.0));
    assert!(close(report.reserve.value, 0.0));

    let in_cases = fx
        .service
        .get_balance(fx.tenant, BalanceSubject::Variant(fx.variant), Some(fx.case))
        .unwrap();
    assert!(close(in_cases.balance.value, 1.5));
}

#[test]
fn balance_defaults_to_the_subjects_unit() {
    let fx = fixture();
    let entry = fx.add(1.0, fx.case);

    let variant = fx
        .service
        .get_balance(fx.tenant, BalanceSubject::Variant(fx.variant), None)
        .unwrap();
    assert_eq!(variant.balance.unit, fx.unit);
    assert!(close(variant.balance.value, 12.0));

    let by_entry = fx
        .service
        .get_balance(fx.tenant, BalanceSubject::Entry(entry.id()), None)
        .unwrap();
    assert_eq!(by_entry.balance.unit, fx.case);
    assert!(close(by_entry.balance.value, 1.0));
}

#[test]
fn product_balance_sums_its_variants() {
    let fx = fixture();
    fx.add(4.0, fx.unit);
    let product = fx.catalog.variant(fx.tenant, fx.variant).unwrap().product_id;
    let sibling = fx.catalog.add_variant(fx.tenant, product, None).unwrap();
    fx.service
        .add_stock(
            fx.tenant,
            AddStock {
                variant_id: sibling,
                unit_id: fx.case,
                zone_id: fx.zone,
                qty: 1.0,
                price: 0,
                external_item_id: None,
                external_cart_id: None,
                origin_entry: None,
            },
        )
        .unwrap();
    fx.reserve(1.0, "C", None).unwrap();

    let report = fx
        .service
        .get_balance(fx.tenant, BalanceSubject::Product(product), None)
        .unwrap();
    assert!(close(report.balance.value, 16.0));
    assert!(close(report.reserve.value, 1.0));
}

#[test]
fn a_product_without_a_default_unit_needs_an_explicit_one() {
    let fx = fixture();
    let product = fx.catalog.add_product(fx.tenant, None);
    let err = fx
        .service
        .get_balance(fx.tenant, BalanceSubject::Product(product), None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn unconvertible_stock_is_an_error_unless_best_effort() {
    let strict = fixture();
    let t = strict.tenant;
    let kg = strict.service.register_unit(t, Unit::standard(t, "kg")).unwrap().id();
    strict.add(5.0, strict.unit);
    strict.add(2.0, kg);
    assert!(matches!(
        strict
            .service
            .get_balance(t, BalanceSubject::Variant(strict.variant), None),
        Err(LedgerError::MissingConversion { .. })
    ));
    let product = strict.catalog.variant(t, strict.variant).unwrap().product_id;
    assert_eq!(strict.service.missing_conversions(t, product).unwrap(), vec![kg]);
    let mut used = vec![strict.unit, kg];
    used.sort();
    assert_eq!(strict.service.variant_stock_units(t, strict.variant).unwrap(), used);

    let lenient = fixture_with(LedgerConfig {
        conversion_policy: ConversionPolicy::BestEffort,
        ..LedgerConfig::default()
    });
    let t = lenient.tenant;
    let kg = lenient.service.register_unit(t, Unit::standard(t, "kg")).unwrap().id();
    lenient.add(5.0, lenient.unit);
    lenient.add(2.0, kg);
    assert!(close(lenient.balance().balance.value, 5.0));
}

#[test]
fn balance_reads_reject_units_of_another_tenant() {
    let fx = fixture_with(LedgerConfig {
        conversion_policy: ConversionPolicy::BestEffort,
        ..LedgerConfig::default()
    });
    let entry = fx.add(10.0, fx.unit);
    let other = TenantId::new();
    let foreign = fx
        .service
        .register_unit(other, Unit::standard(other, "unit"))
        .unwrap()
        .id();

    let not_found = Err(LedgerError::NotFound("unit"));
    assert_eq!(
        fx.service
            .get_balance(fx.tenant, BalanceSubject::Variant(fx.variant), Some(foreign)),
        not_found
    );
    assert_eq!(
        fx.service
            .get_balance(fx.tenant, BalanceSubject::Entry(entry.id()), Some(foreign)),
        not_found
    );
    assert_eq!(
        fx.service
            .variant_balance(fx.tenant, fx.variant, foreign, ReservationMode::Subtract)
            .unwrap_err(),
        LedgerError::NotFound("unit")
    );
    assert_eq!(
        fx.service
            .entry_balance(fx.tenant, entry.id(), foreign, ReservationMode::Subtract)
            .unwrap_err(),
        LedgerError::NotFound("unit")
    );
    assert_eq!(
        fx.service
            .find_allocatable(fx.tenant, fx.variant, foreign, 1.0)
            .unwrap_err(),
        LedgerError::NotFound("unit")
    );
}

// ---------------------------------------------------------------------------
// Signed changes
// ---------------------------------------------------------------------------

#[test]
fn record_change_routes_by_sign() {
    let fx = fixture();
    let change = |qty: f64, zone: Option<WarehouseZoneId>| RecordChange {
        variant_id: fx.variant,
        unit_id: fx.unit,
        zone_id: zone,
        qty,
        price: 100,
        external_item_id: None,
        external_cart_id: None,
        origin_entry: None,
    };

    assert!(matches!(
        fx.service.record_change(fx.tenant, change(3.0, Some(fx.zone))).unwrap(),
        ChangeOutcome::Added(_)
    ));
    assert!(matches!(
        fx.service.record_change(fx.tenant, change(-1.0, None)).unwrap(),
        ChangeOutcome::Deducted(DeductionOutcome::Deducted(_))
    ));
    assert!(matches!(
        fx.service.record_change(fx.tenant, change(0.0, Some(fx.zone))),
        Err(LedgerError::Validation(_))
    ));
    assert!(matches!(
        fx.service.record_change(fx.tenant, change(2.0, None)),
        Err(LedgerError::Validation(_))
    ));
    assert!(close(fx.balance().balance.value, 2.0));
}

#[test]
fn deduct_rejects_non_negative_quantities() {
    let fx = fixture();
    fx.add(3.0, fx.unit);
    assert!(matches!(fx.deduct(1.0, None, None), Err(LedgerError::Validation(_))));
    assert!(matches!(fx.deduct(0.0, None, None), Err(LedgerError::Validation(_))));
}

#[test]
fn find_allocatable_is_read_only() {
    let fx = fixture();
    fx.add(3.0, fx.unit);
    fx.tick();
    fx.add(5.0, fx.unit);

    match fx.service.find_allocatable(fx.tenant, fx.variant, fx.unit, 4.0).unwrap() {
        Allocatable::Sufficient(candidates) => assert_eq!(candidates.len(), 2),
        other => panic!("expected enough stock, got {other:?}"),
    }
    match fx.service.find_allocatable(fx.tenant, fx.variant, fx.unit, 9.0).unwrap() {
        Allocatable::Insufficient { available } => assert!(close(available, 8.0)),
        other => panic!("expected a shortfall, got {other:?}"),
    }
    assert_eq!(fx.store.entry_count(), 2);
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

#[test]
fn reservation_splits_across_entries_and_notifies_once() {
    let fx = fixture();
    fx.add(2.0, fx.unit);
    fx.tick();
    fx.add(5.0, fx.unit);
    let sub = fx.bus.subscribe();

    let holds = fx.reserve(4.0, "C", None).unwrap();
    assert_eq!(holds.len(), 2);
    assert!(close(holds[0].changes(), 2.0));
    assert!(close(holds[1].changes(), 2.0));
    assert!(holds.iter().all(|h| h.expires_at() == fx.clock_now() + Duration::minutes(15)));

    let events = payloads(&sub);
    let reserve_changes = events
        .iter()
        .filter(|e| matches!(e, StockEvent::ReserveChanged { .. }))
        .count();
    let audits = events
        .iter()
        .filter(|e| matches!(e, StockEvent::Audit(a) if a.kind == AuditKind::StockReservation))
        .count();
    assert_eq!(reserve_changes, 1);
    assert_eq!(audits, 2);
}

#[test]
fn releasing_a_cart_frees_its_holds_on_every_variant() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    let product = fx.catalog.variant(fx.tenant, fx.variant).unwrap().product_id;
    let other = fx.catalog.add_variant(fx.tenant, product, None).unwrap();
    fx.service
        .add_stock(
            fx.tenant,
            AddStock {
                variant_id: other,
                unit_id: fx.unit,
                zone_id: fx.zone,
                qty: 3.0,
                price: 0,
                external_item_id: None,
                external_cart_id: None,
                origin_entry: None,
            },
        )
        .unwrap();
    fx.reserve(2.0, "C", None).unwrap();
    fx.service
        .reserve_stock(
            fx.tenant,
            ReserveStock {
                variant_id: other,
                unit_id: fx.unit,
                qty: 1.0,
                external_cart_id: Some("C".into()),
                expires_at: None,
                price: 0,
            },
        )
        .unwrap();
    fx.reserve(1.0, "D", None).unwrap();

    let released = fx
        .service
        .release_reservation(
            fx.tenant,
            ReleaseTarget::Cart {
                cart_id: "C".into(),
                variant_id: None,
            },
        )
        .unwrap();
    assert_eq!(released.len(), 2);
    assert!(close(fx.balance().reserve.value, 1.0));
}

#[test]
fn releasing_one_hold_follows_its_cart() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    let first = fx.reserve(1.0, "C", None).unwrap();
    fx.reserve(2.0, "C", None).unwrap();
    fx.reserve(3.0, "D", None).unwrap();

    let released = fx
        .service
        .release_reservation(fx.tenant, ReleaseTarget::Reservation(first[0].id()))
        .unwrap();
    assert_eq!(released.len(), 2);
    assert!(close(fx.balance().reserve.value, 3.0));

    let missing = fx
        .service
        .release_reservation(fx.tenant, ReleaseTarget::Reservation(first[0].id()))
        .unwrap_err();
    assert_eq!(missing, LedgerError::NotFound("reservation"));
}

#[test]
fn sweep_removes_only_expired_holds_and_is_repeatable() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.reserve(2.0, "short", Some(start() + Duration::minutes(1))).unwrap();
    fx.reserve(3.0, "long", Some(start() + Duration::hours(1))).unwrap();
    fx.clock.advance(Duration::minutes(5));

    let sub = fx.bus.subscribe();
    let report = fx.service.sweep_expired().unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(report.variants, 1);
    assert_eq!(report.failures, 0);
    assert!(payloads(&sub).contains(&StockEvent::reserve_changed(fx.variant, fx.clock_now())));

    assert_eq!(fx.service.sweep_expired().unwrap().released, 0);
    assert!(close(fx.balance().reserve.value, 3.0));
}

#[test]
fn sweep_releases_an_expired_hold_together_with_its_cart() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    fx.reserve(2.0, "C", Some(start() + Duration::minutes(1))).unwrap();
    fx.reserve(3.0, "C", Some(start() + Duration::hours(1))).unwrap();
    fx.reserve(1.0, "D", Some(start() + Duration::hours(1))).unwrap();
    fx.clock.advance(Duration::minutes(5));

    let report = fx.service.sweep_expired().unwrap();
    assert_eq!(report.released, 2);
    assert_eq!(report.variants, 1);
    assert!(close(fx.balance().reserve.value, 1.0));
    assert!(fx.store.expired_reservations(fx.clock_now()).unwrap().is_empty());
}

#[test]
fn reservation_expiry_must_be_in_the_future() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    let err = fx.reserve(1.0, "C", Some(start() - Duration::minutes(1))).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn an_out_of_range_ttl_is_a_validation_error() {
    let fx = fixture_with(LedgerConfig {
        reservation_ttl_minutes: i64::MAX / 2,
        ..LedgerConfig::default()
    });
    fx.add(10.0, fx.unit);
    let err = fx.reserve(1.0, "C", None).unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert!(close(fx.balance().reserve.value, 0.0));
}

// ---------------------------------------------------------------------------
// Reverts
// ---------------------------------------------------------------------------

#[test]
fn revert_cascades_through_derived_entries() {
    let fx = fixture();
    let root = fx.add(10.0, fx.unit);
    fx.deduct(-4.0, None, None).unwrap();
    let moved = fx
        .service
        .add_stock(
            fx.tenant,
            AddStock {
                variant_id: fx.variant,
                unit_id: fx.unit,
                zone_id: fx.zone,
                qty: 2.0,
                price: 0,
                external_item_id: None,
                external_cart_id: None,
                origin_entry: Some(root.id()),
            },
        )
        .unwrap();
    fx.reserve(1.0, "C", None).unwrap();
    let revision = fx
        .service
        .finish_revision(
            fx.tenant,
            FinishRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                qty: 8.0,
                unit_id: fx.unit,
                origin_entry: Some(root.id()),
                revision_id: None,
            },
        )
        .unwrap();

    let sub = fx.bus.subscribe();
    let removed = fx.service.revert_entry(fx.tenant, root.id()).unwrap();
    assert_eq!(removed.len(), 3);
    assert_eq!(removed[0].id(), root.id());
    assert!(removed.iter().any(|e| e.id() == moved.id()));
    assert_eq!(fx.store.entry_count(), 0);
    assert!(fx.store.reservations_for_variant(fx.tenant, fx.variant).unwrap().is_empty());

    let revision = fx.store.revision(fx.tenant, revision.id()).unwrap().unwrap();
    assert_eq!(revision.origin_entry(), None);

    let events = payloads(&sub);
    let reverted = events
        .iter()
        .filter(|e| matches!(e, StockEvent::Audit(a) if a.kind == AuditKind::StockBalanceChange))
        .count();
    assert_eq!(reverted, 3);
    assert!(events.contains(&StockEvent::balance_changed(fx.variant, start())));
    assert!(events.contains(&StockEvent::reserve_changed(fx.variant, start())));

    let report = fx.balance();
    assert!(close(report.balance.value, 0.0));
    assert!(close(report.reserve.value, 0.0));
}

#[test]
fn reverting_a_deduction_restores_stock() {
    let fx = fixture();
    fx.add(10.0, fx.unit);
    let entries = deducted(fx.deduct(-4.0, None, None).unwrap());
    fx.service.revert_entry(fx.tenant, entries[0].id()).unwrap();
    assert!(close(fx.balance().balance.value, 10.0));
}

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

#[test]
fn planning_twice_reuses_the_planned_revision() {
    let fx = fixture();
    let plan = |days: i64| PlanRevision {
        variant_id: fx.variant,
        zone_id: fx.zone,
        planned_on: start() + Duration::days(days),
        origin_entry: None,
    };
    let first = fx.service.plan_revision(fx.tenant, plan(7)).unwrap();
    let second = fx.service.plan_revision(fx.tenant, plan(14)).unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(second.state(), RevisionState::Planned);
    assert_eq!(second.planned_on(), Some(start() + Duration::days(14)));
    assert_eq!(
        fx.service
            .zone_revisions(fx.tenant, fx.variant, RevisionQuery::default())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn reusing_a_revision_keeps_its_origin_unless_a_new_one_is_given() {
    let fx = fixture();
    let first_entry = fx.add(5.0, fx.unit);
    let second_entry = fx.add(5.0, fx.unit);
    let plan = |origin_entry: Option<EntryId>| PlanRevision {
        variant_id: fx.variant,
        zone_id: fx.zone,
        planned_on: start() + Duration::days(7),
        origin_entry,
    };

    let planned = fx.service.plan_revision(fx.tenant, plan(Some(first_entry.id()))).unwrap();
    let replanned = fx.service.plan_revision(fx.tenant, plan(None)).unwrap();
    assert_eq!(replanned.id(), planned.id());
    assert_eq!(replanned.origin_entry(), Some(first_entry.id()));

    let finished = fx
        .service
        .finish_revision(
            fx.tenant,
            FinishRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                qty: 10.0,
                unit_id: fx.unit,
                origin_entry: None,
                revision_id: Some(planned.id()),
            },
        )
        .unwrap();
    assert_eq!(finished.origin_entry(), Some(first_entry.id()));

    let moved = fx.service.plan_revision(fx.tenant, plan(Some(second_entry.id()))).unwrap();
    assert_ne!(moved.id(), planned.id());
    assert_eq!(moved.origin_entry(), Some(second_entry.id()));
}

#[test]
fn zone_stock_map_lists_stocked_variants_and_their_counts() {
    let fx = fixture();
    fx.add(4.0, fx.unit);
    let product = fx.catalog.variant(fx.tenant, fx.variant).unwrap().product_id;
    let idle = fx.catalog.add_variant(fx.tenant, product, None).unwrap();
    let shelf = fx.catalog.add_sub_zone(fx.tenant, fx.zone).unwrap();
    fx.service
        .add_stock(
            fx.tenant,
            AddStock {
                variant_id: idle,
                unit_id: fx.unit,
                zone_id: shelf,
                qty: 1.0,
                price: 100,
                external_item_id: None,
                external_cart_id: None,
                origin_entry: None,
            },
        )
        .unwrap();

    let finish = |qty: f64| FinishRevision {
        variant_id: fx.variant,
        zone_id: fx.zone,
        qty,
        unit_id: fx.unit,
        origin_entry: None,
        revision_id: None,
    };
    fx.service.finish_revision(fx.tenant, finish(3.0)).unwrap();
    fx.tick();
    let latest = fx.service.finish_revision(fx.tenant, finish(4.0)).unwrap();
    let planned = fx
        .service
        .plan_revision(
            fx.tenant,
            PlanRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                planned_on: start() + Duration::days(3),
                origin_entry: None,
            },
        )
        .unwrap();

    let map = fx.service.zone_stock_map(fx.tenant, fx.zone).unwrap();
    assert_eq!(map.variants_count, 1);
    assert_eq!(map.variants.len(), 1);
    let row = &map.variants[0];
    assert_eq!(row.variant_id, fx.variant);
    assert_eq!(row.product_id, product);
    assert_eq!(row.open_revisions.len(), 1);
    assert_eq!(row.open_revisions[0].id(), planned.id());
    assert_eq!(row.last_finished_revision.as_ref().map(|r| r.id()), Some(latest.id()));

    assert_eq!(map.sub_zones.len(), 1);
    assert_eq!(map.sub_zones[0].zone_id, shelf);
    assert_eq!(map.sub_zones[0].parent_id, Some(fx.zone));
    assert_eq!(map.sub_zones[0].variants_count, 1);
    assert!(map.sub_zones[0].variants.is_empty());

    let finished = fx
        .service
        .zone_revisions_by_state(fx.tenant, fx.zone, &[RevisionState::Finished])
        .unwrap();
    assert_eq!(finished.len(), 2);
    assert_eq!(fx.service.zone_revisions_by_state(fx.tenant, fx.zone, &[]).unwrap().len(), 3);
    assert!(fx.service.zone_revisions_by_state(fx.tenant, shelf, &[]).unwrap().is_empty());

    let warehouse = fx.catalog.zone(fx.tenant, fx.zone).unwrap().warehouse_id;
    let stock = fx.service.warehouse_stock_map(fx.tenant, warehouse).unwrap();
    assert_eq!(stock.zones.len(), 1);
    assert_eq!(stock.zones[0], map);

    assert_eq!(
        fx.service.zone_stock_map(TenantId::new(), fx.zone).unwrap_err(),
        LedgerError::NotFound("warehouse zone")
    );
}

#[test]
fn finishing_a_planned_revision_snapshots_the_cached_balance() {
    let fx = fixture();
    fx.add(2.0, fx.case);
    fx.service.refresh_cached_balance(fx.tenant, fx.variant).unwrap();
    let planned = fx
        .service
        .plan_revision(
            fx.tenant,
            PlanRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                planned_on: start() + Duration::days(1),
                origin_entry: None,
            },
        )
        .unwrap();
    fx.clock.advance(Duration::days(1));

    let finished = fx
        .service
        .finish_revision(
            fx.tenant,
            FinishRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                qty: 23.0,
                unit_id: fx.unit,
                origin_entry: None,
                revision_id: Some(planned.id()),
            },
        )
        .unwrap();

    assert_eq!(finished.id(), planned.id());
    assert_eq!(finished.state(), RevisionState::Finished);
    assert_eq!(finished.recalculated_at(), Some(fx.clock_now()));
    let snapshot = finished.snapshot().unwrap();
    assert_eq!(snapshot.current_qty, Some(24.0));
    assert_eq!(snapshot.default_unit, Some(fx.unit));

    let last = fx
        .service
        .last_finished_revision(fx.tenant, fx.variant, fx.zone)
        .unwrap()
        .unwrap();
    assert_eq!(last.id(), planned.id());

    // A finished revision is not reused by the next plan.
    let next = fx
        .service
        .plan_revision(
            fx.tenant,
            PlanRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                planned_on: start() + Duration::days(30),
                origin_entry: None,
            },
        )
        .unwrap();
    assert_ne!(next.id(), planned.id());
    let planned_only = fx
        .service
        .zone_revisions(
            fx.tenant,
            fx.variant,
            RevisionQuery {
                zone_id: Some(fx.zone),
                states: vec![RevisionState::Planned],
            },
        )
        .unwrap();
    assert_eq!(planned_only.len(), 1);
    assert_eq!(planned_only[0].id(), next.id());
}

#[test]
fn finishing_a_revision_of_another_variant_is_not_found() {
    let fx = fixture();
    let product = fx.catalog.variant(fx.tenant, fx.variant).unwrap().product_id;
    let other = fx.catalog.add_variant(fx.tenant, product, None).unwrap();
    let planned = fx
        .service
        .plan_revision(
            fx.tenant,
            PlanRevision {
                variant_id: other,
                zone_id: fx.zone,
                planned_on: start(),
                origin_entry: None,
            },
        )
        .unwrap();

    let err = fx
        .service
        .finish_revision(
            fx.tenant,
            FinishRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                qty: 1.0,
                unit_id: fx.unit,
                origin_entry: None,
                revision_id: Some(planned.id()),
            },
        )
        .unwrap_err();
    assert_eq!(err, LedgerError::NotFound("revision"));
}

#[test]
fn deleting_a_revision_emits_an_audit_record() {
    let fx = fixture();
    let revision = fx
        .service
        .finish_revision(
            fx.tenant,
            FinishRevision {
                variant_id: fx.variant,
                zone_id: fx.zone,
                qty: 0.0,
                unit_id: fx.unit,
                origin_entry: None,
                revision_id: None,
            },
        )
        .unwrap();
    let sub = fx.bus.subscribe();

    fx.service.delete_revision(fx.tenant, revision.id()).unwrap();
    let events = payloads(&sub);
    assert!(matches!(
        events.as_slice(),
        [StockEvent::Audit(a)] if a.kind == AuditKind::StockRevision
    ));
    assert_eq!(
        fx.service.delete_revision(fx.tenant, revision.id()).unwrap_err(),
        LedgerError::NotFound("revision")
    );
}

// ---------------------------------------------------------------------------
// Tenant isolation
// ---------------------------------------------------------------------------

#[test]
fn other_tenants_cannot_see_or_touch_the_ledger() {
    let fx = fixture();
    let entry = fx.add(5.0, fx.unit);
    let hold = fx.reserve(1.0, "C", None).unwrap();
    let stranger = TenantId::new();

    assert_eq!(
        fx.service
            .get_balance(stranger, BalanceSubject::Variant(fx.variant), Some(fx.unit))
            .unwrap_err(),
        LedgerError::NotFound("variant")
    );
    assert_eq!(
        fx.service
            .get_balance(stranger, BalanceSubject::Entry(entry.id()), Some(fx.unit))
            .unwrap_err(),
        LedgerError::NotFound("ledger entry")
    );
    assert_eq!(
        fx.service.revert_entry(stranger, entry.id()).unwrap_err(),
        LedgerError::NotFound("ledger entry")
    );
    assert_eq!(
        fx.service
            .release_reservation(stranger, ReleaseTarget::Reservation(hold[0].id()))
            .unwrap_err(),
        LedgerError::NotFound("reservation")
    );
    assert!(matches!(
        fx.service.multiplier(stranger, fx.case, fx.unit),
        Err(LedgerError::MissingConversion { .. })
    ));

    // Registering a unit under another tenant's id is refused.
    assert_eq!(
        fx.service
            .register_unit(stranger, Unit::standard(fx.tenant, "crate"))
            .unwrap_err(),
        LedgerError::NotFound("unit")
    );
    assert!(close(fx.balance().balance.value, 5.0));
}

#[test]
fn origin_entries_must_belong_to_the_variant() {
    let fx = fixture();
    let product = fx.catalog.variant(fx.tenant, fx.variant).unwrap().product_id;
    let other = fx.catalog.add_variant(fx.tenant, product, None).unwrap();
    let foreign = fx.add(1.0, fx.unit);

    let err = fx
        .service
        .add_stock(
            fx.tenant,
            AddStock {
                variant_id: other,
                unit_id: fx.unit,
                zone_id: fx.zone,
                qty: 1.0,
                price: 0,
                external_item_id: None,
                external_cart_id: None,
                origin_entry: Some(foreign.id()),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_deductions_never_oversell() {
    let fx = fixture();
    fx.add(10.0, fx.unit);

    let results: Vec<LedgerResult<DeductionOutcome>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| fx.deduct(-2.0, None, None)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
        .count();
    assert_eq!(ok, 5);
    assert_eq!(short, 3);
    assert!(close(fx.balance().balance.value, 0.0));
}

#[test]
fn concurrent_holds_and_deductions_share_the_same_stock() {
    let fx = fixture();
    fx.add(6.0, fx.unit);

    thread::scope(|scope| {
        for i in 0..6 {
            let fx = &fx;
            scope.spawn(move || {
                if i % 2 == 0 {
                    let _ = fx.reserve(2.0, &format!("cart-{i}"), None);
                } else {
                    let _ = fx.deduct(-2.0, None, None);
                }
            });
        }
    });

    let report = fx.balance();
    assert!(report.available() >= -1e-9);
    assert!(report.balance.value >= -1e-9);
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[test]
fn balance_refresher_keeps_the_catalog_current() {
    let fx = fixture();
    let handle = BalanceRefresher::spawn(fx.service.clone(), Some(fx.tenant));

    fx.add(2.0, fx.case);
    let cached = || fx.catalog.variant(fx.tenant, fx.variant).unwrap();
    assert!(wait_for(|| cached().on_stock == Some(24.0)));

    fx.reserve(6.0, "cart1", None).unwrap();
    assert!(wait_for(|| cached().reserved == Some(6.0)));

    fx.deduct(-6.0, None, Some("cart1")).unwrap();
    assert!(wait_for(|| cached().on_stock == Some(18.0) && cached().reserved == Some(0.0)));

    handle.shutdown();
}

#[test]
fn balance_refresher_ignores_audit_records() {
    let fx = fixture();
    let refresher = BalanceRefresher::new(fx.service.clone());
    let sub = fx.bus.subscribe();
    fx.add(1.0, fx.unit);

    let handled: Vec<bool> = sub
        .drain()
        .iter()
        .map(|env| refresher.handle(env).unwrap())
        .collect();
    assert_eq!(handled, vec![false, true]);
    assert_eq!(
        fx.catalog.variant(fx.tenant, fx.variant).unwrap().on_stock,
        Some(1.0)
    );
}

#[test]
fn sweeper_releases_expired_holds_in_the_background() {
    let fx = fixture();
    fx.add(5.0, fx.unit);
    fx.reserve(5.0, "C", Some(start() + Duration::minutes(1))).unwrap();
    fx.clock.advance(Duration::minutes(2));

    let handle = ReservationSweeper::spawn(
        fx.service.clone(),
        SweeperConfig::default()
            .with_interval(StdDuration::from_millis(10))
            .with_name("test-sweeper"),
    );
    assert!(wait_for(|| handle.stats().released >= 1));
    let stats = handle.stats();
    assert!(stats.runs >= 1);
    assert_eq!(stats.failures, 0);
    assert!(stats.last_run_at.is_some());
    handle.shutdown();

    assert!(fx.store.reservations_for_variant(fx.tenant, fx.variant).unwrap().is_empty());
}

#[test]
fn sweeper_config_follows_the_ledger_config() {
    let config = LedgerConfig {
        sweep_interval_secs: 5,
        ..LedgerConfig::default()
    };
    let sweeper = SweeperConfig::from(&config);
    assert_eq!(sweeper.interval, StdDuration::from_secs(5));
    assert_eq!(sweeper.name, "stock-reservation-sweeper");
}
