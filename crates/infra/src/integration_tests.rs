//! Integration tests for the full posting pipeline.
//!
//! Tests: Service → UnitOfWorkManager → InMemoryStore (locks, buffered
//! writes) → Stock / Movement / Ledger → Reconciliation, Audit
//!
//! Verifies:
//! - Scenarios A-D (inbound, outbound, overdraw, production)
//! - Failed operations leave no rows behind
//! - Concurrent outbounds never oversell
//! - Concurrent priced receipts blend cost in journal order
//! - Journal timestamps follow lock order
//! - Out-of-range quantities fail cleanly
//! - Overlapping productions do not deadlock
//! - A cancelled operation writes nothing
//! - Replaying the journal always reproduces the projection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use stockledger_core::{BinId, ItemId, Money, MovementId, Quantity, WarehouseId};
use stockledger_inventory::{
    Bin, Item, ItemUpdate, LedgerEntry, MovementRequest, NewItem, StockKey, Warehouse,
    verify_chain, weighted_average_cost,
};
use stockledger_production::{BillOfMaterials, NewBom, NewBomComponent};

use crate::audit::{AuditQueue, AuditSink, InMemoryAuditWriter, NullAuditSink};
use crate::config::AuditConfig;
use crate::context::OperationContext;
use crate::services::{
    CatalogService, LedgerError, ProductionService, ReconciliationService, StockMovementService,
};
use crate::store::{InMemoryStore, StockRepository, Store, UnitOfWorkManager};

struct Harness {
    store: Arc<InMemoryStore>,
    catalog: CatalogService<InMemoryStore>,
    movements: StockMovementService<InMemoryStore>,
    production: ProductionService<InMemoryStore>,
    reconciliation: ReconciliationService<InMemoryStore>,
    ctx: OperationContext,
}

impl Harness {
    fn new() -> Self {
        Self::build(InMemoryStore::new(), Arc::new(NullAuditSink))
    }

    fn build(store: InMemoryStore, audit: Arc<dyn AuditSink>) -> Self {
        let store = Arc::new(store);
        let uow = UnitOfWorkManager::new(Arc::clone(&store));
        Self {
            catalog: CatalogService::new(uow.clone(), Arc::clone(&audit)),
            movements: StockMovementService::new(uow.clone(), Arc::clone(&audit)),
            production: ProductionService::new(uow.clone(), audit),
            reconciliation: ReconciliationService::new(uow),
            store,
            ctx: OperationContext::system(),
        }
    }

    async fn storable(&self, name: &str, cost: Money) -> Item {
        self.catalog
            .create_item(&self.ctx, NewItem::storable(name, cost))
            .await
            .unwrap()
    }

    async fn warehouse(&self, name: &str) -> Warehouse {
        self.catalog.create_warehouse(&self.ctx, name).await.unwrap()
    }

    async fn bin(&self, warehouse: WarehouseId, name: &str) -> Bin {
        self.catalog.create_bin(&self.ctx, warehouse, name).await.unwrap()
    }

    async fn bom(&self, product: ItemId, lines: &[(ItemId, Quantity)]) -> BillOfMaterials {
        let components = lines
            .iter()
            .map(|(id, qty)| NewBomComponent::new(*id, *qty, "pcs"))
            .collect();
        self.catalog
            .create_bom(
                &self.ctx,
                NewBom {
                    product_id: product,
                    name: "recipe".to_string(),
                    components,
                },
            )
            .await
            .unwrap()
    }

    async fn post(&self, request: MovementRequest) -> Result<(), LedgerError> {
        self.movements
            .create_stock_movement(&self.ctx, request)
            .await
            .map(|_| ())
    }

    async fn quantity(&self, key: StockKey) -> Decimal {
        match self.movements.get_stock(key).await {
            Ok(stock) => stock.quantity,
            Err(LedgerError::NotFound { .. }) => Decimal::ZERO,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[tokio::test]
async fn scenario_a_first_inbound_creates_stock() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    h.post(MovementRequest::inbound(key, dec!(100))).await.unwrap();

    assert_eq!(h.quantity(key).await, dec!(100));
    let journal = h.movements.ledger(key).await.unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].quantity_before, dec!(0));
    assert_eq!(journal[0].quantity_after, dec!(100));
}

#[tokio::test]
async fn scenario_b_outbound_reduces_stock() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    h.post(MovementRequest::inbound(key, dec!(100))).await.unwrap();
    h.post(MovementRequest::outbound(key, dec!(30))).await.unwrap();

    assert_eq!(h.quantity(key).await, dec!(70));
    let journal = h.movements.ledger(key).await.unwrap();
    assert_eq!(journal[1].quantity_before, dec!(100));
    assert_eq!(journal[1].quantity_after, dec!(70));
    assert!(verify_chain(&journal).is_ok());
}

#[tokio::test]
async fn scenario_c_overdraw_changes_nothing() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);
    h.post(MovementRequest::inbound(key, dec!(10))).await.unwrap();
    let before = h.store.counts().unwrap();

    let err = h
        .post(MovementRequest::outbound(key, dec!(30)))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LedgerError::InsufficientStock {
            item_id: item.id,
            available: dec!(10),
            requested: dec!(30),
        }
    );
    assert_eq!(h.quantity(key).await, dec!(10));
    assert_eq!(h.store.counts().unwrap(), before);
}

#[tokio::test]
async fn scenario_d_production_consumes_components() {
    let h = Harness::new();
    let product = h.storable("Widget", dec!(0)).await;
    let component = h.storable("Gear", dec!(1.25)).await;
    let warehouse = h.warehouse("Main").await;
    let bom = h.bom(product.id, &[(component.id, dec!(2))]).await;
    let component_key = StockKey::unbinned(component.id, warehouse.id);
    h.post(MovementRequest::inbound(component_key, dec!(100)))
        .await
        .unwrap();

    let outcome = h
        .production
        .produce_item(&h.ctx, bom.id, warehouse.id, dec!(10))
        .await
        .unwrap();

    assert_eq!(h.quantity(component_key).await, dec!(80));
    assert_eq!(
        h.quantity(StockKey::unbinned(product.id, warehouse.id)).await,
        dec!(10)
    );
    assert_eq!(outcome.record.produced_quantity, dec!(10));
    assert_eq!(outcome.actual_cost(), dec!(25));
    assert_eq!(h.store.counts().unwrap().productions, 1);
}

#[tokio::test]
async fn estimate_matches_the_run_it_predicts() {
    let h = Harness::new();
    let product = h.storable("Widget", dec!(0)).await;
    let gear = h.storable("Gear", dec!(1.25)).await;
    let spring = h.storable("Spring", dec!(0.1)).await;
    let warehouse = h.warehouse("Main").await;
    let bom = h
        .bom(product.id, &[(gear.id, dec!(2)), (spring.id, dec!(3))])
        .await;
    for item in [gear.id, spring.id] {
        h.post(MovementRequest::inbound(
            StockKey::unbinned(item, warehouse.id),
            dec!(50),
        ))
        .await
        .unwrap();
    }

    let estimate = h
        .production
        .estimate_cost(bom.id, warehouse.id, dec!(7))
        .await
        .unwrap();
    assert!(estimate.is_feasible());

    let outcome = h
        .production
        .produce_item(&h.ctx, bom.id, warehouse.id, dec!(7))
        .await
        .unwrap();
    assert_eq!(outcome.actual_cost(), estimate.total_cost());
    assert_eq!(outcome.consumed.len(), 2);
}

#[tokio::test]
async fn production_with_one_short_component_is_all_or_nothing() {
    let h = Harness::new();
    let product = h.storable("Widget", dec!(0)).await;
    let plenty = h.storable("Gear", dec!(1)).await;
    let scarce = h.storable("Spring", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let bom = h
        .bom(product.id, &[(plenty.id, dec!(1)), (scarce.id, dec!(1))])
        .await;
    let plenty_key = StockKey::unbinned(plenty.id, warehouse.id);
    let scarce_key = StockKey::unbinned(scarce.id, warehouse.id);
    h.post(MovementRequest::inbound(plenty_key, dec!(100))).await.unwrap();
    h.post(MovementRequest::inbound(scarce_key, dec!(4))).await.unwrap();
    let before = h.store.counts().unwrap();

    let err = h
        .production
        .produce_item(&h.ctx, bom.id, warehouse.id, dec!(5))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientStock { item_id, .. } if item_id == scarce.id));
    assert_eq!(h.store.counts().unwrap(), before);
    assert_eq!(h.quantity(plenty_key).await, dec!(100));
    assert_eq!(h.quantity(scarce_key).await, dec!(4));
    assert_eq!(
        h.quantity(StockKey::unbinned(product.id, warehouse.id)).await,
        dec!(0)
    );
}

#[tokio::test]
async fn inactive_locations_reject_movements() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let bin = h.bin(warehouse.id, "A-1").await;

    h.catalog
        .set_bin_active(&h.ctx, bin.id, false)
        .await
        .unwrap();
    let err = h
        .post(MovementRequest::inbound(
            StockKey::new(item.id, warehouse.id, Some(bin.id)),
            dec!(1),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Inactive { resource: "bin", .. }));

    h.catalog
        .set_warehouse_active(&h.ctx, warehouse.id, false)
        .await
        .unwrap();
    let err = h
        .post(MovementRequest::inbound(
            StockKey::unbinned(item.id, warehouse.id),
            dec!(1),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Inactive { resource: "warehouse", .. }));
    assert_eq!(h.store.counts().unwrap().movements, 0);
}

#[tokio::test]
async fn bins_and_the_no_bin_slot_are_separate_rows() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let bin = h.bin(warehouse.id, "A-1").await;
    let binned = StockKey::new(item.id, warehouse.id, Some(bin.id));
    let loose = StockKey::unbinned(item.id, warehouse.id);

    h.post(MovementRequest::inbound(binned, dec!(5))).await.unwrap();
    h.post(MovementRequest::inbound(loose, dec!(2))).await.unwrap();

    assert_eq!(h.quantity(binned).await, dec!(5));
    assert_eq!(h.quantity(loose).await, dec!(2));
    assert_eq!(h.movements.stock_for_item(item.id).await.unwrap().len(), 2);

    let err = h
        .post(MovementRequest::inbound(
            StockKey::new(item.id, warehouse.id, Some(BinId::new())),
            dec!(1),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { resource: "bin", .. }));
}

#[tokio::test]
async fn service_items_and_bad_requests_are_invalid_input() {
    let h = Harness::new();
    let labour = h
        .catalog
        .create_item(&h.ctx, NewItem::service("Assembly", dec!(40)))
        .await
        .unwrap();
    let bolt = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;

    let err = h
        .post(MovementRequest::inbound(
            StockKey::unbinned(labour.id, warehouse.id),
            dec!(1),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));

    let key = StockKey::unbinned(bolt.id, warehouse.id);
    for request in [
        MovementRequest::inbound(key, dec!(0)),
        MovementRequest::inbound(key, dec!(-3)),
        MovementRequest::outbound(key, dec!(1)).with_unit_price(dec!(2)),
        MovementRequest::inbound(key, dec!(1)).with_unit_price(dec!(-2)),
    ] {
        let err = h.post(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)), "{err}");
    }
    assert_eq!(h.store.counts().unwrap().movements, 0);
}

#[tokio::test]
async fn inactive_item_rejects_movements() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    h.catalog
        .update_item(
            &h.ctx,
            item.id,
            ItemUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = h
        .post(MovementRequest::inbound(
            StockKey::unbinned(item.id, warehouse.id),
            dec!(1),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Inactive { resource: "item", .. }));
}

#[tokio::test]
async fn average_cost_blends_receipts_across_locations() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(4)).await;
    let north = h.warehouse("North").await;
    let south = h.warehouse("South").await;

    h.post(
        MovementRequest::inbound(StockKey::unbinned(item.id, north.id), dec!(10))
            .with_unit_price(dec!(4)),
    )
    .await
    .unwrap();
    h.post(
        MovementRequest::inbound(StockKey::unbinned(item.id, south.id), dec!(30))
            .with_unit_price(dec!(8)),
    )
    .await
    .unwrap();

    // (10 × 4 + 30 × 8) / 40
    let item = h.catalog.get_item(item.id).await.unwrap();
    assert_eq!(item.average_cost, dec!(7));
    assert_eq!(item.cost_price, dec!(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_outbounds_never_oversell() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);
    h.post(MovementRequest::inbound(key, dec!(15))).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let movements = h.movements.clone();
        let ctx = h.ctx;
        tasks.push(tokio::spawn(async move {
            movements
                .create_stock_movement(&ctx, MovementRequest::outbound(key, dec!(10)))
                .await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { available, .. }) => {
                assert_eq!(available, dec!(5));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(h.quantity(key).await, dec!(5));
    assert!(h.reconciliation.reconcile(key).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_productions_do_not_deadlock() {
    let h = Harness::build(
        InMemoryStore::with_lock_timeout(Duration::from_secs(2)),
        Arc::new(NullAuditSink),
    );
    let a = h.storable("A", dec!(1)).await;
    let b = h.storable("B", dec!(2)).await;
    let first = h.storable("First", dec!(0)).await;
    let second = h.storable("Second", dec!(0)).await;
    let warehouse = h.warehouse("Main").await;
    // Same components, listed in opposite orders.
    let bom_one = h.bom(first.id, &[(a.id, dec!(1)), (b.id, dec!(1))]).await;
    let bom_two = h.bom(second.id, &[(b.id, dec!(1)), (a.id, dec!(1))]).await;
    for item in [a.id, b.id] {
        h.post(MovementRequest::inbound(
            StockKey::unbinned(item, warehouse.id),
            dec!(1000),
        ))
        .await
        .unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..20 {
        let production = h.production.clone();
        let ctx = h.ctx;
        let bom = if i % 2 == 0 { bom_one.id } else { bom_two.id };
        let warehouse = warehouse.id;
        tasks.push(tokio::spawn(async move {
            production.produce_item(&ctx, bom, warehouse, dec!(1)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.quantity(StockKey::unbinned(a.id, warehouse.id)).await, dec!(980));
    assert_eq!(h.quantity(StockKey::unbinned(b.id, warehouse.id)).await, dec!(980));
    assert_eq!(h.store.counts().unwrap().productions, 20);
    for report in h.reconciliation.reconcile_item(a.id).await.unwrap() {
        assert!(report.is_consistent());
    }
}

#[tokio::test]
async fn cancelled_movement_writes_nothing() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    // Another unit of work holds the stock row.
    let mut holder = h.store.begin().await.unwrap();
    holder.lock_stock(key).await.unwrap();

    let attempt = tokio::time::timeout(
        Duration::from_millis(50),
        h.movements
            .create_stock_movement(&h.ctx, MovementRequest::inbound(key, dec!(5))),
    )
    .await;
    assert!(attempt.is_err());
    drop(holder);

    assert_eq!(h.store.counts().unwrap().movements, 0);
    h.post(MovementRequest::inbound(key, dec!(5))).await.unwrap();
    assert_eq!(h.quantity(key).await, dec!(5));
}

#[tokio::test]
async fn lock_timeout_surfaces_as_retryable_storage_failure() {
    let h = Harness::build(
        InMemoryStore::with_lock_timeout(Duration::from_millis(20)),
        Arc::new(NullAuditSink),
    );
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_stock(key).await.unwrap();

    let err = h.post(MovementRequest::inbound(key, dec!(1))).await.unwrap_err();
    assert!(matches!(err, LedgerError::StorageFailure(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn audit_records_only_committed_operations() {
    let writer = InMemoryAuditWriter::new();
    let (queue, worker) = AuditQueue::start(writer.clone(), &AuditConfig::default());
    let h = Harness::build(InMemoryStore::new(), Arc::new(queue));

    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);
    h.post(MovementRequest::inbound(key, dec!(3))).await.unwrap();
    h.post(MovementRequest::outbound(key, dec!(9))).await.unwrap_err();

    let outcome = worker.shutdown(Duration::from_secs(5)).await;
    assert!(outcome.drained);

    let records = writer.records();
    let movements: Vec<_> = records
        .iter()
        .filter(|r| r.resource == "stock_movement")
        .collect();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].correlation_id, h.ctx.correlation_id);
    assert!(records.iter().any(|r| r.resource == "item"));
    assert!(records.iter().any(|r| r.resource == "warehouse"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_priced_receipts_blend_cost_in_journal_order() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(5)).await;
    let north = h.warehouse("North").await;
    let south = h.warehouse("South").await;
    let north_key = StockKey::unbinned(item.id, north.id);
    let south_key = StockKey::unbinned(item.id, south.id);

    let mut tasks = Vec::new();
    for i in 0..24u32 {
        let movements = h.movements.clone();
        let ctx = h.ctx;
        let request = if i % 3 == 2 {
            MovementRequest::inbound(south_key, Decimal::from(i + 1))
        } else {
            MovementRequest::inbound(north_key, Decimal::from(i % 7 + 1))
                .with_unit_price(Decimal::new(i64::from(100 + 37 * i), 2))
        };
        tasks.push(tokio::spawn(async move {
            movements.create_stock_movement(&ctx, request).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut prices: HashMap<MovementId, Option<Money>> = HashMap::new();
    let mut journal: Vec<LedgerEntry> = Vec::new();
    for key in [north_key, south_key] {
        for movement in h.movements.movement_history(key).await.unwrap() {
            prices.insert(movement.id, movement.unit_price);
        }
        let mut entries = h.movements.ledger(key).await.unwrap();
        entries.sort_by_key(|e| e.recorded_at);
        assert!(verify_chain(&entries).is_ok());
        journal.extend(entries);
    }
    assert_eq!(journal.len(), 24);

    // Replay serially in commit order.
    journal.sort_by_key(|e| e.sequence);
    let mut on_hand = Decimal::ZERO;
    let mut average = item.average_cost;
    for entry in &journal {
        if let Some(price) = prices[&entry.movement_id] {
            average = weighted_average_cost(on_hand, average, entry.quantity_change, price).unwrap();
        }
        on_hand += entry.quantity_change;
    }

    let item = h.catalog.get_item(item.id).await.unwrap();
    assert_eq!(item.average_cost, average);
    assert_eq!(h.quantity(north_key).await + h.quantity(south_key).await, on_hand);

    let reports = h.reconciliation.reconcile_item(item.id).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_consistent()));
}

#[tokio::test]
async fn entries_are_stamped_once_the_row_lock_is_granted() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_stock(key).await.unwrap();

    let movements = h.movements.clone();
    let ctx = h.ctx;
    let waiting = tokio::spawn(async move {
        movements
            .create_stock_movement(
                &ctx,
                MovementRequest::inbound(key, dec!(10)).with_unit_price(dec!(2)),
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let released_at = Utc::now();
    drop(holder);
    let movement = waiting.await.unwrap().unwrap();

    h.post(MovementRequest::inbound(key, dec!(5))).await.unwrap();

    let journal = h.movements.ledger(key).await.unwrap();
    assert!(journal[0].recorded_at >= released_at);
    assert_eq!(journal[0].recorded_at, movement.created_at);
    assert!(journal[0].recorded_at <= journal[1].recorded_at);
}

#[tokio::test]
async fn out_of_range_quantities_fail_without_writing() {
    let h = Harness::new();
    let item = h.storable("Bolt", dec!(1)).await;
    let warehouse = h.warehouse("Main").await;
    let key = StockKey::unbinned(item.id, warehouse.id);

    let err = h
        .post(MovementRequest::inbound(key, Decimal::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)), "{err}");

    h.post(MovementRequest::inbound(key, dec!(99999999999999)))
        .await
        .unwrap();
    let before = h.store.counts().unwrap();

    let err = h.post(MovementRequest::inbound(key, dec!(1))).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)), "{err}");
    assert_eq!(h.store.counts().unwrap(), before);
    assert_eq!(h.quantity(key).await, dec!(99999999999999));

    let product = h.storable("Widget", dec!(0)).await;
    let bom = h.bom(product.id, &[(item.id, dec!(10000000000000))]).await;
    let err = h
        .production
        .produce_item(&h.ctx, bom.id, warehouse.id, dec!(10000000000000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)), "{err}");
    assert_eq!(h.store.counts().unwrap(), before);
}

#[derive(Debug, Clone)]
enum Op {
    In(u32),
    Out(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(1u32..50).prop_map(Op::In), (1u32..50).prop_map(Op::Out)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn journal_replay_reproduces_stock(ops in prop::collection::vec(op(), 1..25)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new();
            let item = h.storable("Bolt", dec!(1)).await;
            let warehouse = h.warehouse("Main").await;
            let key = StockKey::unbinned(item.id, warehouse.id);

            let mut expected = Decimal::ZERO;
            for op in ops {
                match op {
                    Op::In(q) => {
                        h.post(MovementRequest::inbound(key, Decimal::from(q))).await.unwrap();
                        expected += Decimal::from(q);
                    }
                    Op::Out(q) => {
                        let q = Decimal::from(q);
                        let result = h.post(MovementRequest::outbound(key, q)).await;
                        if q <= expected {
                            result.unwrap();
                            expected -= q;
                        } else {
                            let is_short = matches!(result, Err(LedgerError::InsufficientStock { .. }));
                            assert!(is_short);
                        }
                    }
                }
            }

            let report = h.reconciliation.reconcile(key).await.unwrap();
            assert!(report.is_consistent());
            assert_eq!(report.ledger_quantity, expected);
            assert!(report.stock_quantity >= Decimal::ZERO);
        });
    }
}
