//! Production from a bill of materials.
//!
//! A run debits every storable component and credits the product in one unit
//! of work. It first takes shared locks on the product and component items,
//! then locks all stock rows it touches before anything is written, in
//! ascending [`StockKey`](stockledger_inventory::StockKey) order,
//! so two runs sharing components can only queue behind each other. If any
//! component is short, the run fails with `InsufficientStock` for the first
//! short component (by item id) and writes nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};

use stockledger_core::{BomId, ItemId, Money, ProductionRecordId, Quantity, UserId, WarehouseId};
use stockledger_inventory::{MovementRequest, StockMovement};
use stockledger_production::{ProductionPlan, ProductionRecord, Shortfall};

use super::error::{LedgerError, require};
use super::stock_movement::post_movement;
use crate::audit::{AuditRecord, AuditSink};
use crate::context::OperationContext;
use crate::store::{
    BomRepository, ItemRepository, LocationRepository, ProductionRepository, StockRepository,
    Store, UnitOfWork, UnitOfWorkManager,
};

/// Result of a successful production run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionOutcome {
    pub record: ProductionRecord,
    /// One OUT movement per storable component, in item id order.
    pub consumed: Vec<StockMovement>,
    /// The IN movement of the product.
    pub output: StockMovement,
}

impl ProductionOutcome {
    pub fn record_id(&self) -> ProductionRecordId {
        self.record.id
    }

    pub fn actual_cost(&self) -> Money {
        self.record.actual_cost
    }
}

/// What a run would consume and cost right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionEstimate {
    pub plan: ProductionPlan,
    /// Components the warehouse cannot cover at the moment.
    pub shortfalls: Vec<Shortfall>,
}

impl ProductionEstimate {
    pub fn total_cost(&self) -> Money {
        self.plan.actual_cost
    }

    pub fn is_feasible(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

/// How `load_plan` reads the items involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemAccess {
    Read,
    /// Shared item locks, taken in ascending item id order.
    Lock,
}

async fn load_plan<T: UnitOfWork>(
    tx: &mut T,
    bom_id: BomId,
    warehouse_id: WarehouseId,
    quantity: Quantity,
    access: ItemAccess,
) -> Result<ProductionPlan, LedgerError> {
    let bom = require(tx.get_bom(bom_id).await?, "bill of materials", bom_id)?;
    bom.ensure_active()?;

    let warehouse = require(tx.get_warehouse(warehouse_id).await?, "warehouse", warehouse_id)?;
    warehouse.ensure_accepts_movements()?;

    let item_ids: BTreeSet<ItemId> = bom
        .active_components()
        .map(|c| c.component_item_id)
        .chain(std::iter::once(bom.product_id))
        .collect();
    let mut product = None;
    let mut components = Vec::with_capacity(item_ids.len());
    for id in item_ids {
        let item = match access {
            ItemAccess::Read => tx.get_item(id).await?,
            ItemAccess::Lock => tx.lock_item_shared(id).await?,
        };
        // Missing components surface as NotFound from the planner.
        match item {
            Some(item) if id == bom.product_id => product = Some(item),
            Some(item) => components.push(item),
            None => {}
        }
    }
    let product = require(product, "item", bom.product_id)?;

    Ok(ProductionPlan::build(
        &bom,
        &product,
        &components,
        warehouse_id,
        quantity,
    )?)
}

async fn produce_in_tx<T: UnitOfWork>(
    tx: &mut T,
    bom_id: BomId,
    warehouse_id: WarehouseId,
    quantity: Quantity,
    actor: UserId,
) -> Result<ProductionOutcome, LedgerError> {
    let plan = load_plan(tx, bom_id, warehouse_id, quantity, ItemAccess::Lock).await?;

    let mut on_hand: HashMap<ItemId, Quantity> = HashMap::new();
    for key in plan.lock_keys() {
        let quantity = tx
            .lock_stock(key)
            .await?
            .map(|stock| stock.quantity)
            .unwrap_or(Decimal::ZERO);
        on_hand.insert(key.item_id, quantity);
    }

    if let Some(short) = plan.shortfalls(&on_hand).into_iter().next() {
        return Err(LedgerError::InsufficientStock {
            item_id: short.item_id,
            available: short.available,
            requested: short.required,
        });
    }

    // Every row is held from here on.
    let now = Utc::now();
    let record = ProductionRecord::from_plan(&plan, actor, now);
    let reason = format!("production {}", record.id);

    let mut consumed = Vec::new();
    for requirement in plan.stock_requirements() {
        let request =
            MovementRequest::outbound(plan.component_key(requirement.item_id), requirement.quantity)
                .with_reason(reason.clone())
                .with_happened_at(now);
        consumed.push(post_movement(tx, &request, actor).await?.movement);
    }

    let request = MovementRequest::inbound(plan.output_key(), plan.quantity)
        .with_reason(reason)
        .with_happened_at(now);
    let output = post_movement(tx, &request, actor).await?.movement;

    tx.insert_production(&record).await?;

    Ok(ProductionOutcome {
        record,
        consumed,
        output,
    })
}

async fn estimate_in_tx<T: UnitOfWork>(
    tx: &mut T,
    bom_id: BomId,
    warehouse_id: WarehouseId,
    quantity: Quantity,
) -> Result<ProductionEstimate, LedgerError> {
    let plan = load_plan(tx, bom_id, warehouse_id, quantity, ItemAccess::Read).await?;

    let keys: Vec<_> = plan
        .stock_requirements()
        .map(|r| plan.component_key(r.item_id))
        .collect();
    let mut on_hand: HashMap<ItemId, Quantity> = HashMap::new();
    for key in keys {
        if let Some(stock) = tx.get_stock(key).await? {
            on_hand.insert(key.item_id, stock.quantity);
        }
    }

    let shortfalls = plan.shortfalls(&on_hand);
    Ok(ProductionEstimate { plan, shortfalls })
}

/// Runs and estimates production.
pub struct ProductionService<S: Store> {
    uow: UnitOfWorkManager<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S: Store> Clone for ProductionService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: Store> ProductionService<S> {
    pub fn new(uow: UnitOfWorkManager<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { uow, audit }
    }

    /// Produce `quantity` units of the BOM's product into `warehouse_id`.
    ///
    /// All-or-nothing: component debits, product credit and the production
    /// record commit together or not at all.
    #[instrument(
        skip(self, ctx),
        fields(correlation_id = %ctx.correlation_id),
        err
    )]
    pub async fn produce_item(
        &self,
        ctx: &OperationContext,
        bom_id: BomId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> Result<ProductionOutcome, LedgerError> {
        let actor = ctx.user_id;
        let outcome = self
            .uow
            .run(move |tx| Box::pin(produce_in_tx(tx, bom_id, warehouse_id, quantity, actor)))
            .await?;

        info!(
            production_id = %outcome.record.id,
            actual_cost = %outcome.record.actual_cost,
            components = outcome.consumed.len(),
            "production completed"
        );
        self.audit.log(
            AuditRecord::new(ctx, "production_record", outcome.record.id, "create")
                .with_after(&outcome),
        );
        Ok(outcome)
    }

    /// Plan a run without locking or writing anything.
    #[instrument(skip(self), err)]
    pub async fn estimate_cost(
        &self,
        bom_id: BomId,
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> Result<ProductionEstimate, LedgerError> {
        self.uow
            .read(move |tx| Box::pin(estimate_in_tx(tx, bom_id, warehouse_id, quantity)))
            .await
    }

    pub async fn get_production(
        &self,
        id: ProductionRecordId,
    ) -> Result<ProductionRecord, LedgerError> {
        let record = self
            .uow
            .read(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.get_production(id).await?) })
            })
            .await?;
        require(record, "production record", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NullAuditSink;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use stockledger_inventory::{Item, NewItem, Stock, StockKey, Warehouse};
    use stockledger_production::{BillOfMaterials, NewBom, NewBomComponent};

    struct Fixture {
        service: ProductionService<InMemoryStore>,
        store: Arc<InMemoryStore>,
        warehouse: WarehouseId,
        bom: BomId,
        product: ItemId,
        component: ItemId,
        labour: ItemId,
    }

    /// P = 2 × C (cost 3) + 0.5 h labour (cost 40); 100 C on hand.
    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let product = Item::create(ItemId::new(), NewItem::storable("Table", dec!(0)), now).unwrap();
        let component = Item::create(ItemId::new(), NewItem::storable("Leg", dec!(3)), now).unwrap();
        let labour = Item::create(ItemId::new(), NewItem::service("Assembly", dec!(40)), now).unwrap();
        let warehouse = Warehouse::create(WarehouseId::new(), "Main", now).unwrap();
        let bom = BillOfMaterials::create(
            BomId::new(),
            NewBom {
                product_id: product.id,
                name: "Table".to_string(),
                components: vec![
                    NewBomComponent::new(component.id, dec!(2), "pcs"),
                    NewBomComponent::new(labour.id, dec!(0.5), "h"),
                ],
            },
            now,
        )
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        for item in [&product, &component, &labour] {
            tx.insert_item(item).await.unwrap();
        }
        tx.insert_warehouse(&warehouse).await.unwrap();
        tx.insert_bom(&bom).await.unwrap();
        tx.upsert_stock(&Stock::new(StockKey::unbinned(component.id, warehouse.id), dec!(100), now))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        Fixture {
            service: ProductionService::new(
                UnitOfWorkManager::new(Arc::clone(&store)),
                Arc::new(NullAuditSink),
            ),
            store,
            warehouse: warehouse.id,
            bom: bom.id,
            product: product.id,
            component: component.id,
            labour: labour.id,
        }
    }

    async fn quantity(store: &InMemoryStore, item: ItemId, warehouse: WarehouseId) -> Decimal {
        let mut tx = store.begin().await.unwrap();
        tx.get_stock(StockKey::unbinned(item, warehouse))
            .await
            .unwrap()
            .map(|s| s.quantity)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn run_debits_components_and_credits_product() {
        let f = fixture().await;
        let outcome = f
            .service
            .produce_item(&OperationContext::system(), f.bom, f.warehouse, dec!(10))
            .await
            .unwrap();

        assert_eq!(quantity(&f.store, f.component, f.warehouse).await, dec!(80));
        assert_eq!(quantity(&f.store, f.product, f.warehouse).await, dec!(10));
        assert_eq!(quantity(&f.store, f.labour, f.warehouse).await, dec!(0));

        // 10 × (2 × 3 + 0.5 × 40)
        assert_eq!(outcome.actual_cost(), dec!(260));
        assert_eq!(outcome.consumed.len(), 1);
        assert_eq!(outcome.record.produced_quantity, dec!(10));

        let stored = f.service.get_production(outcome.record_id()).await.unwrap();
        assert_eq!(stored, outcome.record);
    }

    #[tokio::test]
    async fn short_component_writes_nothing() {
        let f = fixture().await;
        let before = f.store.counts().unwrap();

        let err = f
            .service
            .produce_item(&OperationContext::system(), f.bom, f.warehouse, dec!(51))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                item_id: f.component,
                available: dec!(100),
                requested: dec!(102),
            }
        );
        assert_eq!(f.store.counts().unwrap(), before);
    }

    #[tokio::test]
    async fn estimate_reports_cost_and_shortfall_without_writing() {
        let f = fixture().await;
        let before = f.store.counts().unwrap();

        let estimate = f
            .service
            .estimate_cost(f.bom, f.warehouse, dec!(60))
            .await
            .unwrap();

        assert_eq!(estimate.total_cost(), dec!(1560));
        assert!(!estimate.is_feasible());
        assert_eq!(estimate.shortfalls[0].missing, dec!(20));
        assert_eq!(f.store.counts().unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_bom_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .produce_item(&OperationContext::system(), BomId::new(), f.warehouse, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { resource: "bill of materials", .. }));
    }
}
