//! Stock movement orchestration.
//!
//! Posting a movement is one unit of work:
//!
//! ```text
//! validate request
//!   ↓
//! lock item row (exclusive for a priced IN, shared otherwise)
//!   ↓
//! check item, warehouse, bin
//!   ↓
//! lock stock row → quantity before (0 if none)
//!   ↓
//! plan transition (OUT > before → InsufficientStock, nothing written)
//!   ↓
//! insert movement, upsert stock, append ledger entry
//!   ↓
//! (priced IN only) blend and persist the item's average cost
//!   ↓
//! commit → audit
//! ```

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, instrument};

use stockledger_core::decimal::checked_add;
use stockledger_core::{BinId, ItemId, Quantity, UserId, WarehouseId};
use stockledger_inventory::{
    Direction, LedgerEntry, MovementRequest, Stock, StockKey, StockMovement, plan_transition,
};

use super::error::{LedgerError, require};
use crate::audit::{AuditRecord, AuditSink};
use crate::context::OperationContext;
use crate::store::{
    ItemRepository, LedgerRepository, LocationRepository, MovementRepository, StockRepository,
    Store, UnitOfWork, UnitOfWorkManager,
};

/// The three rows one movement writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedMovement {
    pub movement: StockMovement,
    pub entry: LedgerEntry,
    pub stock: Stock,
}

/// Lock the stock row, apply the quantity change and write movement, stock
/// and ledger entry through `tx`.
///
/// Item and location checks are the caller's job. Relocking a key the unit
/// of work already holds is free, so production runs lock everything up
/// front and then post through here.
///
/// `recorded_at` is taken once the row lock is held, so per key it follows
/// journal order.
pub(crate) async fn post_movement<T: UnitOfWork>(
    tx: &mut T,
    request: &MovementRequest,
    actor: UserId,
) -> Result<PostedMovement, LedgerError> {
    let key = request.key();
    let before = tx
        .lock_stock(key)
        .await?
        .map(|stock| stock.quantity)
        .unwrap_or(Decimal::ZERO);
    let recorded_at = Utc::now();

    let transition = plan_transition(key, before, request.direction, request.quantity)?;
    let movement = StockMovement::from_request(request, actor, recorded_at);
    let entry = LedgerEntry::for_movement(&movement, &transition, actor, recorded_at)?;
    let stock = Stock::new(key, transition.after, recorded_at);

    tx.insert_movement(&movement).await?;
    tx.upsert_stock(&stock).await?;
    tx.append_ledger(&entry).await?;

    debug!(
        key = %key,
        direction = %request.direction,
        before = %transition.before,
        after = %transition.after,
        "movement posted"
    );

    Ok(PostedMovement {
        movement,
        entry,
        stock,
    })
}

/// The warehouse must exist and be active; so must the bin, if any, and it
/// must belong to the warehouse.
pub(crate) async fn ensure_location<T: UnitOfWork>(
    tx: &mut T,
    warehouse_id: WarehouseId,
    bin_id: Option<BinId>,
) -> Result<(), LedgerError> {
    let warehouse = require(tx.get_warehouse(warehouse_id).await?, "warehouse", warehouse_id)?;
    warehouse.ensure_accepts_movements()?;

    if let Some(bin_id) = bin_id {
        let bin = require(tx.get_bin(bin_id).await?, "bin", bin_id)?;
        bin.ensure_accepts_movements(warehouse_id)?;
    }
    Ok(())
}

async fn create_in_tx<T: UnitOfWork>(
    tx: &mut T,
    request: MovementRequest,
    actor: UserId,
) -> Result<PostedMovement, LedgerError> {
    let priced_receipt = request.direction == Direction::In && request.unit_price.is_some();

    // Exclusive: no other movement of the item runs while on-hand is summed.
    let item = if priced_receipt {
        tx.lock_item(request.item_id).await?
    } else {
        tx.lock_item_shared(request.item_id).await?
    };
    let mut item = require(item, "item", request.item_id)?;
    item.ensure_active()?;
    item.ensure_stock_tracked()?;

    ensure_location(tx, request.warehouse_id, request.bin_id).await?;

    let on_hand_before: Quantity = if priced_receipt {
        tx.stock_for_item(item.id)
            .await?
            .iter()
            .try_fold(Decimal::ZERO, |total, stock| {
                checked_add(total, stock.quantity, "on-hand quantity")
            })?
    } else {
        Decimal::ZERO
    };

    let posted = post_movement(tx, &request, actor).await?;

    if let (Direction::In, Some(unit_price)) = (request.direction, request.unit_price) {
        let average_cost = item.receive_at_price(
            on_hand_before,
            request.quantity,
            unit_price,
            posted.entry.recorded_at,
        )?;
        tx.update_item(&item).await?;
        debug!(item_id = %item.id, %average_cost, "average cost updated");
    }

    Ok(posted)
}

/// Posts stock movements and answers stock queries.
pub struct StockMovementService<S: Store> {
    uow: UnitOfWorkManager<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S: Store> Clone for StockMovementService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: Store> StockMovementService<S> {
    pub fn new(uow: UnitOfWorkManager<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { uow, audit }
    }

    /// Validate and post one movement atomically.
    ///
    /// On any error nothing is written: no movement, no stock change, no
    /// ledger entry, no cost update.
    #[instrument(
        skip(self, ctx, request),
        fields(
            item_id = %request.item_id,
            warehouse_id = %request.warehouse_id,
            bin_id = ?request.bin_id,
            direction = %request.direction,
            quantity = %request.quantity,
            correlation_id = %ctx.correlation_id,
        ),
        err
    )]
    pub async fn create_stock_movement(
        &self,
        ctx: &OperationContext,
        request: MovementRequest,
    ) -> Result<StockMovement, LedgerError> {
        request.validate()?;

        let actor = ctx.user_id;
        let posted = self
            .uow
            .run(move |tx| Box::pin(create_in_tx(tx, request, actor)))
            .await?;

        info!(
            movement_id = %posted.movement.id,
            quantity_after = %posted.stock.quantity,
            "stock movement created"
        );
        self.audit.log(
            AuditRecord::new(ctx, "stock_movement", posted.movement.id, "create")
                .with_after(&posted),
        );
        Ok(posted.movement)
    }

    /// Current stock of one key.
    pub async fn get_stock(&self, key: StockKey) -> Result<Stock, LedgerError> {
        let stock = self
            .uow
            .read(move |tx| Box::pin(async move { Ok::<_, LedgerError>(tx.get_stock(key).await?) }))
            .await?;
        require(stock, "stock", key)
    }

    /// Stock of an item across every warehouse and bin.
    pub async fn stock_for_item(&self, item_id: ItemId) -> Result<Vec<Stock>, LedgerError> {
        self.uow
            .read(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.stock_for_item(item_id).await?) })
            })
            .await
    }

    /// Movements of one key in creation order.
    pub async fn movement_history(&self, key: StockKey) -> Result<Vec<StockMovement>, LedgerError> {
        self.uow
            .read(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.movements_for(key).await?) })
            })
            .await
    }

    /// Journal of one key in journal order.
    pub async fn ledger(&self, key: StockKey) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.uow
            .read(move |tx| Box::pin(async move { Ok::<_, LedgerError>(tx.ledger_for(key).await?) }))
            .await
    }
}
