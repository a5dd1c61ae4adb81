//! Storage abstraction.
//!
//! A [`Store`] hands out units of work. A unit of work is one backend
//! transaction; it implements every repository trait, so all reads and writes
//! made through it participate in the same atomic commit or rollback.
//!
//! ## Locking
//!
//! `lock_stock` and `lock_item` take an exclusive lock on the row;
//! `lock_item_shared` takes a shared one, which only conflicts with
//! `lock_item`. Locks are held until the unit of work commits or rolls back
//! and are reentrant within one unit of work, but a shared item lock cannot
//! be upgraded. Callers that need several locks must acquire them in the
//! global order:
//!
//! 1. item rows, in ascending [`ItemId`] order: exclusive for a movement
//!    with a unit price, shared for every other movement of the item
//! 2. stock rows, in ascending [`StockKey`] order
//!
//! Holding the item exclusively therefore freezes every stock row of that
//! item, including rows that do not exist yet.
//!
//! ## Dropping
//!
//! A unit of work dropped without `commit` rolls back and releases its locks.
//! That is how cancellation works: drop the future that owns it.

mod error;
pub mod in_memory;
pub mod postgres;
mod unit_of_work;

pub use error::{StoreError, StoreResult};
pub use in_memory::InMemoryStore;
pub use postgres::{PostgresStore, PostgresUnitOfWork};
pub use unit_of_work::UnitOfWorkManager;

use async_trait::async_trait;
use std::sync::Arc;

use stockledger_core::{BinId, BomId, ItemId, ProductionRecordId, WarehouseId};
use stockledger_inventory::{Bin, Item, LedgerEntry, Stock, StockKey, StockMovement, Warehouse};
use stockledger_production::{BillOfMaterials, ProductionRecord};

#[async_trait]
pub trait ItemRepository: Send {
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>>;

    /// Read the item and hold an exclusive lock on it.
    async fn lock_item(&mut self, id: ItemId) -> StoreResult<Option<Item>>;

    /// Read the item and hold a shared lock on it.
    async fn lock_item_shared(&mut self, id: ItemId) -> StoreResult<Option<Item>>;

    async fn insert_item(&mut self, item: &Item) -> StoreResult<()>;

    async fn update_item(&mut self, item: &Item) -> StoreResult<()>;
}

#[async_trait]
pub trait LocationRepository: Send {
    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>>;

    async fn list_warehouses(&mut self) -> StoreResult<Vec<Warehouse>>;

    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()>;

    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()>;

    async fn get_bin(&mut self, id: BinId) -> StoreResult<Option<Bin>>;

    async fn list_bins(&mut self, warehouse_id: WarehouseId) -> StoreResult<Vec<Bin>>;

    async fn insert_bin(&mut self, bin: &Bin) -> StoreResult<()>;

    async fn update_bin(&mut self, bin: &Bin) -> StoreResult<()>;
}

#[async_trait]
pub trait BomRepository: Send {
    async fn get_bom(&mut self, id: BomId) -> StoreResult<Option<BillOfMaterials>>;

    /// The bill of materials for a product: the newest active one, else the
    /// newest one.
    async fn get_bom_for_product(&mut self, product_id: ItemId)
    -> StoreResult<Option<BillOfMaterials>>;

    async fn insert_bom(&mut self, bom: &BillOfMaterials) -> StoreResult<()>;
}

#[async_trait]
pub trait StockRepository: Send {
    /// Plain read, no lock.
    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>>;

    /// Lock the stock row for `key` and return its current state.
    ///
    /// Returns `None` when no row exists yet; the key is locked all the same,
    /// so a concurrent first movement on it waits.
    async fn lock_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>>;

    async fn upsert_stock(&mut self, stock: &Stock) -> StoreResult<()>;

    /// Every stock row of an item, across warehouses and bins.
    async fn stock_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Stock>>;
}

#[async_trait]
pub trait MovementRepository: Send {
    async fn insert_movement(&mut self, movement: &StockMovement) -> StoreResult<()>;

    /// Movements of one key in creation order.
    async fn movements_for(&mut self, key: StockKey) -> StoreResult<Vec<StockMovement>>;
}

#[async_trait]
pub trait LedgerRepository: Send {
    /// Append a journal entry. The referenced movement must exist.
    async fn append_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Journal of one key in journal order.
    async fn ledger_for(&mut self, key: StockKey) -> StoreResult<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait ProductionRepository: Send {
    async fn insert_production(&mut self, record: &ProductionRecord) -> StoreResult<()>;

    async fn get_production(
        &mut self,
        id: ProductionRecordId,
    ) -> StoreResult<Option<ProductionRecord>>;
}

/// One atomic unit of work (a backend transaction).
#[async_trait]
pub trait UnitOfWork:
    ItemRepository
    + LocationRepository
    + BomRepository
    + StockRepository
    + MovementRepository
    + LedgerRepository
    + ProductionRepository
    + Send
    + Sized
    + 'static
{
    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// A backend that can open units of work.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: UnitOfWork;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Begin a read-only unit of work whose reads all see the data as it
    /// was committed when it began.
    async fn begin_snapshot(&self) -> StoreResult<Self::Tx>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store,
{
    type Tx = S::Tx;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        (**self).begin().await
    }

    async fn begin_snapshot(&self) -> StoreResult<Self::Tx> {
        (**self).begin_snapshot().await
    }
}
