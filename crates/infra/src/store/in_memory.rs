//! In-memory store.
//!
//! Intended for tests and local development. It behaves like the Postgres
//! backend where correctness depends on it:
//!
//! - `lock_*` takes a real per-row lock (an async read/write lock per row,
//!   exclusive except for `lock_item_shared`) held until commit or rollback,
//!   with a configurable timeout;
//! - writes are buffered in the unit of work and applied in one step at
//!   commit, so nothing is visible to others before that;
//! - uniqueness, the ledger → movement reference and the non-negative stock
//!   check are enforced;
//! - the journal sequence is assigned at commit;
//! - a snapshot unit of work reads from a copy of the tables taken when it
//!   began.
//!
//! Dropping an uncommitted unit of work discards its writes and releases its
//! locks.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as RowLock};
use tracing::debug;

use stockledger_core::{BinId, BomId, ItemId, MovementId, ProductionRecordId, WarehouseId};
use stockledger_inventory::{Bin, Item, LedgerEntry, Stock, StockKey, StockMovement, Warehouse};
use stockledger_production::{BillOfMaterials, ProductionRecord};

use super::{
    BomRepository, ItemRepository, LedgerRepository, LocationRepository, MovementRepository,
    ProductionRepository, StockRepository, Store, StoreError, StoreResult, UnitOfWork,
};

/// Default time a unit of work waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Item(ItemId),
    Stock(StockKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
enum RowGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

#[derive(Debug, Clone, Default)]
struct Tables {
    items: HashMap<ItemId, Item>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    bins: HashMap<BinId, Bin>,
    boms: HashMap<BomId, BillOfMaterials>,
    stock: HashMap<StockKey, Stock>,
    movements: Vec<StockMovement>,
    movement_ids: HashSet<MovementId>,
    ledger: Vec<LedgerEntry>,
    productions: HashMap<ProductionRecordId, ProductionRecord>,
    next_sequence: i64,
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<RowKey, Arc<RowLock<()>>>>,
    lock_timeout: Duration,
}

impl Shared {
    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("in-memory tables poisoned".to_string()))
    }

    fn row_lock(&self, key: RowKey) -> StoreResult<Arc<RowLock<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Backend("in-memory lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(key).or_default()))
    }

    /// Forget row locks nobody holds or waits for.
    fn prune_locks(&self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|_, m| Arc::strong_count(m) > 1);
        }
    }
}

/// Row counts of the committed tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub stock_rows: usize,
    pub movements: usize,
    pub ledger_entries: usize,
    pub productions: usize,
}

/// In-memory [`Store`].
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    pub fn counts(&self) -> StoreResult<TableCounts> {
        let tables = self.shared.tables()?;
        Ok(TableCounts {
            stock_rows: tables.stock.len(),
            movements: tables.movements.len(),
            ledger_entries: tables.ledger.len(),
            productions: tables.productions.len(),
        })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        Ok(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            pending: Pending::default(),
            snapshot: None,
        })
    }

    async fn begin_snapshot(&self) -> StoreResult<Self::Tx> {
        let snapshot = Arc::new(Tables::clone(&*self.shared.tables()?));
        Ok(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            pending: Pending::default(),
            snapshot: Some(snapshot),
        })
    }
}

/// Committed tables as one unit of work sees them.
enum Committed<'a> {
    Live(MutexGuard<'a, Tables>),
    Snapshot(&'a Tables),
}

impl Deref for Committed<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        match self {
            Committed::Live(guard) => &**guard,
            Committed::Snapshot(tables) => *tables,
        }
    }
}

#[derive(Debug)]
struct Staged<T> {
    row: T,
    insert: bool,
}

#[derive(Debug, Default)]
struct Pending {
    items: HashMap<ItemId, Staged<Item>>,
    warehouses: HashMap<WarehouseId, Staged<Warehouse>>,
    bins: HashMap<BinId, Staged<Bin>>,
    boms: Vec<BillOfMaterials>,
    stock: HashMap<StockKey, Stock>,
    movements: Vec<StockMovement>,
    ledger: Vec<LedgerEntry>,
    productions: Vec<ProductionRecord>,
}

/// Unit of work over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    held: HashMap<RowKey, RowGuard>,
    pending: Pending,
    snapshot: Option<Arc<Tables>>,
}

impl InMemoryUnitOfWork {
    async fn acquire(&mut self, key: RowKey, mode: LockMode) -> StoreResult<()> {
        match (self.held.get(&key), mode) {
            (Some(RowGuard::Exclusive(_)), _) | (Some(RowGuard::Shared(_)), LockMode::Shared) => {
                return Ok(());
            }
            (Some(RowGuard::Shared(_)), LockMode::Exclusive) => {
                return Err(StoreError::Backend(format!(
                    "{key:?} is already held shared by this unit of work"
                )));
            }
            (None, _) => {}
        }

        let lock = self.shared.row_lock(key)?;
        let timeout = self.shared.lock_timeout;
        let guard = match mode {
            LockMode::Shared => tokio::time::timeout(timeout, lock.read_owned())
                .await
                .map(RowGuard::Shared),
            LockMode::Exclusive => tokio::time::timeout(timeout, lock.write_owned())
                .await
                .map(RowGuard::Exclusive),
        }
        .map_err(|_| StoreError::LockTimeout(format!("{key:?} not acquired within {timeout:?}")))?;
        self.held.insert(key, guard);
        Ok(())
    }

    fn committed(&self) -> StoreResult<Committed<'_>> {
        match &self.snapshot {
            Some(tables) => Ok(Committed::Snapshot(tables.as_ref())),
            None => Ok(Committed::Live(self.shared.tables()?)),
        }
    }

    fn release(&mut self) {
        let held = self.held.len();
        self.held.clear();
        self.shared.prune_locks();
        debug!(released_locks = held, "in-memory unit of work finished");
    }

    fn read_item(&self, id: ItemId) -> StoreResult<Option<Item>> {
        if let Some(staged) = self.pending.items.get(&id) {
            return Ok(Some(staged.row.clone()));
        }
        Ok(self.committed()?.items.get(&id).cloned())
    }

    fn read_stock(&self, key: StockKey) -> StoreResult<Option<Stock>> {
        if let Some(stock) = self.pending.stock.get(&key) {
            return Ok(Some(stock.clone()));
        }
        Ok(self.committed()?.stock.get(&key).cloned())
    }

    fn check_commit(&self, tables: &Tables) -> StoreResult<()> {
        for (id, staged) in &self.pending.items {
            check_staged("item", id, staged.insert, tables.items.contains_key(id))?;
        }
        for (id, staged) in &self.pending.warehouses {
            check_staged("warehouse", id, staged.insert, tables.warehouses.contains_key(id))?;
        }
        for (id, staged) in &self.pending.bins {
            check_staged("bin", id, staged.insert, tables.bins.contains_key(id))?;
        }
        for bom in &self.pending.boms {
            if tables.boms.contains_key(&bom.id) {
                return Err(duplicate("bill of materials", bom.id));
            }
        }
        for movement in &self.pending.movements {
            if tables.movement_ids.contains(&movement.id) {
                return Err(duplicate("movement", movement.id));
            }
        }
        for record in &self.pending.productions {
            if tables.productions.contains_key(&record.id) {
                return Err(duplicate("production record", record.id));
            }
        }
        Ok(())
    }

    fn apply(&mut self, tables: &mut Tables) {
        let pending = std::mem::take(&mut self.pending);

        for (id, staged) in pending.items {
            tables.items.insert(id, staged.row);
        }
        for (id, staged) in pending.warehouses {
            tables.warehouses.insert(id, staged.row);
        }
        for (id, staged) in pending.bins {
            tables.bins.insert(id, staged.row);
        }
        for bom in pending.boms {
            tables.boms.insert(bom.id, bom);
        }
        for (key, stock) in pending.stock {
            tables.stock.insert(key, stock);
        }
        for movement in pending.movements {
            tables.movement_ids.insert(movement.id);
            tables.movements.push(movement);
        }
        for mut entry in pending.ledger {
            tables.next_sequence += 1;
            entry.sequence = Some(tables.next_sequence);
            tables.ledger.push(entry);
        }
        for record in pending.productions {
            tables.productions.insert(record.id, record);
        }
    }
}

fn check_staged(
    resource: &str,
    id: &impl core::fmt::Display,
    insert: bool,
    exists: bool,
) -> StoreResult<()> {
    match (insert, exists) {
        (true, true) => Err(duplicate(resource, id)),
        (false, false) => Err(missing(resource, id)),
        _ => Ok(()),
    }
}

fn duplicate(resource: &str, id: impl core::fmt::Display) -> StoreError {
    StoreError::Constraint(format!("duplicate {resource} {id}"))
}

fn missing(resource: &str, id: impl core::fmt::Display) -> StoreError {
    StoreError::Constraint(format!("{resource} {id} does not exist"))
}

#[async_trait]
impl ItemRepository for InMemoryUnitOfWork {
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        self.read_item(id)
    }

    async fn lock_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        self.acquire(RowKey::Item(id), LockMode::Exclusive).await?;
        self.read_item(id)
    }

    async fn lock_item_shared(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        self.acquire(RowKey::Item(id), LockMode::Shared).await?;
        self.read_item(id)
    }

    async fn insert_item(&mut self, item: &Item) -> StoreResult<()> {
        if self.read_item(item.id)?.is_some() {
            return Err(duplicate("item", item.id));
        }
        self.pending.items.insert(
            item.id,
            Staged {
                row: item.clone(),
                insert: true,
            },
        );
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> StoreResult<()> {
        let insert = match self.pending.items.get(&item.id) {
            Some(staged) => staged.insert,
            None if self.committed()?.items.contains_key(&item.id) => false,
            None => return Err(missing("item", item.id)),
        };
        self.pending.items.insert(
            item.id,
            Staged {
                row: item.clone(),
                insert,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl LocationRepository for InMemoryUnitOfWork {
    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        if let Some(staged) = self.pending.warehouses.get(&id) {
            return Ok(Some(staged.row.clone()));
        }
        Ok(self.committed()?.warehouses.get(&id).cloned())
    }

    async fn list_warehouses(&mut self) -> StoreResult<Vec<Warehouse>> {
        let mut rows: HashMap<WarehouseId, Warehouse> = self.committed()?.warehouses.clone();
        for (id, staged) in &self.pending.warehouses {
            rows.insert(*id, staged.row.clone());
        }
        let mut rows: Vec<Warehouse> = rows.into_values().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        if self.get_warehouse(warehouse.id).await?.is_some() {
            return Err(duplicate("warehouse", warehouse.id));
        }
        self.pending.warehouses.insert(
            warehouse.id,
            Staged {
                row: warehouse.clone(),
                insert: true,
            },
        );
        Ok(())
    }

    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        let insert = match self.pending.warehouses.get(&warehouse.id) {
            Some(staged) => staged.insert,
            None if self.committed()?.warehouses.contains_key(&warehouse.id) => false,
            None => return Err(missing("warehouse", warehouse.id)),
        };
        self.pending.warehouses.insert(
            warehouse.id,
            Staged {
                row: warehouse.clone(),
                insert,
            },
        );
        Ok(())
    }

    async fn get_bin(&mut self, id: BinId) -> StoreResult<Option<Bin>> {
        if let Some(staged) = self.pending.bins.get(&id) {
            return Ok(Some(staged.row.clone()));
        }
        Ok(self.committed()?.bins.get(&id).cloned())
    }

    async fn list_bins(&mut self, warehouse_id: WarehouseId) -> StoreResult<Vec<Bin>> {
        let mut rows: HashMap<BinId, Bin> = self
            .committed()?
            .bins
            .values()
            .filter(|b| b.warehouse_id == warehouse_id)
            .map(|b| (b.id, b.clone()))
            .collect();
        for (id, staged) in &self.pending.bins {
            if staged.row.warehouse_id == warehouse_id {
                rows.insert(*id, staged.row.clone());
            }
        }
        let mut rows: Vec<Bin> = rows.into_values().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_bin(&mut self, bin: &Bin) -> StoreResult<()> {
        if self.get_bin(bin.id).await?.is_some() {
            return Err(duplicate("bin", bin.id));
        }
        if self.get_warehouse(bin.warehouse_id).await?.is_none() {
            return Err(missing("warehouse", bin.warehouse_id));
        }
        self.pending.bins.insert(
            bin.id,
            Staged {
                row: bin.clone(),
                insert: true,
            },
        );
        Ok(())
    }

    async fn update_bin(&mut self, bin: &Bin) -> StoreResult<()> {
        let insert = match self.pending.bins.get(&bin.id) {
            Some(staged) => staged.insert,
            None if self.committed()?.bins.contains_key(&bin.id) => false,
            None => return Err(missing("bin", bin.id)),
        };
        self.pending.bins.insert(
            bin.id,
            Staged {
                row: bin.clone(),
                insert,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl BomRepository for InMemoryUnitOfWork {
    async fn get_bom(&mut self, id: BomId) -> StoreResult<Option<BillOfMaterials>> {
        if let Some(bom) = self.pending.boms.iter().find(|b| b.id == id) {
            return Ok(Some(bom.clone()));
        }
        Ok(self.committed()?.boms.get(&id).cloned())
    }

    async fn get_bom_for_product(
        &mut self,
        product_id: ItemId,
    ) -> StoreResult<Option<BillOfMaterials>> {
        let tables = self.committed()?;
        let best = tables
            .boms
            .values()
            .chain(self.pending.boms.iter())
            .filter(|b| b.product_id == product_id)
            .max_by(|a, b| {
                (a.is_active, a.created_at, a.id).cmp(&(b.is_active, b.created_at, b.id))
            })
            .cloned();
        Ok(best)
    }

    async fn insert_bom(&mut self, bom: &BillOfMaterials) -> StoreResult<()> {
        if self.get_bom(bom.id).await?.is_some() {
            return Err(duplicate("bill of materials", bom.id));
        }
        self.pending.boms.push(bom.clone());
        Ok(())
    }
}

#[async_trait]
impl StockRepository for InMemoryUnitOfWork {
    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>> {
        self.read_stock(key)
    }

    async fn lock_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>> {
        self.acquire(RowKey::Stock(key), LockMode::Exclusive).await?;
        self.read_stock(key)
    }

    async fn upsert_stock(&mut self, stock: &Stock) -> StoreResult<()> {
        if stock.quantity < Decimal::ZERO {
            return Err(StoreError::Constraint(format!(
                "stock {} cannot hold a negative quantity ({})",
                stock.key, stock.quantity
            )));
        }
        self.pending.stock.insert(stock.key, stock.clone());
        Ok(())
    }

    async fn stock_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Stock>> {
        let mut rows: HashMap<StockKey, Stock> = self
            .committed()?
            .stock
            .values()
            .filter(|s| s.key.item_id == item_id)
            .map(|s| (s.key, s.clone()))
            .collect();
        for (key, stock) in &self.pending.stock {
            if key.item_id == item_id {
                rows.insert(*key, stock.clone());
            }
        }
        let mut rows: Vec<Stock> = rows.into_values().collect();
        rows.sort_by_key(|s| s.key);
        Ok(rows)
    }
}

#[async_trait]
impl MovementRepository for InMemoryUnitOfWork {
    async fn insert_movement(&mut self, movement: &StockMovement) -> StoreResult<()> {
        let known = self.pending.movements.iter().any(|m| m.id == movement.id)
            || self.committed()?.movement_ids.contains(&movement.id);
        if known {
            return Err(duplicate("movement", movement.id));
        }
        self.pending.movements.push(movement.clone());
        Ok(())
    }

    async fn movements_for(&mut self, key: StockKey) -> StoreResult<Vec<StockMovement>> {
        let mut rows: Vec<StockMovement> = self
            .committed()?
            .movements
            .iter()
            .filter(|m| m.key() == key)
            .cloned()
            .collect();
        rows.extend(self.pending.movements.iter().filter(|m| m.key() == key).cloned());
        Ok(rows)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryUnitOfWork {
    async fn append_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        let referenced = self.pending.movements.iter().any(|m| m.id == entry.movement_id)
            || self.committed()?.movement_ids.contains(&entry.movement_id);
        if !referenced {
            return Err(StoreError::Constraint(format!(
                "ledger entry {} references unknown movement {}",
                entry.id, entry.movement_id
            )));
        }
        self.pending.ledger.push(entry.clone());
        Ok(())
    }

    async fn ledger_for(&mut self, key: StockKey) -> StoreResult<Vec<LedgerEntry>> {
        let mut rows: Vec<LedgerEntry> = self
            .committed()?
            .ledger
            .iter()
            .filter(|e| e.key() == key)
            .cloned()
            .collect();
        rows.extend(self.pending.ledger.iter().filter(|e| e.key() == key).cloned());
        Ok(rows)
    }
}

#[async_trait]
impl ProductionRepository for InMemoryUnitOfWork {
    async fn insert_production(&mut self, record: &ProductionRecord) -> StoreResult<()> {
        if self.get_production(record.id).await?.is_some() {
            return Err(duplicate("production record", record.id));
        }
        self.pending.productions.push(record.clone());
        Ok(())
    }

    async fn get_production(
        &mut self,
        id: ProductionRecordId,
    ) -> StoreResult<Option<ProductionRecord>> {
        if let Some(record) = self.pending.productions.iter().find(|r| r.id == id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.committed()?.productions.get(&id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> StoreResult<()> {
        let shared = Arc::clone(&self.shared);
        {
            let mut tables = shared.tables()?;
            self.check_commit(&tables)?;
            self.apply(&mut tables);
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.pending = Pending::default();
        self.release();
        Ok(())
    }
}
