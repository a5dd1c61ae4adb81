//! Postgres-backed store.
//!
//! Each unit of work is one `READ COMMITTED` transaction with a local
//! `lock_timeout`. Row locks are `SELECT ... FOR UPDATE`; a stock row that does
//! not exist yet is first materialised with quantity 0 (`INSERT ... ON CONFLICT
//! DO NOTHING`) so that two concurrent first movements on the same key
//! serialise on it instead of both reading "no row". The placeholder rolls
//! back with the transaction if the movement fails.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Constraint` | Duplicate id |
//! | Database (foreign key violation) | `23503` | `Constraint` | Unknown item/warehouse/movement |
//! | Database (check constraint violation) | `23514` | `Constraint` | Negative stock, bad direction |
//! | Database (deadlock detected) | `40P01` | `Deadlock` | Lock cycle broken by the server |
//! | Database (serialization failure) | `40001` | `Deadlock` | Retryable conflict |
//! | Database (lock not available) | `55P03` | `LockTimeout` | `lock_timeout` elapsed |
//! | Database (query canceled) | `57014` | `LockTimeout` | `statement_timeout` elapsed |
//! | Database (other) | Any other | `Backend` | e.g. append-only trigger |
//! | ColumnDecode / Decode | N/A | `Corrupt` | Row cannot be decoded |
//! | PoolTimedOut / PoolClosed / Io / other | N/A | `Backend` | Transport failures |
//!
//! The "no bin" slot is stored as the nil UUID.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_core::{
    BinId, BomId, ItemId, MovementId, ProductionRecordId, UserId, WarehouseId,
};
use stockledger_inventory::{
    Bin, Direction, Item, ItemKind, LedgerEntry, Stock, StockKey, StockMovement, Warehouse,
};
use stockledger_production::{BillOfMaterials, BomComponent, ProductionRecord};

use super::{
    BomRepository, ItemRepository, LedgerRepository, LocationRepository, MovementRepository,
    ProductionRepository, StockRepository, Store, StoreError, StoreResult, UnitOfWork,
};
use crate::config::DatabaseConfig;

/// Postgres [`Store`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool as configured.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!("connected to postgres");
        Ok(Self::new(pool, Duration::from_millis(config.lock_timeout_ms)))
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        info!("migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresUnitOfWork;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        self.begin_with(None).await
    }

    async fn begin_snapshot(&self) -> StoreResult<Self::Tx> {
        self.begin_with(Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY"))
            .await
    }
}

impl PostgresStore {
    /// `characteristics` must run before any other statement of the
    /// transaction.
    async fn begin_with(&self, characteristics: Option<&str>) -> StoreResult<PostgresUnitOfWork> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(statement) = characteristics {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_transaction", e))?;
        }

        // SET does not take bind parameters; the value is an integer we own.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(PostgresUnitOfWork { tx })
    }
}

/// Unit of work bound to one Postgres transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl core::fmt::Debug for PostgresUnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresUnitOfWork").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

const ITEM_COLUMNS: &str =
    "id, name, kind, cost_price, sale_price, average_cost, is_active, created_at, updated_at";

#[async_trait]
impl ItemRepository for PostgresUnitOfWork {
    async fn get_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_item", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn lock_item(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_item", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn lock_item_shared(&mut self, id: ItemId) -> StoreResult<Option<Item>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR SHARE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_item_shared", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_item(&mut self, item: &Item) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO items (
                id, name, kind, cost_price, sale_price, average_cost,
                is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(item.kind.as_str())
        .bind(item.cost_price)
        .bind(item.sale_price)
        .bind(item.average_cost)
        .bind(item.is_active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }

    async fn update_item(&mut self, item: &Item) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE items
            SET name = $2, cost_price = $3, sale_price = $4, average_cost = $5,
                is_active = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.name)
        .bind(item.cost_price)
        .bind(item.sale_price)
        .bind(item.average_cost)
        .bind(item.is_active)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;
        ensure_updated(result.rows_affected(), "item", item.id)
    }
}

#[async_trait]
impl LocationRepository for PostgresUnitOfWork {
    async fn get_warehouse(&mut self, id: WarehouseId) -> StoreResult<Option<Warehouse>> {
        let row = sqlx::query(
            "SELECT id, name, is_active, created_at FROM warehouses WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_warehouse", e))?;
        row.as_ref().map(warehouse_from_row).transpose()
    }

    async fn list_warehouses(&mut self) -> StoreResult<Vec<Warehouse>> {
        let rows = sqlx::query(
            "SELECT id, name, is_active, created_at FROM warehouses ORDER BY name, id",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        rows.iter().map(warehouse_from_row).collect()
    }

    async fn insert_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO warehouses (id, name, is_active, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.name)
        .bind(warehouse.is_active)
        .bind(warehouse.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_warehouse", e))?;
        Ok(())
    }

    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> StoreResult<()> {
        let result = sqlx::query("UPDATE warehouses SET name = $2, is_active = $3 WHERE id = $1")
            .bind(warehouse.id.as_uuid())
            .bind(&warehouse.name)
            .bind(warehouse.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_warehouse", e))?;
        ensure_updated(result.rows_affected(), "warehouse", warehouse.id)
    }

    async fn get_bin(&mut self, id: BinId) -> StoreResult<Option<Bin>> {
        let row = sqlx::query(
            "SELECT id, warehouse_id, name, is_active, created_at FROM bins WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_bin", e))?;
        row.as_ref().map(bin_from_row).transpose()
    }

    async fn list_bins(&mut self, warehouse_id: WarehouseId) -> StoreResult<Vec<Bin>> {
        let rows = sqlx::query(
            r#"
            SELECT id, warehouse_id, name, is_active, created_at
            FROM bins
            WHERE warehouse_id = $1
            ORDER BY name, id
            "#,
        )
        .bind(warehouse_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_bins", e))?;
        rows.iter().map(bin_from_row).collect()
    }

    async fn insert_bin(&mut self, bin: &Bin) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bins (id, warehouse_id, name, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(bin.id.as_uuid())
        .bind(bin.warehouse_id.as_uuid())
        .bind(&bin.name)
        .bind(bin.is_active)
        .bind(bin.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_bin", e))?;
        Ok(())
    }

    async fn update_bin(&mut self, bin: &Bin) -> StoreResult<()> {
        let result = sqlx::query("UPDATE bins SET name = $2, is_active = $3 WHERE id = $1")
            .bind(bin.id.as_uuid())
            .bind(&bin.name)
            .bind(bin.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_bin", e))?;
        ensure_updated(result.rows_affected(), "bin", bin.id)
    }
}

#[async_trait]
impl BomRepository for PostgresUnitOfWork {
    async fn get_bom(&mut self, id: BomId) -> StoreResult<Option<BillOfMaterials>> {
        let header = sqlx::query(
            r#"
            SELECT id, product_id, name, is_active, created_at
            FROM bills_of_materials
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_bom", e))?;

        let Some(header) = header else {
            return Ok(None);
        };

        let components = sqlx::query(
            r#"
            SELECT component_item_id, quantity_per_unit, unit_of_measure, is_active
            FROM bom_components
            WHERE bom_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_bom_components", e))?;

        let components = components
            .iter()
            .map(component_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(BillOfMaterials {
            id: BomId::from_uuid(get(&header, "id")?),
            product_id: ItemId::from_uuid(get(&header, "product_id")?),
            name: get(&header, "name")?,
            is_active: get(&header, "is_active")?,
            components,
            created_at: get(&header, "created_at")?,
        }))
    }

    async fn get_bom_for_product(
        &mut self,
        product_id: ItemId,
    ) -> StoreResult<Option<BillOfMaterials>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM bills_of_materials
            WHERE product_id = $1
            ORDER BY is_active DESC, created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_bom_for_product", e))?;

        match id {
            Some(id) => self.get_bom(BomId::from_uuid(id)).await,
            None => Ok(None),
        }
    }

    async fn insert_bom(&mut self, bom: &BillOfMaterials) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bills_of_materials (id, product_id, name, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(bom.id.as_uuid())
        .bind(bom.product_id.as_uuid())
        .bind(&bom.name)
        .bind(bom.is_active)
        .bind(bom.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_bom", e))?;

        for (position, c) in bom.components.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO bom_components (
                    bom_id, position, component_item_id, quantity_per_unit,
                    unit_of_measure, is_active
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(bom.id.as_uuid())
            .bind(position as i32)
            .bind(c.component_item_id.as_uuid())
            .bind(c.quantity_per_unit)
            .bind(&c.unit_of_measure)
            .bind(c.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_bom_component", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StockRepository for PostgresUnitOfWork {
    async fn get_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, warehouse_id, bin_id, quantity, updated_at
            FROM stock
            WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(bin_to_db(key.bin_id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_stock", e))?;
        row.as_ref().map(stock_from_row).transpose()
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn lock_stock(&mut self, key: StockKey) -> StoreResult<Option<Stock>> {
        let created: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO stock (item_id, warehouse_id, bin_id, quantity, updated_at)
            VALUES ($1, $2, $3, 0, NOW())
            ON CONFLICT (item_id, warehouse_id, bin_id) DO NOTHING
            RETURNING 1
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(bin_to_db(key.bin_id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("materialise_stock", e))?;

        let row = sqlx::query(
            r#"
            SELECT item_id, warehouse_id, bin_id, quantity, updated_at
            FROM stock
            WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3
            FOR UPDATE
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(bin_to_db(key.bin_id))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stock", e))?;

        // The placeholder we just inserted is not a real row yet.
        if created.is_some() {
            return Ok(None);
        }
        stock_from_row(&row).map(Some)
    }

    async fn upsert_stock(&mut self, stock: &Stock) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (item_id, warehouse_id, bin_id, quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id, warehouse_id, bin_id)
            DO UPDATE SET
                quantity = EXCLUDED.quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(stock.key.item_id.as_uuid())
        .bind(stock.key.warehouse_id.as_uuid())
        .bind(bin_to_db(stock.key.bin_id))
        .bind(stock.quantity)
        .bind(stock.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_stock", e))?;
        Ok(())
    }

    async fn stock_for_item(&mut self, item_id: ItemId) -> StoreResult<Vec<Stock>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, warehouse_id, bin_id, quantity, updated_at
            FROM stock
            WHERE item_id = $1
            ORDER BY warehouse_id, bin_id
            "#,
        )
        .bind(item_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("stock_for_item", e))?;
        rows.iter().map(stock_from_row).collect()
    }
}

#[async_trait]
impl MovementRepository for PostgresUnitOfWork {
    async fn insert_movement(&mut self, movement: &StockMovement) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, item_id, warehouse_id, bin_id, direction, quantity,
                unit_price, reason, happened_at, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.item_id.as_uuid())
        .bind(movement.warehouse_id.as_uuid())
        .bind(bin_to_db(movement.bin_id))
        .bind(movement.direction.as_str())
        .bind(movement.quantity)
        .bind(movement.unit_price)
        .bind(&movement.reason)
        .bind(movement.happened_at)
        .bind(movement.created_at)
        .bind(movement.created_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn movements_for(&mut self, key: StockKey) -> StoreResult<Vec<StockMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, item_id, warehouse_id, bin_id, direction, quantity,
                   unit_price, reason, happened_at, created_at, created_by
            FROM stock_movements
            WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(bin_to_db(key.bin_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movements_for", e))?;
        rows.iter().map(movement_from_row).collect()
    }
}

#[async_trait]
impl LedgerRepository for PostgresUnitOfWork {
    #[instrument(skip(self, entry), fields(movement_id = %entry.movement_id), err)]
    async fn append_ledger(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_ledger (
                id, movement_id, item_id, warehouse_id, bin_id, direction,
                quantity_change, quantity_before, quantity_after,
                happened_at, recorded_at, recorded_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.movement_id.as_uuid())
        .bind(entry.item_id.as_uuid())
        .bind(entry.warehouse_id.as_uuid())
        .bind(bin_to_db(entry.bin_id))
        .bind(entry.direction.as_str())
        .bind(entry.quantity_change)
        .bind(entry.quantity_before)
        .bind(entry.quantity_after)
        .bind(entry.happened_at)
        .bind(entry.recorded_at)
        .bind(entry.recorded_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_ledger", e))?;
        Ok(())
    }

    async fn ledger_for(&mut self, key: StockKey) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, movement_id, item_id, warehouse_id, bin_id, direction,
                   quantity_change, quantity_before, quantity_after,
                   happened_at, recorded_at, recorded_by
            FROM stock_ledger
            WHERE item_id = $1 AND warehouse_id = $2 AND bin_id = $3
            ORDER BY sequence ASC
            "#,
        )
        .bind(key.item_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(bin_to_db(key.bin_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("ledger_for", e))?;
        rows.iter().map(ledger_from_row).collect()
    }
}

#[async_trait]
impl ProductionRepository for PostgresUnitOfWork {
    async fn insert_production(&mut self, record: &ProductionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO production_records (
                id, bom_id, produced_product_id, produced_quantity, actual_cost,
                warehouse_id, produced_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.bom_id.as_uuid())
        .bind(record.produced_product_id.as_uuid())
        .bind(record.produced_quantity)
        .bind(record.actual_cost)
        .bind(record.warehouse_id.as_uuid())
        .bind(record.produced_at)
        .bind(record.created_by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_production", e))?;
        Ok(())
    }

    async fn get_production(
        &mut self,
        id: ProductionRecordId,
    ) -> StoreResult<Option<ProductionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, bom_id, produced_product_id, produced_quantity, actual_cost,
                   warehouse_id, produced_at, created_by
            FROM production_records
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_production", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ProductionRecord {
            id: ProductionRecordId::from_uuid(get(&row, "id")?),
            bom_id: BomId::from_uuid(get(&row, "bom_id")?),
            produced_product_id: ItemId::from_uuid(get(&row, "produced_product_id")?),
            produced_quantity: get(&row, "produced_quantity")?,
            actual_cost: get(&row, "actual_cost")?,
            warehouse_id: WarehouseId::from_uuid(get(&row, "warehouse_id")?),
            produced_at: get(&row, "produced_at")?,
            created_by: UserId::from_uuid(get(&row, "created_by")?),
        }))
    }
}

fn bin_to_db(bin: Option<BinId>) -> Uuid {
    bin.map(Uuid::from).unwrap_or_else(Uuid::nil)
}

fn bin_from_db(uuid: Uuid) -> Option<BinId> {
    (!uuid.is_nil()).then(|| BinId::from_uuid(uuid))
}

fn ensure_updated(rows: u64, resource: &str, id: impl core::fmt::Display) -> StoreResult<()> {
    if rows == 0 {
        return Err(StoreError::Constraint(format!("{resource} {id} does not exist")));
    }
    Ok(())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column {column}: {e}")))
}

fn parse<T>(value: &str) -> StoreResult<T>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

fn item_from_row(row: &PgRow) -> StoreResult<Item> {
    let kind: String = get(row, "kind")?;
    Ok(Item {
        id: ItemId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        kind: parse::<ItemKind>(&kind)?,
        cost_price: get(row, "cost_price")?,
        sale_price: get(row, "sale_price")?,
        average_cost: get(row, "average_cost")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn warehouse_from_row(row: &PgRow) -> StoreResult<Warehouse> {
    Ok(Warehouse {
        id: WarehouseId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn bin_from_row(row: &PgRow) -> StoreResult<Bin> {
    Ok(Bin {
        id: BinId::from_uuid(get(row, "id")?),
        warehouse_id: WarehouseId::from_uuid(get(row, "warehouse_id")?),
        name: get(row, "name")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn component_from_row(row: &PgRow) -> StoreResult<BomComponent> {
    Ok(BomComponent {
        component_item_id: ItemId::from_uuid(get(row, "component_item_id")?),
        quantity_per_unit: get(row, "quantity_per_unit")?,
        unit_of_measure: get(row, "unit_of_measure")?,
        is_active: get(row, "is_active")?,
    })
}

fn stock_key_from_row(row: &PgRow) -> StoreResult<StockKey> {
    Ok(StockKey::new(
        ItemId::from_uuid(get(row, "item_id")?),
        WarehouseId::from_uuid(get(row, "warehouse_id")?),
        bin_from_db(get(row, "bin_id")?),
    ))
}

fn stock_from_row(row: &PgRow) -> StoreResult<Stock> {
    Ok(Stock::new(
        stock_key_from_row(row)?,
        get(row, "quantity")?,
        get(row, "updated_at")?,
    ))
}

fn movement_from_row(row: &PgRow) -> StoreResult<StockMovement> {
    let key = stock_key_from_row(row)?;
    let direction: String = get(row, "direction")?;
    Ok(StockMovement {
        id: MovementId::from_uuid(get(row, "id")?),
        item_id: key.item_id,
        warehouse_id: key.warehouse_id,
        bin_id: key.bin_id,
        direction: parse::<Direction>(&direction)?,
        quantity: get(row, "quantity")?,
        unit_price: get(row, "unit_price")?,
        reason: get(row, "reason")?,
        happened_at: get(row, "happened_at")?,
        created_at: get(row, "created_at")?,
        created_by: UserId::from_uuid(get(row, "created_by")?),
    })
}

fn ledger_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let key = stock_key_from_row(row)?;
    let direction: String = get(row, "direction")?;
    Ok(LedgerEntry {
        id: stockledger_core::LedgerEntryId::from_uuid(get(row, "id")?),
        movement_id: MovementId::from_uuid(get(row, "movement_id")?),
        item_id: key.item_id,
        warehouse_id: key.warehouse_id,
        bin_id: key.bin_id,
        direction: parse::<Direction>(&direction)?,
        quantity_change: get(row, "quantity_change")?,
        quantity_before: get(row, "quantity_before")?,
        quantity_after: get(row, "quantity_after")?,
        happened_at: get(row, "happened_at")?,
        recorded_at: get(row, "recorded_at")?,
        recorded_by: UserId::from_uuid(get(row, "recorded_by")?),
        sequence: Some(get(row, "sequence")?),
    })
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") | Some("23503") | Some("23514") => StoreError::Constraint(msg),
                Some("40P01") | Some("40001") => StoreError::Deadlock(msg),
                Some("55P03") | Some("57014") => StoreError::LockTimeout(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockledger_inventory::{MovementRequest, NewItem, plan_transition};

    #[test]
    fn no_bin_round_trips_through_nil() {
        assert!(bin_to_db(None).is_nil());
        assert_eq!(bin_from_db(Uuid::nil()), None);

        let bin = BinId::new();
        assert_eq!(bin_from_db(bin_to_db(Some(bin))), Some(bin));
    }

    #[test]
    fn non_database_errors_are_backend_failures() {
        let err = map_sqlx_error("op", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!err.is_retryable());
    }

    async fn store() -> PostgresStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        let store = PostgresStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn movement_ledger_and_stock_commit_together() {
        let store = store().await;
        let now = Utc::now();
        let item = Item::create(ItemId::new(), NewItem::storable("Bolt", dec!(1)), now).unwrap();
        let warehouse = Warehouse::create(WarehouseId::new(), "Main", now).unwrap();
        let key = StockKey::unbinned(item.id, warehouse.id);

        let mut tx = store.begin().await.unwrap();
        tx.insert_item(&item).await.unwrap();
        tx.insert_warehouse(&warehouse).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_stock(key).await.unwrap().is_none());
        let request = MovementRequest::inbound(key, dec!(100));
        let transition = plan_transition(key, dec!(0), request.direction, request.quantity).unwrap();
        let movement = StockMovement::from_request(&request, UserId::system(), now);
        let entry = LedgerEntry::for_movement(&movement, &transition, UserId::system(), now).unwrap();
        tx.insert_movement(&movement).await.unwrap();
        tx.upsert_stock(&Stock::new(key, transition.after, now)).await.unwrap();
        tx.append_ledger(&entry).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_stock(key).await.unwrap().unwrap().quantity, dec!(100));
        let journal = tx.ledger_for(key).await.unwrap();
        assert_eq!(journal.len(), 1);
        assert!(journal[0].sequence.is_some());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn rolled_back_placeholder_leaves_no_stock_row() {
        let store = store().await;
        let now = Utc::now();
        let item = Item::create(ItemId::new(), NewItem::storable("Nut", dec!(1)), now).unwrap();
        let warehouse = Warehouse::create(WarehouseId::new(), "Side", now).unwrap();
        let key = StockKey::unbinned(item.id, warehouse.id);

        let mut tx = store.begin().await.unwrap();
        tx.insert_item(&item).await.unwrap();
        tx.insert_warehouse(&warehouse).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_stock(key).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_stock(key).await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn snapshot_reads_agree_across_a_concurrent_commit() {
        let store = store().await;
        let now = Utc::now();
        let item = Item::create(ItemId::new(), NewItem::storable("Washer", dec!(1)), now).unwrap();
        let warehouse = Warehouse::create(WarehouseId::new(), "Snap", now).unwrap();
        let key = StockKey::unbinned(item.id, warehouse.id);

        let mut tx = store.begin().await.unwrap();
        tx.insert_item(&item).await.unwrap();
        tx.insert_warehouse(&warehouse).await.unwrap();
        tx.commit().await.unwrap();

        let mut snapshot = store.begin_snapshot().await.unwrap();
        assert!(snapshot.get_stock(key).await.unwrap().is_none());

        let mut writer = store.begin().await.unwrap();
        writer.lock_stock(key).await.unwrap();
        let request = MovementRequest::inbound(key, dec!(10));
        let transition = plan_transition(key, dec!(0), request.direction, request.quantity).unwrap();
        let movement = StockMovement::from_request(&request, UserId::system(), now);
        let entry = LedgerEntry::for_movement(&movement, &transition, UserId::system(), now).unwrap();
        writer.insert_movement(&movement).await.unwrap();
        writer.upsert_stock(&Stock::new(key, transition.after, now)).await.unwrap();
        writer.append_ledger(&entry).await.unwrap();
        writer.commit().await.unwrap();

        assert!(snapshot.ledger_for(key).await.unwrap().is_empty());
        assert!(snapshot.get_stock(key).await.unwrap().is_none());
        snapshot.rollback().await.unwrap();
    }
}
