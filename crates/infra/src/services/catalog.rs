//! Master data: items, warehouses, bins and bills of materials.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockledger_core::{BinId, BomId, ItemId, WarehouseId};
use stockledger_inventory::{Bin, Item, ItemUpdate, NewItem, Warehouse};
use stockledger_production::{BillOfMaterials, NewBom};

use super::error::{LedgerError, require};
use crate::audit::{AuditRecord, AuditSink};
use crate::context::OperationContext;
use crate::store::{
    BomRepository, ItemRepository, LocationRepository, Store, UnitOfWork, UnitOfWorkManager,
};

async fn update_item_in_tx<T: UnitOfWork>(
    tx: &mut T,
    id: ItemId,
    update: ItemUpdate,
) -> Result<(Item, Item), LedgerError> {
    // Same lock a priced receipt takes, so a concurrent average-cost update
    // is not overwritten.
    let before = require(tx.lock_item(id).await?, "item", id)?;
    let mut after = before.clone();
    after.apply_update(update, Utc::now())?;
    tx.update_item(&after).await?;
    Ok((before, after))
}

async fn set_warehouse_active_in_tx<T: UnitOfWork>(
    tx: &mut T,
    id: WarehouseId,
    active: bool,
) -> Result<(Warehouse, Warehouse), LedgerError> {
    let before = require(tx.get_warehouse(id).await?, "warehouse", id)?;
    let after = Warehouse {
        is_active: active,
        ..before.clone()
    };
    tx.update_warehouse(&after).await?;
    Ok((before, after))
}

async fn create_bin_in_tx<T: UnitOfWork>(
    tx: &mut T,
    warehouse_id: WarehouseId,
    name: String,
) -> Result<Bin, LedgerError> {
    require(tx.get_warehouse(warehouse_id).await?, "warehouse", warehouse_id)?;
    let bin = Bin::create(BinId::new(), warehouse_id, &name, Utc::now())?;
    tx.insert_bin(&bin).await?;
    Ok(bin)
}

async fn set_bin_active_in_tx<T: UnitOfWork>(
    tx: &mut T,
    id: BinId,
    active: bool,
) -> Result<(Bin, Bin), LedgerError> {
    let before = require(tx.get_bin(id).await?, "bin", id)?;
    let after = Bin {
        is_active: active,
        ..before.clone()
    };
    tx.update_bin(&after).await?;
    Ok((before, after))
}

async fn create_bom_in_tx<T: UnitOfWork>(
    tx: &mut T,
    input: NewBom,
) -> Result<BillOfMaterials, LedgerError> {
    let product = require(tx.get_item(input.product_id).await?, "item", input.product_id)?;
    product.ensure_stock_tracked()?;

    for component in &input.components {
        let id = component.component_item_id;
        require(tx.get_item(id).await?, "item", id)?;
    }

    let bom = BillOfMaterials::create(BomId::new(), input, Utc::now())?;
    tx.insert_bom(&bom).await?;
    Ok(bom)
}

/// Creates and maintains master data. Every write is audited.
pub struct CatalogService<S: Store> {
    uow: UnitOfWorkManager<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S: Store> Clone for CatalogService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: Store> CatalogService<S> {
    pub fn new(uow: UnitOfWorkManager<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { uow, audit }
    }

    #[instrument(skip(self, ctx, input), fields(name = %input.name, kind = %input.kind.as_str()), err)]
    pub async fn create_item(
        &self,
        ctx: &OperationContext,
        input: NewItem,
    ) -> Result<Item, LedgerError> {
        let item = Item::create(ItemId::new(), input, Utc::now())?;
        let row = item.clone();
        self.uow
            .run(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.insert_item(&row).await?) })
            })
            .await?;

        info!(item_id = %item.id, "item created");
        self.audit.log(AuditRecord::created(ctx, "item", &item));
        Ok(item)
    }

    #[instrument(skip(self, ctx, update), err)]
    pub async fn update_item(
        &self,
        ctx: &OperationContext,
        id: ItemId,
        update: ItemUpdate,
    ) -> Result<Item, LedgerError> {
        let (before, after) = self
            .uow
            .run(move |tx| Box::pin(update_item_in_tx(tx, id, update)))
            .await?;

        self.audit.log(
            AuditRecord::changed(ctx, "item", "update", &before, &after),
        );
        Ok(after)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Item, LedgerError> {
        let item = self
            .uow
            .read(move |tx| Box::pin(async move { Ok::<_, LedgerError>(tx.get_item(id).await?) }))
            .await?;
        require(item, "item", id)
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn create_warehouse(
        &self,
        ctx: &OperationContext,
        name: &str,
    ) -> Result<Warehouse, LedgerError> {
        let warehouse = Warehouse::create(WarehouseId::new(), name, Utc::now())?;
        let row = warehouse.clone();
        self.uow
            .run(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.insert_warehouse(&row).await?) })
            })
            .await?;

        info!(warehouse_id = %warehouse.id, "warehouse created");
        self.audit.log(AuditRecord::created(ctx, "warehouse", &warehouse));
        Ok(warehouse)
    }

    pub async fn get_warehouse(&self, id: WarehouseId) -> Result<Warehouse, LedgerError> {
        let warehouse = self
            .uow
            .read(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.get_warehouse(id).await?) })
            })
            .await?;
        require(warehouse, "warehouse", id)
    }

    /// All warehouses, by name.
    pub async fn list_warehouses(&self) -> Result<Vec<Warehouse>, LedgerError> {
        self.uow
            .read(|tx| Box::pin(async move { Ok::<_, LedgerError>(tx.list_warehouses().await?) }))
            .await
    }

    /// Enable or disable a warehouse. Disabled warehouses reject new
    /// movements; existing stock stays where it is.
    #[instrument(skip(self, ctx), err)]
    pub async fn set_warehouse_active(
        &self,
        ctx: &OperationContext,
        id: WarehouseId,
        active: bool,
    ) -> Result<Warehouse, LedgerError> {
        let (before, after) = self
            .uow
            .run(move |tx| Box::pin(set_warehouse_active_in_tx(tx, id, active)))
            .await?;

        let action = if active { "activate" } else { "deactivate" };
        self.audit.log(
            AuditRecord::changed(ctx, "warehouse", action, &before, &after),
        );
        Ok(after)
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn create_bin(
        &self,
        ctx: &OperationContext,
        warehouse_id: WarehouseId,
        name: &str,
    ) -> Result<Bin, LedgerError> {
        let name = name.to_string();
        let bin = self
            .uow
            .run(move |tx| Box::pin(create_bin_in_tx(tx, warehouse_id, name)))
            .await?;

        info!(bin_id = %bin.id, "bin created");
        self.audit.log(AuditRecord::created(ctx, "bin", &bin));
        Ok(bin)
    }

    /// Bins of a warehouse, by name.
    pub async fn list_bins(&self, warehouse_id: WarehouseId) -> Result<Vec<Bin>, LedgerError> {
        self.uow
            .read(move |tx| {
                Box::pin(async move { Ok::<_, LedgerError>(tx.list_bins(warehouse_id).await?) })
            })
            .await
    }

    #[instrument(skip(self, ctx), err)]
    pub async fn set_bin_active(
        &self,
        ctx: &OperationContext,
        id: BinId,
        active: bool,
    ) -> Result<Bin, LedgerError> {
        let (before, after) = self
            .uow
            .run(move |tx| Box::pin(set_bin_active_in_tx(tx, id, active)))
            .await?;

        let action = if active { "activate" } else { "deactivate" };
        self.audit.log(
            AuditRecord::changed(ctx, "bin", action, &before, &after),
        );
        Ok(after)
    }

    #[instrument(skip(self, ctx, input), fields(product_id = %input.product_id), err)]
    pub async fn create_bom(
        &self,
        ctx: &OperationContext,
        input: NewBom,
    ) -> Result<BillOfMaterials, LedgerError> {
        let bom = self
            .uow
            .run(move |tx| Box::pin(create_bom_in_tx(tx, input)))
            .await?;

        info!(bom_id = %bom.id, components = bom.components.len(), "bill of materials created");
        self.audit.log(AuditRecord::created(ctx, "bill_of_materials", &bom));
        Ok(bom)
    }

    pub async fn get_bom(&self, id: BomId) -> Result<BillOfMaterials, LedgerError> {
        let bom = self
            .uow
            .read(move |tx| Box::pin(async move { Ok::<_, LedgerError>(tx.get_bom(id).await?) }))
            .await?;
        require(bom, "bill of materials", id)
    }

    /// The product's active bill of materials (newest first), else its newest
    /// inactive one.
    pub async fn get_bom_for_product(
        &self,
        product_id: ItemId,
    ) -> Result<BillOfMaterials, LedgerError> {
        let bom = self
            .uow
            .read(move |tx| {
                Box::pin(async move {
                    Ok::<_, LedgerError>(tx.get_bom_for_product(product_id).await?)
                })
            })
            .await?;
        require(bom, "bill of materials", product_id)
    }
}
