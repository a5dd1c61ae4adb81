use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    BomId, ItemId, Money, ProductionRecordId, Quantity, UserId, WarehouseId,
};

use crate::plan::ProductionPlan;

/// Created exactly once per successful production run; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub id: ProductionRecordId,
    pub bom_id: BomId,
    pub produced_product_id: ItemId,
    pub produced_quantity: Quantity,
    pub actual_cost: Money,
    pub warehouse_id: WarehouseId,
    pub produced_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl ProductionRecord {
    pub fn from_plan(plan: &ProductionPlan, created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: ProductionRecordId::new(),
            bom_id: plan.bom_id,
            produced_product_id: plan.product_id,
            produced_quantity: plan.quantity,
            actual_cost: plan.actual_cost,
            warehouse_id: plan.warehouse_id,
            produced_at: now,
            created_by,
        }
    }
}
