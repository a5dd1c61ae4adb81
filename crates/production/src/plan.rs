//! Production planning.
//!
//! A [`ProductionPlan`] is everything a production run needs decided before
//! it touches storage:
//!
//! - the aggregated component requirements (duplicate lines of the same item
//!   collapse into one), sorted by item id;
//! - which stock rows to lock, already in the global lock order;
//! - the component-driven cost of the run.
//!
//! Service components are costed but carry no stock; inactive components are
//! skipped entirely.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use stockledger_core::decimal::{
    DECIMAL_SCALE, checked_add, checked_mul, ensure_positive, normalize,
};
use stockledger_core::{BomId, DomainError, DomainResult, ItemId, Money, Quantity, WarehouseId};
use stockledger_inventory::{Item, ItemKind, StockKey};

use crate::bom::BillOfMaterials;

/// What one component contributes to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequirement {
    pub item_id: ItemId,
    pub kind: ItemKind,
    /// Total quantity consumed by the whole run.
    pub quantity: Quantity,
    pub unit_cost: Money,
    pub line_cost: Money,
}

impl ComponentRequirement {
    pub fn is_stock_tracked(&self) -> bool {
        self.kind.is_stock_tracked()
    }
}

/// A component the warehouse cannot cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub item_id: ItemId,
    pub required: Quantity,
    pub available: Quantity,
    pub missing: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub bom_id: BomId,
    pub product_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub quantity: Quantity,
    /// Sorted by ascending item id.
    pub requirements: Vec<ComponentRequirement>,
    pub actual_cost: Money,
}

impl ProductionPlan {
    /// Plan producing `quantity` units of `bom`'s product into `warehouse_id`.
    ///
    /// `components` must contain the catalog entry of every active component.
    pub fn build(
        bom: &BillOfMaterials,
        product: &Item,
        components: &[Item],
        warehouse_id: WarehouseId,
        quantity: Quantity,
    ) -> DomainResult<Self> {
        ensure_positive(quantity, "quantity")?;
        bom.ensure_active()?;

        if product.id != bom.product_id {
            return Err(DomainError::invariant(format!(
                "bill of materials {} produces {}, not {}",
                bom.id, bom.product_id, product.id
            )));
        }
        product.ensure_active()?;
        product.ensure_stock_tracked()?;

        let mut per_unit: BTreeMap<ItemId, Quantity> = BTreeMap::new();
        for c in bom.active_components() {
            if c.component_item_id == bom.product_id {
                return Err(DomainError::invalid_input(format!(
                    "item {} cannot be a component of itself",
                    bom.product_id
                )));
            }
            let line = per_unit.entry(c.component_item_id).or_insert(Decimal::ZERO);
            *line = checked_add(*line, c.quantity_per_unit, "quantity per unit")?;
        }
        if per_unit.is_empty() {
            return Err(DomainError::invalid_input(format!(
                "bill of materials {} has no active components",
                bom.id
            )));
        }

        let catalog: HashMap<ItemId, &Item> = components.iter().map(|i| (i.id, i)).collect();

        let mut requirements = Vec::with_capacity(per_unit.len());
        let mut total = Decimal::ZERO;
        for (item_id, qty_per_unit) in per_unit {
            let item = catalog
                .get(&item_id)
                .ok_or_else(|| DomainError::not_found("item", item_id))?;
            item.ensure_active()?;

            let exact_quantity = checked_mul(qty_per_unit, quantity, "component quantity")?;
            let exact_cost = checked_mul(item.cost_price, exact_quantity, "component cost")?;
            total = checked_add(total, exact_cost, "production cost")?;

            requirements.push(ComponentRequirement {
                item_id,
                kind: item.kind,
                quantity: round_consumption(exact_quantity),
                unit_cost: item.cost_price,
                line_cost: normalize(exact_cost),
            });
        }

        Ok(Self {
            bom_id: bom.id,
            product_id: bom.product_id,
            warehouse_id,
            quantity,
            requirements,
            actual_cost: normalize(total),
        })
    }

    /// Components that are debited from stock (storable only).
    pub fn stock_requirements(&self) -> impl Iterator<Item = &ComponentRequirement> {
        self.requirements.iter().filter(|r| r.is_stock_tracked())
    }

    pub fn component_key(&self, item_id: ItemId) -> StockKey {
        StockKey::unbinned(item_id, self.warehouse_id)
    }

    pub fn output_key(&self) -> StockKey {
        StockKey::unbinned(self.product_id, self.warehouse_id)
    }

    /// Every stock row the run touches, in ascending lock order.
    pub fn lock_keys(&self) -> Vec<StockKey> {
        let keys: BTreeSet<StockKey> = self
            .stock_requirements()
            .map(|r| self.component_key(r.item_id))
            .chain(std::iter::once(self.output_key()))
            .collect();
        keys.into_iter().collect()
    }

    /// Components whose requirement exceeds `on_hand` (missing entries count
    /// as zero). Sorted by item id.
    pub fn shortfalls(&self, on_hand: &HashMap<ItemId, Quantity>) -> Vec<Shortfall> {
        self.stock_requirements()
            .filter_map(|r| {
                let available = on_hand.get(&r.item_id).copied().unwrap_or(Decimal::ZERO);
                (available < r.quantity).then(|| Shortfall {
                    item_id: r.item_id,
                    required: r.quantity,
                    available,
                    missing: r.quantity - available,
                })
            })
            .collect()
    }
}

/// Round a consumed quantity to the stored scale, never under-consuming.
fn round_consumption(value: Quantity) -> Quantity {
    value
        .round_dp_with_strategy(DECIMAL_SCALE, RoundingStrategy::AwayFromZero)
        .normalize()
}
