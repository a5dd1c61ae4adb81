use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::decimal::{ensure_positive, normalize};
use stockledger_core::{BomId, DomainError, DomainResult, Entity, ItemId, Quantity};

/// One line of a bill of materials: how much of an item one unit of product
/// consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomComponent {
    pub component_item_id: ItemId,
    pub quantity_per_unit: Quantity,
    pub unit_of_measure: String,
    pub is_active: bool,
}

/// Recipe mapping a produced item to the components it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOfMaterials {
    pub id: BomId,
    pub product_id: ItemId,
    pub name: String,
    pub is_active: bool,
    /// Components in the order they were defined.
    pub components: Vec<BomComponent>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBomComponent {
    pub component_item_id: ItemId,
    pub quantity_per_unit: Quantity,
    pub unit_of_measure: String,
}

impl NewBomComponent {
    pub fn new(component_item_id: ItemId, quantity_per_unit: Quantity, uom: &str) -> Self {
        Self {
            component_item_id,
            quantity_per_unit,
            unit_of_measure: uom.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBom {
    pub product_id: ItemId,
    pub name: String,
    pub components: Vec<NewBomComponent>,
}

impl BillOfMaterials {
    /// Validate the recipe's shape. Existence and kind of the referenced items
    /// are checked by the caller against the catalog.
    pub fn create(id: BomId, input: NewBom, now: DateTime<Utc>) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::invalid_input("name cannot be empty"));
        }
        if input.components.is_empty() {
            return Err(DomainError::invalid_input(
                "bill of materials needs at least one component",
            ));
        }

        let mut components = Vec::with_capacity(input.components.len());
        for c in input.components {
            if c.component_item_id == input.product_id {
                return Err(DomainError::invalid_input(format!(
                    "item {} cannot be a component of itself",
                    input.product_id
                )));
            }
            ensure_positive(c.quantity_per_unit, "quantity_per_unit")?;
            let uom = c.unit_of_measure.trim();
            if uom.is_empty() {
                return Err(DomainError::invalid_input("unit_of_measure cannot be empty"));
            }
            components.push(BomComponent {
                component_item_id: c.component_item_id,
                quantity_per_unit: normalize(c.quantity_per_unit),
                unit_of_measure: uom.to_string(),
                is_active: true,
            });
        }

        Ok(Self {
            id,
            product_id: input.product_id,
            name: name.to_string(),
            is_active: true,
            components,
            created_at: now,
        })
    }

    pub fn ensure_active(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::inactive("bill of materials", self.id));
        }
        Ok(())
    }

    pub fn active_components(&self) -> impl Iterator<Item = &BomComponent> {
        self.components.iter().filter(|c| c.is_active)
    }
}

impl Entity for BillOfMaterials {
    type Id = BomId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
