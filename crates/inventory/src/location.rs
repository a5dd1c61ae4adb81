use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BinId, DomainError, DomainResult, Entity, WarehouseId};

/// A warehouse. Inactive warehouses reject new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn create(id: WarehouseId, name: &str, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: validate_name(name)?,
            is_active: true,
            created_at: now,
        })
    }

    pub fn ensure_accepts_movements(&self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::inactive("warehouse", self.id));
        }
        Ok(())
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A storage bin inside exactly one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    pub id: BinId,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Bin {
    pub fn create(
        id: BinId,
        warehouse_id: WarehouseId,
        name: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            warehouse_id,
            name: validate_name(name)?,
            is_active: true,
            created_at: now,
        })
    }

    /// A bin accepts a movement only when active and located in `warehouse_id`.
    pub fn ensure_accepts_movements(&self, warehouse_id: WarehouseId) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::inactive("bin", self.id));
        }
        if self.warehouse_id != warehouse_id {
            return Err(DomainError::invalid_input(format!(
                "bin {} belongs to warehouse {}, not {}",
                self.id, self.warehouse_id, warehouse_id
            )));
        }
        Ok(())
    }
}

impl Entity for Bin {
    type Id = BinId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_name(name: &str) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_input("name cannot be empty"));
    }
    Ok(trimmed.to_string())
}
