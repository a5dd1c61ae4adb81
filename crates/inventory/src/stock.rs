//! Stock projection: one current-state row per (item, warehouse, bin).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::decimal::{checked_add, ensure_positive};
use stockledger_core::{BinId, DomainError, DomainResult, ItemId, Quantity, WarehouseId};

/// Movement direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    /// `+1` for inbound, `-1` for outbound.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::In => Decimal::ONE,
            Direction::Out => Decimal::NEGATIVE_ONE,
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Direction::In),
            "OUT" => Ok(Direction::Out),
            other => Err(DomainError::invalid_input(format!(
                "unknown movement direction: {other}"
            ))),
        }
    }
}

/// Identity of a stock row.
///
/// `bin_id = None` is the "no bin" slot of the warehouse. The derived `Ord`
/// (item, then warehouse, then bin with `None` first) is the global lock
/// acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub bin_id: Option<BinId>,
}

impl StockKey {
    pub fn new(item_id: ItemId, warehouse_id: WarehouseId, bin_id: Option<BinId>) -> Self {
        Self {
            item_id,
            warehouse_id,
            bin_id,
        }
    }

    /// The warehouse-level slot (no bin).
    pub fn unbinned(item_id: ItemId, warehouse_id: WarehouseId) -> Self {
        Self::new(item_id, warehouse_id, None)
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.bin_id {
            Some(bin) => write!(f, "{}@{}/{}", self.item_id, self.warehouse_id, bin),
            None => write!(f, "{}@{}/-", self.item_id, self.warehouse_id),
        }
    }
}

/// Current quantity of one key. Never negative, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub key: StockKey,
    pub quantity: Quantity,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    pub fn new(key: StockKey, quantity: Quantity, updated_at: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity,
            updated_at,
        }
    }
}

/// A validated before/after pair for one movement against one key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransition {
    pub key: StockKey,
    pub direction: Direction,
    pub quantity: Quantity,
    pub before: Quantity,
    pub after: Quantity,
}

impl StockTransition {
    /// Signed change (`+` for IN, `-` for OUT).
    pub fn change(&self) -> Quantity {
        self.after - self.before
    }
}

/// Compute the effect of moving `quantity` in `direction` on a row currently
/// holding `before` (zero if the row does not exist yet).
///
/// Fails with `InsufficientStock` when an outbound quantity exceeds `before`;
/// the caller must then write nothing.
pub fn plan_transition(
    key: StockKey,
    before: Quantity,
    direction: Direction,
    quantity: Quantity,
) -> DomainResult<StockTransition> {
    ensure_positive(quantity, "quantity")?;
    if before < Decimal::ZERO {
        return Err(DomainError::invariant(format!(
            "stock {key} holds a negative quantity ({before})"
        )));
    }

    let after = match direction {
        Direction::In => checked_add(before, quantity, "stock quantity")?,
        Direction::Out => {
            if before < quantity {
                return Err(DomainError::insufficient_stock(key.item_id, before, quantity));
            }
            before - quantity
        }
    };

    Ok(StockTransition {
        key,
        direction,
        quantity,
        before,
        after,
    })
}
