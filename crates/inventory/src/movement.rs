use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::decimal::{ensure_non_negative, ensure_positive};
use stockledger_core::{
    BinId, DomainError, DomainResult, ItemId, Money, MovementId, Quantity, UserId, WarehouseId,
};

use crate::stock::{Direction, StockKey};

/// Maximum length of a movement reason.
pub const MAX_REASON_LEN: usize = 255;

/// A requested change in quantity, before validation against master data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub bin_id: Option<BinId>,
    pub direction: Direction,
    pub quantity: Quantity,
    /// Purchase price per unit; only meaningful on inbound movements.
    pub unit_price: Option<Money>,
    pub reason: String,
    /// When the physical movement happened. Defaults to the time of posting.
    pub happened_at: Option<DateTime<Utc>>,
}

impl MovementRequest {
    pub fn new(key: StockKey, direction: Direction, quantity: Quantity) -> Self {
        Self {
            item_id: key.item_id,
            warehouse_id: key.warehouse_id,
            bin_id: key.bin_id,
            direction,
            quantity,
            unit_price: None,
            reason: String::new(),
            happened_at: None,
        }
    }

    pub fn inbound(key: StockKey, quantity: Quantity) -> Self {
        Self::new(key, Direction::In, quantity)
    }

    pub fn outbound(key: StockKey, quantity: Quantity) -> Self {
        Self::new(key, Direction::Out, quantity)
    }

    pub fn with_unit_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_happened_at(mut self, happened_at: DateTime<Utc>) -> Self {
        self.happened_at = Some(happened_at);
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id, self.bin_id)
    }

    /// Shape checks that need no master data.
    pub fn validate(&self) -> DomainResult<()> {
        ensure_positive(self.quantity, "quantity")?;

        if let Some(price) = self.unit_price {
            if self.direction == Direction::Out {
                return Err(DomainError::invalid_input(
                    "unit price is only accepted on inbound movements",
                ));
            }
            ensure_non_negative(price, "unit_price")?;
        }

        if self.reason.chars().count() > MAX_REASON_LEN {
            return Err(DomainError::invalid_input(format!(
                "reason exceeds {MAX_REASON_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// An immutable record of one successfully validated movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub bin_id: Option<BinId>,
    pub direction: Direction,
    pub quantity: Quantity,
    pub unit_price: Option<Money>,
    pub reason: String,
    pub happened_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl StockMovement {
    pub fn from_request(request: &MovementRequest, created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: MovementId::new(),
            item_id: request.item_id,
            warehouse_id: request.warehouse_id,
            bin_id: request.bin_id,
            direction: request.direction,
            quantity: request.quantity,
            unit_price: request.unit_price,
            reason: request.reason.trim().to_string(),
            happened_at: request.happened_at.unwrap_or(now),
            created_at: now,
            created_by,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id, self.bin_id)
    }

    /// Signed quantity (`+` for IN, `-` for OUT).
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * self.direction.sign()
    }
}
