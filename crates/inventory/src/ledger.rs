//! Stock ledger (journal).
//!
//! One entry per movement, append-only. For a fixed [`StockKey`], entries in
//! journal order form a chain: each entry starts where the previous one ended,
//! and the first one starts at zero (a stock row is created by its first
//! movement). Summing `quantity_change` over the chain reproduces the stock
//! projection exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{
    BinId, DomainError, DomainResult, ItemId, LedgerEntryId, MovementId, Quantity, UserId,
    WarehouseId,
};

use crate::movement::StockMovement;
use crate::stock::{Direction, StockKey, StockTransition};

/// An immutable journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub movement_id: MovementId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub bin_id: Option<BinId>,
    pub direction: Direction,
    /// Signed: positive for IN, negative for OUT.
    pub quantity_change: Quantity,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    pub happened_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub recorded_by: UserId,
    /// Store-assigned journal position; `None` until the entry is committed.
    pub sequence: Option<i64>,
}

impl LedgerEntry {
    /// Build the entry that journals `movement` as `transition`.
    pub fn for_movement(
        movement: &StockMovement,
        transition: &StockTransition,
        recorded_by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if movement.key() != transition.key
            || movement.direction != transition.direction
            || movement.quantity != transition.quantity
        {
            return Err(DomainError::invariant(format!(
                "movement {} does not match its stock transition",
                movement.id
            )));
        }

        Ok(Self {
            id: LedgerEntryId::new(),
            movement_id: movement.id,
            item_id: movement.item_id,
            warehouse_id: movement.warehouse_id,
            bin_id: movement.bin_id,
            direction: movement.direction,
            quantity_change: transition.change(),
            quantity_before: transition.before,
            quantity_after: transition.after,
            happened_at: movement.happened_at,
            recorded_at: now,
            recorded_by,
            sequence: None,
        })
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id, self.bin_id)
    }
}

/// The first place where a journal stops being a valid chain.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainBreak {
    #[error("entry {position} ({entry_id}) starts at {actual_before}, expected {expected_before}")]
    Discontinuity {
        position: usize,
        entry_id: LedgerEntryId,
        expected_before: Quantity,
        actual_before: Quantity,
    },

    #[error("entry {position} ({entry_id}): {before} + {change} != {after}")]
    Arithmetic {
        position: usize,
        entry_id: LedgerEntryId,
        before: Quantity,
        change: Quantity,
        after: Quantity,
    },

    #[error("entry {position} ({entry_id}) leaves a negative quantity ({after})")]
    Negative {
        position: usize,
        entry_id: LedgerEntryId,
        after: Quantity,
    },
}

impl ChainBreak {
    pub fn position(&self) -> usize {
        match self {
            ChainBreak::Discontinuity { position, .. }
            | ChainBreak::Arithmetic { position, .. }
            | ChainBreak::Negative { position, .. } => *position,
        }
    }
}

/// Check the chain invariant over one key's entries in journal order.
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<(), ChainBreak> {
    let mut expected_before = Decimal::ZERO;

    for (position, entry) in entries.iter().enumerate() {
        if entry.quantity_before != expected_before {
            return Err(ChainBreak::Discontinuity {
                position,
                entry_id: entry.id,
                expected_before,
                actual_before: entry.quantity_before,
            });
        }
        if entry.quantity_before + entry.quantity_change != entry.quantity_after {
            return Err(ChainBreak::Arithmetic {
                position,
                entry_id: entry.id,
                before: entry.quantity_before,
                change: entry.quantity_change,
                after: entry.quantity_after,
            });
        }
        if entry.quantity_after < Decimal::ZERO {
            return Err(ChainBreak::Negative {
                position,
                entry_id: entry.id,
                after: entry.quantity_after,
            });
        }
        expected_before = entry.quantity_after;
    }

    Ok(())
}

/// Sum of signed changes: the quantity the journal says the key holds.
pub fn replay(entries: &[LedgerEntry]) -> Quantity {
    entries
        .iter()
        .fold(Decimal::ZERO, |acc, e| acc + e.quantity_change)
}
