//! Checks the stock projection against its journal.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{instrument, warn};

use stockledger_core::{ItemId, Quantity};
use stockledger_inventory::{ChainBreak, LedgerEntry, StockKey, replay, verify_chain};

use super::error::LedgerError;
use crate::store::{LedgerRepository, StockRepository, Store, UnitOfWork, UnitOfWorkManager};

/// Outcome of replaying one key's journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub key: StockKey,
    /// Projected quantity (0 when there is no stock row).
    pub stock_quantity: Quantity,
    /// Sum of the journal's signed changes.
    pub ledger_quantity: Quantity,
    pub entries: usize,
    pub chain_break: Option<ChainBreak>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.chain_break.is_none() && self.stock_quantity == self.ledger_quantity
    }
}

async fn reconcile_key<T: UnitOfWork>(
    tx: &mut T,
    key: StockKey,
) -> Result<ReconciliationReport, LedgerError> {
    let stock_quantity = tx
        .get_stock(key)
        .await?
        .map(|stock| stock.quantity)
        .unwrap_or(Decimal::ZERO);
    let entries: Vec<LedgerEntry> = tx.ledger_for(key).await?;

    let report = ReconciliationReport {
        key,
        stock_quantity,
        ledger_quantity: replay(&entries),
        entries: entries.len(),
        chain_break: verify_chain(&entries).err(),
    };
    if !report.is_consistent() {
        warn!(
            key = %key,
            stock = %report.stock_quantity,
            ledger = %report.ledger_quantity,
            chain_break = ?report.chain_break,
            "stock does not reconcile with its ledger"
        );
    }
    Ok(report)
}

async fn reconcile_item_in_tx<T: UnitOfWork>(
    tx: &mut T,
    item_id: ItemId,
) -> Result<Vec<ReconciliationReport>, LedgerError> {
    let keys: Vec<StockKey> = tx
        .stock_for_item(item_id)
        .await?
        .into_iter()
        .map(|stock| stock.key)
        .collect();

    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        reports.push(reconcile_key(tx, key).await?);
    }
    Ok(reports)
}

/// Read-only journal verification.
///
/// Each call reads from one snapshot, so movements committing concurrently
/// cannot make a consistent key look inconsistent.
pub struct ReconciliationService<S: Store> {
    uow: UnitOfWorkManager<S>,
}

impl<S: Store> Clone for ReconciliationService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
        }
    }
}

impl<S: Store> ReconciliationService<S> {
    pub fn new(uow: UnitOfWorkManager<S>) -> Self {
        Self { uow }
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn reconcile(&self, key: StockKey) -> Result<ReconciliationReport, LedgerError> {
        self.uow
            .snapshot(move |tx| Box::pin(reconcile_key(tx, key)))
            .await
    }

    /// One report per stock row of the item.
    #[instrument(skip(self), err)]
    pub async fn reconcile_item(
        &self,
        item_id: ItemId,
    ) -> Result<Vec<ReconciliationReport>, LedgerError> {
        self.uow
            .snapshot(move |tx| Box::pin(reconcile_item_in_tx(tx, item_id)))
            .await
    }
}
