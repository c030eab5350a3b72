//! Trade ledger: persisted trades and account balances
//!
//! Monitors only insert; the reconciler is the only writer of existing
//! rows. A trade's realised result reaches the balance exactly once, when
//! its status leaves Open.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::types::{AccountId, Ticket, Trade, TradeClose, TradeStatus};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("trade {0} not found")]
    UnknownTrade(Ticket),
    #[error("trade {0} already recorded")]
    DuplicateTrade(Ticket),
    #[error("trade {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: Ticket,
        from: TradeStatus,
        to: TradeStatus,
    },
    #[error("account {0} not found")]
    UnknownAccount(AccountId),
    #[error("ledger storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("ledger format error: {0}")]
    Format(#[from] serde_json::Error),
}

#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// Register an account; an existing balance is kept. Returns the balance.
    async fn open_account(
        &self,
        account_id: AccountId,
        opening_balance: Decimal,
    ) -> Result<Decimal, LedgerError>;

    async fn insert_trade(&self, trade: Trade) -> Result<(), LedgerError>;

    /// Write the close fields and terminal status of an Open trade
    async fn update_trade_on_close(&self, id: Ticket, close: TradeClose) -> Result<Trade, LedgerError>;

    /// Refresh floating P/L of an Open trade; status is untouched
    async fn update_floating_pnl(&self, id: Ticket, profit: Decimal) -> Result<(), LedgerError>;

    async fn adjust_account_balance(
        &self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError>;

    async fn list_open_trades(&self, account_id: AccountId) -> Result<Vec<Trade>, LedgerError>;

    async fn accounts_with_open_trades(&self) -> Result<Vec<AccountId>, LedgerError>;

    async fn account_balance(&self, account_id: AccountId) -> Result<Option<Decimal>, LedgerError>;

    async fn get_trade(&self, id: Ticket) -> Result<Option<Trade>, LedgerError>;

    /// Close a trade and apply its realised result to the balance
    ///
    /// The balance moves only if the close itself succeeded, so a trade
    /// that already left Open is never applied twice.
    async fn settle_trade(&self, id: Ticket, close: TradeClose) -> Result<Trade, LedgerError> {
        let trade = self.update_trade_on_close(id, close).await?;
        if let Some(profit) = trade.profit_loss {
            self.adjust_account_balance(trade.account_id, profit).await?;
        }
        Ok(trade)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerState {
    trades: BTreeMap<Ticket, Trade>,
    balances: BTreeMap<AccountId, Decimal>,
}

impl LedgerState {
    fn close(&mut self, id: Ticket, close: TradeClose) -> Result<Trade, LedgerError> {
        let trade = self
            .trades
            .get_mut(&id)
            .ok_or(LedgerError::UnknownTrade(id))?;
        if !trade.status.can_transition_to(close.status) {
            return Err(LedgerError::IllegalTransition {
                id,
                from: trade.status,
                to: close.status,
            });
        }
        trade.status = close.status;
        trade.close_price = close.close_price;
        trade.close_time = Some(close.close_time);
        trade.profit_loss = close.profit_loss;
        Ok(trade.clone())
    }

    fn adjust(&mut self, account_id: AccountId, delta: Decimal) -> Result<Decimal, LedgerError> {
        let balance = self
            .balances
            .get_mut(&account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        *balance += delta;
        Ok(*balance)
    }
}

/// Ledger held in memory and mirrored to a JSON file after every change
pub struct JsonLedger {
    state: RwLock<LedgerState>,
    path: Option<PathBuf>,
}

impl JsonLedger {
    /// Non-persistent ledger
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            path: None,
        }
    }

    /// Load `path` if present, otherwise start empty
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path).await {
            Ok(bytes) => {
                let state: LedgerState = serde_json::from_slice(&bytes)?;
                info!(
                    "Loaded ledger from {:?}: {} trades, {} accounts",
                    path,
                    state.trades.len(),
                    state.balances.len()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerState::default(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Write the full state; failures are logged and retried on the next change
    async fn flush(&self, state: &LedgerState) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_atomic(path, state).await {
            error!("Failed to persist ledger to {:?}: {}", path, e);
        }
    }
}

async fn write_atomic(path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, path).await?;
    debug!("Wrote ledger {:?}", path);
    Ok(())
}

#[async_trait]
impl TradeLedger for JsonLedger {
    async fn open_account(
        &self,
        account_id: AccountId,
        opening_balance: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let mut state = self.state.write().await;
        let balance = *state.balances.entry(account_id).or_insert(opening_balance);
        self.flush(&state).await;
        Ok(balance)
    }

    async fn insert_trade(&self, trade: Trade) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        if state.trades.contains_key(&trade.id) {
            return Err(LedgerError::DuplicateTrade(trade.id));
        }
        debug!("Recording trade {} for account {}", trade.id, trade.account_id);
        state.trades.insert(trade.id, trade);
        self.flush(&state).await;
        Ok(())
    }

    async fn update_trade_on_close(&self, id: Ticket, close: TradeClose) -> Result<Trade, LedgerError> {
        let mut state = self.state.write().await;
        let trade = state.close(id, close)?;
        self.flush(&state).await;
        Ok(trade)
    }

    async fn update_floating_pnl(&self, id: Ticket, profit: Decimal) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let trade = state
            .trades
            .get_mut(&id)
            .ok_or(LedgerError::UnknownTrade(id))?;
        if trade.status != TradeStatus::Open || trade.profit_loss == Some(profit) {
            return Ok(());
        }
        trade.profit_loss = Some(profit);
        self.flush(&state).await;
        Ok(())
    }

    async fn adjust_account_balance(
        &self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let mut state = self.state.write().await;
        let balance = state.adjust(account_id, delta)?;
        self.flush(&state).await;
        Ok(balance)
    }

    async fn list_open_trades(&self, account_id: AccountId) -> Result<Vec<Trade>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .trades
            .values()
            .filter(|t| t.account_id == account_id && t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn accounts_with_open_trades(&self) -> Result<Vec<AccountId>, LedgerError> {
        let state = self.state.read().await;
        let mut accounts: Vec<AccountId> = state
            .trades
            .values()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| t.account_id)
            .collect();
        accounts.sort_unstable();
        accounts.dedup();
        Ok(accounts)
    }

    async fn account_balance(&self, account_id: AccountId) -> Result<Option<Decimal>, LedgerError> {
        Ok(self.state.read().await.balances.get(&account_id).copied())
    }

    async fn get_trade(&self, id: Ticket) -> Result<Option<Trade>, LedgerError> {
        Ok(self.state.read().await.trades.get(&id).cloned())
    }

    /// Close and balance change under one lock
    async fn settle_trade(&self, id: Ticket, close: TradeClose) -> Result<Trade, LedgerError> {
        let mut state = self.state.write().await;
        let account_id = state
            .trades
            .get(&id)
            .map(|t| t.account_id)
            .ok_or(LedgerError::UnknownTrade(id))?;
        if !state.balances.contains_key(&account_id) {
            return Err(LedgerError::UnknownAccount(account_id));
        }
        let trade = state.close(id, close)?;
        if let Some(profit) = trade.profit_loss {
            state.adjust(account_id, profit)?;
        }
        self.flush(&state).await;
        Ok(trade)
    }
}
