//! Trade reconciliation: sync ledger trades with the broker's view
//!
//! Terminal reads happen inside one gate session per account; ledger
//! writes are applied after the session is closed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountProfile;
use crate::broker::BrokerTerminal;
use crate::ledger::{LedgerError, TradeLedger};
use crate::notify::Notifier;
use crate::session::SessionGate;
use crate::shutdown::Shutdown;
use crate::types::{AccountId, DealEntry, Ticket, Trade, TradeClose, TradeStatus};

/// Broker's view of one ledger trade
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Still a live position
    Open { profit: Decimal },
    /// Found in deal history
    Closed(TradeClose),
    /// Neither live nor in history
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub ticket: Ticket,
    pub account_id: AccountId,
    pub status: TradeStatus,
    pub profit_loss: Option<Decimal>,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconciliationResult {
    pub timestamp: Option<DateTime<Utc>>,
    /// Trades whose floating P/L was refreshed
    pub still_open: Vec<Ticket>,
    /// Trades settled with a realised result
    pub closed: Vec<ClosedTrade>,
    /// Trades closed without a P/L figure
    pub unresolved: Vec<Ticket>,
    /// Accounts whose session could not be used this pass
    pub skipped_accounts: Vec<AccountId>,
}

/// Reconciler that periodically settles trades closed at the broker
pub struct TradeReconciler {
    gate: Arc<SessionGate>,
    ledger: Arc<dyn TradeLedger>,
    notifier: Arc<dyn Notifier>,
    accounts: HashMap<AccountId, AccountProfile>,
    interval: Duration,
}

impl TradeReconciler {
    pub fn new(
        gate: Arc<SessionGate>,
        ledger: Arc<dyn TradeLedger>,
        notifier: Arc<dyn Notifier>,
        accounts: Vec<AccountProfile>,
    ) -> Self {
        Self {
            gate,
            ledger,
            notifier,
            accounts: accounts.into_iter().map(|a| (a.id, a)).collect(),
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        info!("Trade reconciler started (every {:?})", self.interval);

        while !shutdown.is_triggered() {
            if let Err(e) = self.reconcile().await {
                error!("Reconciliation error: {:#}", e);
            }
            if shutdown.sleep(self.interval).await {
                break;
            }
        }

        info!("Trade reconciler stopped");
    }

    /// One pass over every account holding Open trades
    pub async fn reconcile(&self) -> anyhow::Result<ReconciliationResult> {
        let mut result = ReconciliationResult {
            timestamp: Some(Utc::now()),
            ..Default::default()
        };

        for account_id in self.ledger.accounts_with_open_trades().await? {
            let Some(account) = self.accounts.get(&account_id) else {
                debug!("Open trades for unmanaged account {}", account_id);
                result.skipped_accounts.push(account_id);
                continue;
            };
            let trades = self.ledger.list_open_trades(account_id).await?;
            if trades.is_empty() {
                continue;
            }

            let observed = self
                .gate
                .with_session(&account.credentials, |mut session| {
                    let trades = &trades;
                    async move { Ok(observe_all(&mut *session, trades).await) }
                })
                .await;

            match observed {
                Some(observations) => {
                    for (trade, observation) in trades.iter().zip(observations) {
                        if let Some(observation) = observation {
                            self.apply(account, trade, observation, &mut result).await;
                        }
                    }
                }
                None => result.skipped_accounts.push(account_id),
            }
        }

        if !result.closed.is_empty() || !result.unresolved.is_empty() {
            info!(
                "Reconciliation complete: {} open, {} closed, {} unresolved",
                result.still_open.len(),
                result.closed.len(),
                result.unresolved.len()
            );
        }
        Ok(result)
    }

    async fn apply(
        &self,
        account: &AccountProfile,
        trade: &Trade,
        observation: Observation,
        result: &mut ReconciliationResult,
    ) {
        match observation {
            Observation::Open { profit } => {
                if let Err(e) = self.ledger.update_floating_pnl(trade.id, profit).await {
                    warn!("Failed to refresh P/L of trade {}: {}", trade.id, e);
                }
                result.still_open.push(trade.id);
            }
            Observation::Closed(close) => match self.ledger.settle_trade(trade.id, close).await {
                Ok(settled) => {
                    info!(
                        "Trade {} closed: {} {}",
                        settled.id,
                        settled.status,
                        settled.profit_loss.unwrap_or_default()
                    );
                    self.announce_close(account, &settled);
                    result.closed.push(ClosedTrade {
                        ticket: settled.id,
                        account_id: settled.account_id,
                        status: settled.status,
                        profit_loss: settled.profit_loss,
                    });
                }
                Err(LedgerError::IllegalTransition { .. }) => {
                    debug!("Trade {} already settled", trade.id);
                }
                Err(e) => error!("Failed to settle trade {}: {}", trade.id, e),
            },
            Observation::Missing => {
                warn!(
                    "Trade {} vanished from positions and history; marking Closed without P/L",
                    trade.id
                );
                let close = TradeClose {
                    close_price: None,
                    close_time: Utc::now(),
                    profit_loss: None,
                    status: TradeStatus::Closed,
                };
                match self.ledger.settle_trade(trade.id, close).await {
                    Ok(_) => result.unresolved.push(trade.id),
                    Err(e) => error!("Failed to close trade {}: {}", trade.id, e),
                }
            }
        }
    }

    fn announce_close(&self, account: &AccountProfile, trade: &Trade) {
        let Some(token) = &account.push_token else {
            return;
        };
        let profit = trade.profit_loss.unwrap_or_default();
        self.notifier.notify(
            token,
            "Trade Closed",
            &format!("{} #{} {} {}", trade.symbol, trade.id, trade.status, profit),
            serde_json::json!({ "ticket": trade.id, "account_id": trade.account_id }),
        );
    }
}

/// Observe every trade; a failed query leaves that trade untouched (`None`)
async fn observe_all(session: &mut dyn BrokerTerminal, trades: &[Trade]) -> Vec<Option<Observation>> {
    let mut observations = Vec::with_capacity(trades.len());
    for trade in trades {
        match observe(session, trade.id).await {
            Ok(observation) => observations.push(Some(observation)),
            Err(e) => {
                warn!("Could not query trade {}: {}", trade.id, e);
                observations.push(None);
            }
        }
    }
    observations
}

pub async fn observe(session: &mut dyn BrokerTerminal, ticket: Ticket) -> anyhow::Result<Observation> {
    if let Some(position) = session.position_by_ticket(ticket).await? {
        return Ok(Observation::Open {
            profit: position.profit,
        });
    }

    let mut deals = session.deals_by_position(ticket).await?;
    if deals.is_empty() {
        return Ok(Observation::Missing);
    }
    deals.sort_by_key(|d| d.time);

    let total: Decimal = deals.iter().map(|d| d.net()).sum();
    // Prefer the exit deal; fall back to the latest record
    let closing = deals
        .iter()
        .rev()
        .find(|d| d.entry == DealEntry::Out)
        .or_else(|| deals.last());

    Ok(Observation::Closed(TradeClose {
        close_price: closing.map(|d| d.price),
        close_time: closing.map(|d| d.time).unwrap_or_else(Utc::now),
        profit_loss: Some(total),
        status: TradeStatus::from_profit(total),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTerminal;
    use crate::types::{Credentials, Direction, OrderIntent};

    fn creds() -> Credentials {
        Credentials {
            login: 1,
            password: "pw".to_string(),
            server: "Paper".to_string(),
        }
    }

    #[tokio::test]
    async fn test_observe_open_then_closed() {
        let mut terminal =
            PaperTerminal::seeded("XAUUSD", Decimal::from(2000), 11).with_account(&creds(), Decimal::from(1000));
        terminal.login(&creds()).await.unwrap();
        let tick = terminal.current_tick("XAUUSD").await.unwrap().unwrap();
        let receipt = terminal
            .submit_order(&OrderIntent {
                symbol: "XAUUSD".to_string(),
                direction: Direction::Short,
                entry_price: tick.bid,
                stop_loss: tick.ask,
                take_profit: Decimal::ONE,
                lot_size: Decimal::new(1, 2),
                tag: "Voting".to_string(),
                magic: 234_001,
            })
            .await
            .unwrap();
        let (ticket, _) = receipt.confirmed_fill().unwrap();

        assert!(matches!(
            observe(&mut terminal, ticket).await.unwrap(),
            Observation::Open { .. }
        ));

        for _ in 0..10_000 {
            terminal.current_tick("XAUUSD").await.unwrap();
            if terminal.position_by_ticket(ticket).await.unwrap().is_none() {
                break;
            }
        }
        match observe(&mut terminal, ticket).await.unwrap() {
            Observation::Closed(close) => {
                let profit = close.profit_loss.unwrap();
                assert_eq!(close.status, TradeStatus::from_profit(profit));
                assert!(close.close_price.is_some());
            }
            other => panic!("expected closed, got {:?}", other),
        }

        assert_eq!(observe(&mut terminal, 424242).await.unwrap(), Observation::Missing);
    }
}
