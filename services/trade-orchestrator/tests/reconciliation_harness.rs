//! Reconciliation harness: ledger settlement against a scripted terminal


use chrono::Utc;
use mock_terminal::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use trade_orchestrator::ledger::{JsonLedger, TradeLedger};
use trade_orchestrator::notify::NoopNotifier;
use trade_orchestrator::types::{Direction, LivePosition, Ticket, Trade, TradeStatus};
use trade_orchestrator::{SessionGate, Strategy, TradeReconciler};

fn open_trade(id: Ticket, account_id: u64) -> Trade {
    Trade {
        id,
        account_id,
        symbol: "XAUUSD".to_string(),
        strategy: Strategy::Simple.tag().to_string(),
        direction: Direction::Long,
        lot_size: d("0.05"),
        open_price: d("2000"),
        open_time: Utc::now(),
        stop_loss: d("1997"),
        take_profit: d("2009"),
        close_price: None,
        close_time: None,
        profit_loss: None,
        status: TradeStatus::Open,
    }
}

fn live(ticket: Ticket, profit: Decimal) -> LivePosition {
    LivePosition {
        ticket,
        symbol: "XAUUSD".to_string(),
        direction: Direction::Long,
        volume: d("0.05"),
        open_price: d("2000"),
        profit,
    }
}

struct Harness {
    state: SharedState,
    ledger: Arc<JsonLedger>,
    reconciler: TradeReconciler,
}

async fn harness(account_ids: &[u64]) -> Harness {
    let terminal = MockTerminal::new();
    let state = terminal.state();
    let gate = Arc::new(SessionGate::new(terminal));
    let ledger = Arc::new(JsonLedger::in_memory());
    let accounts: Vec<_> = account_ids
        .iter()
        .map(|id| account(*id, Strategy::Simple))
        .collect();
    for account in &accounts {
        ledger.open_account(account.id, Decimal::from(1000)).await.unwrap();
    }
    let reconciler = TradeReconciler::new(gate, ledger.clone(), Arc::new(NoopNotifier), accounts);
    Harness {
        state,
        ledger,
        reconciler,
    }
}

#[tokio::test]
async fn test_live_position_refreshes_floating_pnl() {
    let h = harness(&[1]).await;
    h.ledger.insert_trade(open_trade(501, 1)).await.unwrap();
    h.state.lock().unwrap().positions.insert(501, live(501, d("14.5")));

    let result = h.reconciler.reconcile().await.unwrap();
    assert_eq!(result.still_open, vec![501]);
    let trade = h.ledger.get_trade(501).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Open);
    assert_eq!(trade.profit_loss, Some(d("14.5")));
    assert_eq!(h.ledger.account_balance(1).await.unwrap(), Some(Decimal::from(1000)));
}

#[tokio::test]
async fn test_closed_position_settles_net_result_once() {
    let h = harness(&[1]).await;
    h.ledger.insert_trade(open_trade(501, 1)).await.unwrap();
    h.state
        .lock()
        .unwrap()
        .deals
        .insert(501, closing_deals(501, "45", "-1.2", "-0.8"));

    let result = h.reconciler.reconcile().await.unwrap();
    assert_eq!(result.closed.len(), 1);
    assert_eq!(result.closed[0].status, TradeStatus::Winning);
    assert_eq!(result.closed[0].profit_loss, Some(d("43")));

    let trade = h.ledger.get_trade(501).await.unwrap().unwrap();
    assert_eq!(trade.close_price, Some(d("2004.5")));
    assert_eq!(h.ledger.account_balance(1).await.unwrap(), Some(d("1043")));

    // Later passes find nothing Open and leave the balance alone
    for _ in 0..3 {
        let again = h.reconciler.reconcile().await.unwrap();
        assert!(again.closed.is_empty());
    }
    assert_eq!(h.ledger.account_balance(1).await.unwrap(), Some(d("1043")));
}

#[tokio::test]
async fn test_losing_close_is_marked_losing() {
    let h = harness(&[1]).await;
    h.ledger.insert_trade(open_trade(502, 1)).await.unwrap();
    h.state
        .lock()
        .unwrap()
        .deals
        .insert(502, closing_deals(502, "-30", "0", "-0.5"));

    h.reconciler.reconcile().await.unwrap();
    let trade = h.ledger.get_trade(502).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Losing);
    assert_eq!(h.ledger.account_balance(1).await.unwrap(), Some(d("969.5")));
}

#[tokio::test]
async fn test_vanished_ticket_closes_without_pnl() {
    let h = harness(&[1]).await;
    h.ledger.insert_trade(open_trade(503, 1)).await.unwrap();

    let result = tokio_test::assert_ok!(h.reconciler.reconcile().await);
    assert_eq!(result.unresolved, vec![503]);
    assert!(result.closed.is_empty());

    let trade = h.ledger.get_trade(503).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.profit_loss, None);
    assert_eq!(h.ledger.account_balance(1).await.unwrap(), Some(Decimal::from(1000)));
}

#[tokio::test]
async fn test_failed_query_leaves_trade_open() {
    let h = harness(&[1]).await;
    h.ledger.insert_trade(open_trade(504, 1)).await.unwrap();
    h.state.lock().unwrap().failing_tickets.insert(504);

    h.reconciler.reconcile().await.unwrap();
    let trade = h.ledger.get_trade(504).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Open);
}

#[tokio::test]
async fn test_login_failure_skips_account() {
    let h = harness(&[1, 2]).await;
    h.ledger.insert_trade(open_trade(601, 1)).await.unwrap();
    h.ledger.insert_trade(open_trade(602, 2)).await.unwrap();
    {
        let mut state = h.state.lock().unwrap();
        state.failing_logins.insert(1001);
        state.deals.insert(601, closing_deals(601, "10", "0", "0"));
        state.deals.insert(602, closing_deals(602, "20", "0", "0"));
    }

    let result = tokio_test::assert_ok!(h.reconciler.reconcile().await);
    assert_eq!(result.skipped_accounts, vec![1]);
    assert_eq!(result.closed.len(), 1);
    assert_eq!(h.ledger.get_trade(601).await.unwrap().unwrap().status, TradeStatus::Open);
    assert_eq!(h.ledger.account_balance(2).await.unwrap(), Some(d("1020")));
}

#[tokio::test]
async fn test_random_broker_histories_settle_forward_only() {
    let mut rng = StdRng::seed_from_u64(2026);

    for _round in 0..20 {
        let h = harness(&[1, 2, 3]).await;
        let tickets: Vec<Ticket> = (0..12).map(|i| 700 + i).collect();
        for (i, ticket) in tickets.iter().enumerate() {
            h.ledger
                .insert_trade(open_trade(*ticket, 1 + (i as u64 % 3)))
                .await
                .unwrap();
        }

        let mut history: HashMap<Ticket, Vec<TradeStatus>> = HashMap::new();
        let mut realised: HashMap<u64, Decimal> = HashMap::new();
        let mut settled: HashMap<Ticket, Decimal> = HashMap::new();

        for _pass in 0..6 {
            {
                let mut state = h.state.lock().unwrap();
                for ticket in &tickets {
                    // The broker may report anything, including a close followed by a stale position
                    match rng.gen_range(0..4) {
                        0 => {
                            let profit = Decimal::new(rng.gen_range(-5000..5000), 2);
                            state.positions.insert(*ticket, live(*ticket, profit));
                        }
                        1 => {
                            state.positions.remove(ticket);
                            let profit = Decimal::new(rng.gen_range(-5000..5000), 2);
                            state.deals.insert(
                                *ticket,
                                closing_deals(*ticket, &profit.to_string(), "0", "-0.5"),
                            );
                        }
                        2 => {
                            state.positions.remove(ticket);
                            state.deals.remove(ticket);
                        }
                        _ => {}
                    }
                }
            }

            let deals_now: HashMap<Ticket, Decimal> = {
                let state = h.state.lock().unwrap();
                state
                    .deals
                    .iter()
                    .map(|(t, deals)| (*t, deals.iter().map(|d| d.net()).sum()))
                    .collect()
            };
            let result = h.reconciler.reconcile().await.unwrap();
            for closed in &result.closed {
                let profit = closed.profit_loss.unwrap();
                assert_eq!(deals_now.get(&closed.ticket), Some(&profit));
                assert!(settled.insert(closed.ticket, profit).is_none());
                *realised.entry(closed.account_id).or_default() += profit;
            }

            for ticket in &tickets {
                let status = h.ledger.get_trade(*ticket).await.unwrap().unwrap().status;
                history.entry(*ticket).or_default().push(status);
            }
        }

        for (ticket, statuses) in &history {
            if let Some(first_terminal) = statuses.iter().position(|s| s.is_terminal()) {
                assert!(
                    statuses[first_terminal..].iter().all(|s| *s == statuses[first_terminal]),
                    "ticket {} changed after settling: {:?}",
                    ticket,
                    statuses
                );
            }
        }
        for account_id in 1..=3u64 {
            let expected = Decimal::from(1000) + realised.get(&account_id).copied().unwrap_or_default();
            assert_eq!(h.ledger.account_balance(account_id).await.unwrap(), Some(expected));
        }
    }
}
