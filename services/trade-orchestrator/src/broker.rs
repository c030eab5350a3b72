//! Broker terminal abstraction and the in-process paper terminal
//!
//! A terminal holds at most one login at a time. Nothing outside
//! [`crate::session`] calls these methods directly; the session gate
//! serialises every use and guarantees `logout` on all exit paths.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::{
    AccountInfo, Candle, Credentials, Deal, DealEntry, Direction, LivePosition, OrderIntent,
    OrderReceipt, OrderStatus, SymbolInfo, Ticket, Tick,
};

/// Retcode for requests made without an active login
pub const RETCODE_NO_SESSION: i64 = 10004;
/// Retcode for a zero or negative volume
pub const RETCODE_INVALID_VOLUME: i64 = 10014;
/// Retcode for an unknown symbol
pub const RETCODE_INVALID_SYMBOL: i64 = 10013;

/// Single-login broker terminal
///
/// Candle history is on the 15 minute timeframe.
#[async_trait]
pub trait BrokerTerminal: Send + Sync {
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()>;

    /// Synchronous so it can run from `Drop`
    ///
    /// The local session must be gone when this returns. A remote close may
    /// complete later, even after the next `login`, so it has to be scoped to
    /// the session it ends and must never terminate a newer one.
    fn logout(&mut self);

    async fn current_tick(&mut self, symbol: &str) -> anyhow::Result<Option<Tick>>;

    async fn account_info(&mut self) -> anyhow::Result<Option<AccountInfo>>;

    async fn symbol_info(&mut self, symbol: &str) -> anyhow::Result<Option<SymbolInfo>>;

    /// Most recent `count` candles, oldest first
    async fn recent_candles(&mut self, symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>>;

    async fn position_by_ticket(&mut self, ticket: Ticket) -> anyhow::Result<Option<LivePosition>>;

    async fn positions_for_symbol(&mut self, symbol: &str) -> anyhow::Result<Vec<LivePosition>>;

    /// Historical deals belonging to a position, oldest first
    async fn deals_by_position(&mut self, ticket: Ticket) -> anyhow::Result<Vec<Deal>>;

    async fn submit_order(&mut self, intent: &OrderIntent) -> anyhow::Result<OrderReceipt>;
}

/// Steps of the random walk folded into one candle
const STEPS_PER_CANDLE: u32 = 60;
/// Candles generated up front so range stops and the detector have history
const SEED_CANDLES: usize = 200;
const MAX_CANDLES: usize = 2_000;

struct PaperAccount {
    password: String,
    server: String,
    balance: Decimal,
    positions: Vec<PaperPosition>,
    deals: Vec<Deal>,
}

struct PaperPosition {
    live: LivePosition,
    stop_loss: Decimal,
    take_profit: Decimal,
}

/// Simulated terminal for paper trading
///
/// Prices follow a bounded random walk stepped on every tick request.
/// Positions of every account are marked to market on each step and
/// closed when their stop or target is crossed.
pub struct PaperTerminal {
    symbol: SymbolInfo,
    spread: Decimal,
    max_step_points: i64,
    bid: Decimal,
    now: DateTime<Utc>,
    candles: VecDeque<Candle>,
    steps_in_candle: u32,
    accounts: HashMap<u64, PaperAccount>,
    active: Option<u64>,
    next_ticket: u64,
    rng: StdRng,
}

impl PaperTerminal {
    /// Gold-like instrument: point 0.01, contract size 100
    pub fn new(symbol: &str, start_price: Decimal) -> Self {
        Self::with_rng(symbol, start_price, StdRng::from_entropy())
    }

    /// Deterministic price path
    pub fn seeded(symbol: &str, start_price: Decimal, seed: u64) -> Self {
        Self::with_rng(symbol, start_price, StdRng::seed_from_u64(seed))
    }

    fn with_rng(symbol: &str, start_price: Decimal, rng: StdRng) -> Self {
        let point = Decimal::new(1, 2);
        let mut terminal = Self {
            symbol: SymbolInfo {
                symbol: symbol.to_string(),
                point,
                contract_size: Decimal::ONE_HUNDRED,
            },
            spread: point * Decimal::from(20),
            max_step_points: 15,
            bid: start_price,
            now: Utc::now() - ChronoDuration::minutes(15 * SEED_CANDLES as i64),
            candles: VecDeque::with_capacity(MAX_CANDLES),
            steps_in_candle: 0,
            accounts: HashMap::new(),
            active: None,
            next_ticket: 1_000_000,
            rng,
        };
        terminal.open_candle();
        for _ in 0..SEED_CANDLES * STEPS_PER_CANDLE as usize {
            terminal.step();
        }
        terminal
    }

    /// Register a login the terminal will accept
    pub fn with_account(mut self, credentials: &Credentials, balance: Decimal) -> Self {
        self.add_account(credentials, balance);
        self
    }

    pub fn add_account(&mut self, credentials: &Credentials, balance: Decimal) {
        self.accounts.insert(
            credentials.login,
            PaperAccount {
                password: credentials.password.clone(),
                server: credentials.server.clone(),
                balance,
                positions: Vec::new(),
                deals: Vec::new(),
            },
        );
    }

    fn ask(&self) -> Decimal {
        self.bid + self.spread
    }

    fn tick(&self) -> Tick {
        Tick {
            bid: self.bid,
            ask: self.ask(),
            time: self.now,
        }
    }

    fn open_candle(&mut self) {
        if self.candles.len() == MAX_CANDLES {
            self.candles.pop_front();
        }
        self.candles.push_back(Candle {
            time: self.now,
            open: self.bid,
            high: self.bid,
            low: self.bid,
            close: self.bid,
            volume: 0,
        });
        self.steps_in_candle = 0;
    }

    /// Advance the walk one step and settle positions
    fn step(&mut self) {
        let points = self.rng.gen_range(-self.max_step_points..=self.max_step_points);
        let next = self.bid + self.symbol.point * Decimal::from(points);
        if next > self.spread {
            self.bid = next;
        }
        self.now += ChronoDuration::seconds(15);

        if self.steps_in_candle >= STEPS_PER_CANDLE {
            self.open_candle();
        }
        if let Some(candle) = self.candles.back_mut() {
            candle.high = candle.high.max(self.bid);
            candle.low = candle.low.min(self.bid);
            candle.close = self.bid;
            candle.volume += 1;
        }
        self.steps_in_candle += 1;
        self.settle_positions();
    }

    fn settle_positions(&mut self) {
        let tick = self.tick();
        let contract = self.symbol.contract_size;
        let mut next_deal = self.next_ticket;

        for account in self.accounts.values_mut() {
            let mut still_open = Vec::with_capacity(account.positions.len());
            for mut pos in account.positions.drain(..) {
                let exit = tick.entry_price(pos.live.direction.opposite());
                pos.live.profit = position_profit(&pos.live, exit, contract);

                let crossed = match pos.live.direction {
                    Direction::Long => exit <= pos.stop_loss || exit >= pos.take_profit,
                    Direction::Short => exit >= pos.stop_loss || exit <= pos.take_profit,
                };
                if crossed {
                    next_deal += 1;
                    account.balance += pos.live.profit;
                    account.deals.push(Deal {
                        ticket: next_deal,
                        position_id: pos.live.ticket,
                        entry: DealEntry::Out,
                        time: tick.time,
                        price: exit,
                        profit: pos.live.profit,
                        swap: Decimal::ZERO,
                        commission: Decimal::ZERO,
                    });
                    debug!("Paper position {} closed at {}", pos.live.ticket, exit);
                } else {
                    still_open.push(pos);
                }
            }
            account.positions = still_open;
        }
        self.next_ticket = next_deal;
    }

    fn active_account(&mut self) -> anyhow::Result<&mut PaperAccount> {
        let login = self
            .active
            .ok_or_else(|| anyhow::anyhow!("No active session"))?;
        self.accounts
            .get_mut(&login)
            .ok_or_else(|| anyhow::anyhow!("Account {} vanished", login))
    }

    fn rejected(code: i64, reason: &str) -> OrderReceipt {
        OrderReceipt {
            ticket: None,
            fill_price: None,
            status: OrderStatus::Rejected {
                code,
                reason: reason.to_string(),
            },
        }
    }
}

fn position_profit(pos: &LivePosition, exit: Decimal, contract: Decimal) -> Decimal {
    let diff = match pos.direction {
        Direction::Long => exit - pos.open_price,
        Direction::Short => pos.open_price - exit,
    };
    (diff * pos.volume * contract).round_dp(2)
}

#[async_trait]
impl BrokerTerminal for PaperTerminal {
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        let account = self
            .accounts
            .get(&credentials.login)
            .ok_or_else(|| anyhow::anyhow!("Unknown login {}", credentials.login))?;
        if account.password != credentials.password || account.server != credentials.server {
            return Err(anyhow::anyhow!(
                "Authorization failed for login {}",
                credentials.login
            ));
        }
        self.active = Some(credentials.login);
        Ok(())
    }

    fn logout(&mut self) {
        self.active = None;
    }

    async fn current_tick(&mut self, symbol: &str) -> anyhow::Result<Option<Tick>> {
        self.active_account()?;
        if symbol != self.symbol.symbol {
            return Ok(None);
        }
        self.step();
        Ok(Some(self.tick()))
    }

    async fn account_info(&mut self) -> anyhow::Result<Option<AccountInfo>> {
        let login = self.active;
        let account = self.active_account()?;
        let floating: Decimal = account.positions.iter().map(|p| p.live.profit).sum();
        Ok(login.map(|login| AccountInfo {
            login,
            balance: account.balance,
            equity: account.balance + floating,
            currency: "USD".to_string(),
            server: account.server.clone(),
        }))
    }

    async fn symbol_info(&mut self, symbol: &str) -> anyhow::Result<Option<SymbolInfo>> {
        self.active_account()?;
        Ok((symbol == self.symbol.symbol).then(|| self.symbol.clone()))
    }

    async fn recent_candles(&mut self, symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>> {
        self.active_account()?;
        if symbol != self.symbol.symbol {
            return Ok(Vec::new());
        }
        let skip = self.candles.len().saturating_sub(count);
        Ok(self.candles.iter().skip(skip).copied().collect())
    }

    async fn position_by_ticket(&mut self, ticket: Ticket) -> anyhow::Result<Option<LivePosition>> {
        let account = self.active_account()?;
        Ok(account
            .positions
            .iter()
            .find(|p| p.live.ticket == ticket)
            .map(|p| p.live.clone()))
    }

    async fn positions_for_symbol(&mut self, symbol: &str) -> anyhow::Result<Vec<LivePosition>> {
        let account = self.active_account()?;
        Ok(account
            .positions
            .iter()
            .filter(|p| p.live.symbol == symbol)
            .map(|p| p.live.clone())
            .collect())
    }

    async fn deals_by_position(&mut self, ticket: Ticket) -> anyhow::Result<Vec<Deal>> {
        let account = self.active_account()?;
        Ok(account
            .deals
            .iter()
            .filter(|d| d.position_id == ticket)
            .cloned()
            .collect())
    }

    async fn submit_order(&mut self, intent: &OrderIntent) -> anyhow::Result<OrderReceipt> {
        if self.active.is_none() {
            return Ok(Self::rejected(RETCODE_NO_SESSION, "no active session"));
        }
        if intent.symbol != self.symbol.symbol {
            return Ok(Self::rejected(RETCODE_INVALID_SYMBOL, "unknown symbol"));
        }
        if intent.lot_size <= Decimal::ZERO {
            return Ok(Self::rejected(RETCODE_INVALID_VOLUME, "invalid volume"));
        }

        let fill = self.tick().entry_price(intent.direction);
        let now = self.now;
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let deal_ticket = self.next_ticket;

        let account = self.active_account()?;
        account.deals.push(Deal {
            ticket: deal_ticket,
            position_id: ticket,
            entry: DealEntry::In,
            time: now,
            price: fill,
            profit: Decimal::ZERO,
            swap: Decimal::ZERO,
            commission: Decimal::ZERO,
        });
        account.positions.push(PaperPosition {
            live: LivePosition {
                ticket,
                symbol: intent.symbol.clone(),
                direction: intent.direction,
                volume: intent.lot_size,
                open_price: fill,
                profit: Decimal::ZERO,
            },
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
        });

        Ok(OrderReceipt {
            ticket: Some(ticket),
            fill_price: Some(fill),
            status: OrderStatus::Filled,
        })
    }
}
