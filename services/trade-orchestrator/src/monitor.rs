//! Strategy monitor: one polling loop per account
//!
//! Each tick's broker work runs inside one gate session and never sleeps
//! there. Journal outcomes and ledger writes for the tick happen after the
//! session is closed, as does waiting between ticks.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::accounts::AccountProfile;
use crate::broker::BrokerTerminal;
use crate::config::{Settings, StopSettings};
use crate::intent::{build_intent, UsedZones};
use crate::journal::{AttemptOutcome, TradeAttempt, TradeJournal};
use crate::ledger::TradeLedger;
use crate::notify::Notifier;
use crate::session::{SessionGate, SessionGuard};
use crate::shutdown::Shutdown;
use crate::signals::SignalSource;
use crate::sizing::{fixed_stops, range_stops, size_order, zone_stops, StopPlan};
use crate::strategy::{self, Strategy};
use crate::types::{
    DirectionalSignal, Direction, OrderIntent, OrderStatus, SymbolInfo, Tick, Ticket, Trade,
    TradeStatus, VotingSignal, Zone,
};
use crate::zones::ZoneCache;

/// Collaborators shared by every monitor
#[derive(Clone)]
pub struct MonitorContext {
    pub gate: Arc<SessionGate>,
    pub zones: Arc<ZoneCache>,
    pub signals: Arc<dyn SignalSource>,
    pub ledger: Arc<dyn TradeLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<TradeJournal>,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub symbol: String,
    pub strong_threshold: u8,
    pub auto_trading: bool,
    pub tick_interval: Duration,
    pub voting_cooldown: Duration,
    pub stops: StopSettings,
}

impl MonitorSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            symbol: settings.symbol.clone(),
            strong_threshold: settings.strong_threshold,
            auto_trading: settings.auto_trading,
            tick_interval: settings.intervals.monitor_tick(),
            voting_cooldown: settings.intervals.voting_cooldown(),
            stops: settings.stops,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No bid/ask available
    NoPrice,
    /// Voting only: a position is already open
    PositionOpen,
    /// Nothing qualified
    NoEntry,
    /// Auto-trading disabled; the intent was only logged
    Recommended {
        zone_id: Option<String>,
        intent: OrderIntent,
    },
    Filled {
        zone_id: Option<String>,
        ticket: Ticket,
        fill_price: Decimal,
    },
    Rejected {
        zone_id: Option<String>,
        code: i64,
        reason: String,
    },
}

/// An order built during a tick, still to be journalled once the session closes
struct Attempted {
    attempt: TradeAttempt,
    intent: OrderIntent,
}

type Evaluation = (TickOutcome, Option<Attempted>);

/// Lazily fetched, once per tick
#[derive(Default)]
struct TickSignals {
    directional: Option<Option<DirectionalSignal>>,
    voting: Option<Option<VotingSignal>>,
}

pub struct StrategyMonitor {
    account: AccountProfile,
    ctx: MonitorContext,
    settings: MonitorSettings,
    used_zones: UsedZones,
    recommended: UsedZones,
    /// Voting has no zone id; a recommendation repeats until signals change
    last_voting_recommendation: Option<Direction>,
}

impl StrategyMonitor {
    pub fn new(account: AccountProfile, ctx: MonitorContext, settings: MonitorSettings) -> Self {
        Self {
            account,
            ctx,
            settings,
            used_zones: UsedZones::new(),
            recommended: UsedZones::new(),
            last_voting_recommendation: None,
        }
    }

    pub fn account(&self) -> &AccountProfile {
        &self.account
    }

    pub fn used_zones(&self) -> &UsedZones {
        &self.used_zones
    }

    /// Run one tick; `None` if the session could not be opened or the tick failed
    pub async fn tick(&mut self) -> Option<TickOutcome> {
        if self.account.strategy == Strategy::Voting {
            match self.ctx.ledger.list_open_trades(self.account.id).await {
                Ok(open) if !open.is_empty() => {
                    self.last_voting_recommendation = None;
                    return Some(TickOutcome::PositionOpen);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Open trades unavailable for account {}: {}", self.account.id, e);
                    return None;
                }
            }
        }

        let gate = Arc::clone(&self.ctx.gate);
        let (outcome, attempted) = gate
            .with_session(&self.account.credentials, |session| self.evaluate(session))
            .await?;

        self.settle(&outcome, attempted).await;
        Some(outcome)
    }

    /// Post-session bookkeeping for one tick
    async fn settle(&mut self, outcome: &TickOutcome, attempted: Option<Attempted>) {
        match outcome {
            TickOutcome::Filled {
                zone_id,
                ticket,
                fill_price,
            } => {
                if let Some(id) = zone_id {
                    self.used_zones.mark(id);
                }
                if let Some(Attempted { attempt, intent }) = attempted {
                    self.ctx
                        .journal
                        .record(&attempt.resolved(AttemptOutcome::Filled {
                            ticket: *ticket,
                            fill_price: *fill_price,
                        }))
                        .await;
                    self.record_trade(&intent, *ticket, *fill_price).await;
                }
            }
            TickOutcome::Rejected { code, reason, .. } => {
                if let Some(Attempted { attempt, .. }) = attempted {
                    self.ctx
                        .journal
                        .record(&attempt.resolved(AttemptOutcome::Rejected {
                            code: *code,
                            reason: reason.clone(),
                        }))
                        .await;
                }
            }
            TickOutcome::Recommended { zone_id, intent } => {
                let first = match zone_id {
                    Some(id) => self.recommended.mark(id),
                    None => self.last_voting_recommendation.replace(intent.direction) != Some(intent.direction),
                };
                if !first {
                    return;
                }
                info!(
                    "Recommendation (auto-trading off): {} {} {} @ {} sl {} tp {}",
                    side(intent.direction),
                    intent.lot_size,
                    intent.symbol,
                    intent.entry_price,
                    intent.stop_loss,
                    intent.take_profit
                );
                if let Some(Attempted { attempt, .. }) = attempted {
                    self.ctx
                        .journal
                        .record(&attempt.resolved(AttemptOutcome::Recommended))
                        .await;
                }
            }
            TickOutcome::NoPrice | TickOutcome::PositionOpen | TickOutcome::NoEntry => {
                self.last_voting_recommendation = None;
            }
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        let span = info_span!(
            "monitor",
            account = self.account.id,
            strategy = %self.account.strategy
        );

        async move {
            self.log_banner().await;

            while !shutdown.is_triggered() {
                let pause = match self.tick().await {
                    Some(TickOutcome::Filled { .. }) if self.account.strategy == Strategy::Voting => {
                        info!("Cooling down for {:?}", self.settings.voting_cooldown);
                        self.settings.voting_cooldown
                    }
                    _ => self.settings.tick_interval,
                };
                if shutdown.sleep(pause).await {
                    break;
                }
            }

            info!("Monitor stopped");
        }
        .instrument(span)
        .await
    }

    async fn log_banner(&self) {
        let info = self
            .ctx
            .gate
            .with_session(&self.account.credentials, |mut session| async move {
                session.account_info().await
            })
            .await
            .flatten();

        match info {
            Some(info) => info!(
                "Monitoring {} for {} (login {}, balance {} {}, auto-trading {})",
                self.settings.symbol,
                self.account.name,
                info.login,
                info.balance,
                info.currency,
                self.settings.auto_trading
            ),
            None => warn!("Monitoring {} for {}: account info unavailable", self.settings.symbol, self.account.name),
        }
    }

    async fn evaluate(&self, mut session: SessionGuard<'_>) -> anyhow::Result<Evaluation> {
        let session: &mut dyn BrokerTerminal = &mut *session;
        let Some(tick) = session.current_tick(&self.settings.symbol).await? else {
            debug!("No tick for {}", self.settings.symbol);
            return Ok((TickOutcome::NoPrice, None));
        };

        match self.account.strategy {
            Strategy::Advanced | Strategy::Simple => self.evaluate_zones(session, &tick).await,
            Strategy::Voting => self.evaluate_voting(session, &tick).await,
        }
    }

    async fn evaluate_zones(
        &self,
        session: &mut dyn BrokerTerminal,
        tick: &Tick,
    ) -> anyhow::Result<Evaluation> {
        let snapshot = self.ctx.zones.snapshot().await;
        let mut signals = TickSignals::default();

        for zone in snapshot.zones.iter().filter(|z| !self.used_zones.is_used(&z.id)) {
            if let Err(reason) = strategy::zone_qualifies(zone, tick, self.settings.strong_threshold) {
                debug!("Zone {} not eligible: {:?}", zone.id, reason);
                continue;
            }

            if self.account.strategy == Strategy::Advanced {
                let directional = self.directional(session, &mut signals).await;
                if let Err(reason) = strategy::directional_confirms(zone.direction, directional.as_ref()) {
                    debug!("Zone {} rejected: {:?}", zone.id, reason);
                    continue;
                }
                let voting = self.voting(session, &mut signals).await;
                if let Err(reason) = strategy::voting_confirms(zone.direction, voting.as_ref()) {
                    debug!("Zone {} rejected: {:?}", zone.id, reason);
                    continue;
                }
            }

            info!(
                "Zone {} qualifies: {} [{} - {}] score {}",
                zone.id, zone.direction, zone.lower, zone.upper, zone.score
            );
            return self.enter(session, Some(zone), zone.direction, tick).await;
        }

        Ok((TickOutcome::NoEntry, None))
    }

    /// Ledger-side open trades are checked by `tick` before the session opens
    async fn evaluate_voting(
        &self,
        session: &mut dyn BrokerTerminal,
        tick: &Tick,
    ) -> anyhow::Result<Evaluation> {
        if !session.positions_for_symbol(&self.settings.symbol).await?.is_empty() {
            return Ok((TickOutcome::PositionOpen, None));
        }

        let mut signals = TickSignals::default();
        let voting = self.voting(session, &mut signals).await;
        let directional = self.directional(session, &mut signals).await;

        match strategy::voting_direction(voting.as_ref(), directional.as_ref()) {
            Some(direction) => {
                info!("Voting and prediction agree: {}", direction);
                self.enter(session, None, direction, tick).await
            }
            None => Ok((TickOutcome::NoEntry, None)),
        }
    }

    async fn directional(
        &self,
        session: &mut dyn BrokerTerminal,
        signals: &mut TickSignals,
    ) -> Option<DirectionalSignal> {
        if signals.directional.is_none() {
            let fetched = match self.ctx.signals.directional(session, &self.settings.symbol).await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Directional signal unavailable: {}", e);
                    None
                }
            };
            signals.directional = Some(fetched);
        }
        signals.directional.clone().flatten()
    }

    async fn voting(
        &self,
        session: &mut dyn BrokerTerminal,
        signals: &mut TickSignals,
    ) -> Option<VotingSignal> {
        if signals.voting.is_none() {
            let fetched = match self.ctx.signals.voting(session, &self.settings.symbol).await {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Voting signal unavailable: {}", e);
                    None
                }
            };
            signals.voting = Some(fetched);
        }
        signals.voting.clone().flatten()
    }

    /// Stop tiers: zone-derived or recent-range, then fixed pips
    async fn stop_plan(
        &self,
        session: &mut dyn BrokerTerminal,
        zone: Option<&Zone>,
        direction: Direction,
        price: Decimal,
        symbol: Option<&SymbolInfo>,
    ) -> Option<StopPlan> {
        let stops = &self.settings.stops;
        if let Some(zone) = zone {
            if let Some(plan) = zone_stops(zone, price, stops) {
                return Some(plan);
            }
            debug!("Zone stops not applicable for {}, using fixed pips", zone.id);
            return symbol.map(|s| fixed_stops(direction, price, s, stops.fixed_sl_pips, stops.fixed_tp_pips));
        }

        let symbol = symbol?;
        let candles = match session
            .recent_candles(&self.settings.symbol, stops.range_candles)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!("Candle history unavailable: {}", e);
                Vec::new()
            }
        };
        range_stops(direction, price, &candles, symbol, stops).or_else(|| {
            debug!("Range stops not applicable, using fixed pips");
            Some(fixed_stops(
                direction,
                price,
                symbol,
                stops.voting_fixed_sl_pips,
                stops.voting_fixed_tp_pips,
            ))
        })
    }

    /// Build the order and, with auto-trading on, submit it
    ///
    /// Only the pending record and a submission failure are journalled here,
    /// before the session closes; `settle` journals the rest.
    async fn enter(
        &self,
        session: &mut dyn BrokerTerminal,
        zone: Option<&Zone>,
        direction: Direction,
        tick: &Tick,
    ) -> anyhow::Result<Evaluation> {
        let symbol = &self.settings.symbol;
        let zone_id = zone.map(|z| z.id.clone());
        let price = tick.entry_price(direction);

        let symbol_info = session.symbol_info(symbol).await?;
        let account_info = session.account_info().await?;
        let Some(stops) = self
            .stop_plan(session, zone, direction, price, symbol_info.as_ref())
            .await
        else {
            warn!("No symbol metadata for {}, cannot place stops", symbol);
            return Ok((TickOutcome::NoEntry, None));
        };
        let lot = size_order(
            account_info.as_ref(),
            symbol_info.as_ref(),
            &self.account.risk,
            price,
            stops.stop_loss,
        );

        let intent = build_intent(symbol, self.account.strategy, direction, price, stops, lot);
        let attempt = TradeAttempt::new(self.account.id, &intent);

        if !self.settings.auto_trading {
            let outcome = TickOutcome::Recommended {
                zone_id,
                intent: intent.clone(),
            };
            return Ok((outcome, Some(Attempted { attempt, intent })));
        }

        self.ctx.journal.record(&attempt).await;
        let receipt = match session.submit_order(&intent).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.ctx
                    .journal
                    .record(&attempt.resolved(AttemptOutcome::Failed {
                        error: e.to_string(),
                    }))
                    .await;
                return Err(e);
            }
        };

        let Some((ticket, fill_price)) = receipt.confirmed_fill() else {
            let (code, reason) = match receipt.status {
                OrderStatus::Rejected { code, reason } => (code, reason),
                OrderStatus::Filled => (0, "fill without ticket".to_string()),
            };
            warn!("Order rejected ({}): {}", code, reason);
            let outcome = TickOutcome::Rejected {
                zone_id,
                code,
                reason,
            };
            return Ok((outcome, Some(Attempted { attempt, intent })));
        };

        info!(
            "Order filled: ticket {} {} {} {} @ {}",
            ticket,
            side(direction),
            lot,
            symbol,
            fill_price
        );
        let outcome = TickOutcome::Filled {
            zone_id,
            ticket,
            fill_price,
        };
        Ok((outcome, Some(Attempted { attempt, intent })))
    }

    /// Persist and announce a fill; failures here never undo the fill
    async fn record_trade(&self, intent: &OrderIntent, ticket: Ticket, fill_price: Decimal) {
        let trade = Trade {
            id: ticket,
            account_id: self.account.id,
            symbol: intent.symbol.clone(),
            strategy: intent.tag.clone(),
            direction: intent.direction,
            lot_size: intent.lot_size,
            open_price: fill_price,
            open_time: Utc::now(),
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            close_price: None,
            close_time: None,
            profit_loss: None,
            status: TradeStatus::Open,
        };
        if let Err(e) = self.ctx.ledger.insert_trade(trade).await {
            error!("Failed to record trade {}: {}", ticket, e);
        }

        if let Some(token) = &self.account.push_token {
            self.ctx.notifier.notify(
                token,
                "New Auto Trade 🤖",
                &format!("{} {} @ {}", side(intent.direction), intent.symbol, fill_price),
                serde_json::json!({
                    "ticket": ticket,
                    "account_id": self.account.id,
                    "strategy": intent.tag,
                }),
            );
        }
    }
}

fn side(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "BUY",
        Direction::Short => "SELL",
    }
}
