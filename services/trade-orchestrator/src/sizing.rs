//! Lot sizing and stop/target placement
//!
//! Stops come from one of three tiers, first applicable wins:
//! zone-derived, recent-range-derived, then fixed pips.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

use crate::config::StopSettings;
use crate::types::{AccountInfo, Candle, Direction, RiskConfig, SymbolInfo, Zone};

/// Points per pip for the instruments traded here
const POINTS_PER_PIP: i64 = 10;

/// Per-lot pip value as a fraction of the contract size
fn pip_value_per_lot(symbol: &SymbolInfo) -> Decimal {
    symbol.contract_size * Decimal::new(1, 2)
}

fn floor_to_hundredths(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// Risk-based lot size, clamped to the account's bounds
///
/// `stop_pips <= 0` or a non-positive pip value yields the minimum lot.
pub fn lot_size(
    balance: Decimal,
    risk: &RiskConfig,
    pip_value: Decimal,
    stop_pips: Decimal,
) -> Decimal {
    if stop_pips <= Decimal::ZERO || pip_value <= Decimal::ZERO || balance <= Decimal::ZERO {
        return risk.min_lot;
    }
    let risk_amount = balance * risk.risk_percentage / Decimal::ONE_HUNDRED;
    let raw = risk_amount / (pip_value * stop_pips);
    floor_to_hundredths(raw.clamp(risk.min_lot, risk.max_lot))
}

/// Lot size for an order filling at `price` with its stop at `stop_loss`
///
/// Falls back to the minimum lot when terminal metadata is missing.
pub fn size_order(
    account: Option<&AccountInfo>,
    symbol: Option<&SymbolInfo>,
    risk: &RiskConfig,
    price: Decimal,
    stop_loss: Decimal,
) -> Decimal {
    let (Some(account), Some(symbol)) = (account, symbol) else {
        return risk.min_lot;
    };
    if symbol.point <= Decimal::ZERO {
        return risk.min_lot;
    }
    let stop_pips = (price - stop_loss).abs() / symbol.point / Decimal::from(POINTS_PER_PIP);
    lot_size(account.balance, risk, pip_value_per_lot(symbol), stop_pips)
}

/// Entry reference with its protective levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopPlan {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl StopPlan {
    /// Stop below and target above for longs, mirrored for shorts
    fn is_consistent(&self, direction: Direction, price: Decimal) -> bool {
        match direction {
            Direction::Long => self.stop_loss < price && price < self.take_profit,
            Direction::Short => self.take_profit < price && price < self.stop_loss,
        }
    }
}

fn signed(direction: Direction, value: Decimal) -> Decimal {
    match direction {
        Direction::Long => value,
        Direction::Short => -value,
    }
}

/// Zone-derived stops; `None` when the geometry does not bracket `price`
pub fn zone_stops(zone: &Zone, price: Decimal, params: &StopSettings) -> Option<StopPlan> {
    let direction = zone.direction;
    let scaled = params.zone_stop_size_factor * zone.size;
    let (entry, stop_loss) = match direction {
        Direction::Long => (
            zone.lower + params.zone_entry_offset,
            zone.lower - params.zone_stop_offset + scaled,
        ),
        Direction::Short => (
            zone.upper - params.zone_entry_offset,
            zone.upper + params.zone_stop_offset - scaled,
        ),
    };
    let risk = (entry - stop_loss).abs();
    let plan = StopPlan {
        stop_loss,
        take_profit: entry + signed(direction, params.zone_reward_multiple * risk),
    };
    plan.is_consistent(direction, price).then_some(plan)
}

/// Stops beyond the extreme of the last `range_candles` candles
///
/// `None` with insufficient history.
pub fn range_stops(
    direction: Direction,
    price: Decimal,
    candles: &[Candle],
    symbol: &SymbolInfo,
    params: &StopSettings,
) -> Option<StopPlan> {
    if params.range_candles == 0 || candles.len() < params.range_candles {
        return None;
    }
    let recent = &candles[candles.len() - params.range_candles..];
    let buffer = params.range_buffer_points * symbol.point;
    let stop_loss = match direction {
        Direction::Long => recent.iter().map(|c| c.low).min()? - buffer,
        Direction::Short => recent.iter().map(|c| c.high).max()? + buffer,
    };
    let distance = (price - stop_loss).abs();
    let plan = StopPlan {
        stop_loss,
        take_profit: price + signed(direction, params.range_reward_multiple * distance),
    };
    plan.is_consistent(direction, price).then_some(plan)
}

/// Fixed pip distances from `price`
pub fn fixed_stops(
    direction: Direction,
    price: Decimal,
    symbol: &SymbolInfo,
    sl_pips: Decimal,
    tp_pips: Decimal,
) -> StopPlan {
    let pip = symbol.point * Decimal::from(POINTS_PER_PIP);
    StopPlan {
        stop_loss: price - signed(direction, sl_pips * pip),
        take_profit: price + signed(direction, tp_pips * pip),
    }
}
