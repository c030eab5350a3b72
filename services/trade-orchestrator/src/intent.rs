//! Order intent construction and per-monitor zone idempotency

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use crate::sizing::StopPlan;
use crate::strategy::Strategy;
use crate::types::{Direction, OrderIntent};

/// Build the intent submitted to the terminal
pub fn build_intent(
    symbol: &str,
    strategy: Strategy,
    direction: Direction,
    price: Decimal,
    stops: StopPlan,
    lot_size: Decimal,
) -> OrderIntent {
    OrderIntent {
        symbol: symbol.to_string(),
        direction,
        entry_price: price,
        stop_loss: stops.stop_loss,
        take_profit: stops.take_profit,
        lot_size,
        tag: strategy.tag().to_string(),
        magic: strategy.magic(),
    }
}

/// Zones this monitor has already traded
///
/// Lives only as long as the monitor. A restart starts from an empty set.
#[derive(Debug, Default)]
pub struct UsedZones {
    used: HashMap<String, Instant>,
}

impl UsedZones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_used(&self, zone_id: &str) -> bool {
        self.used.contains_key(zone_id)
    }

    /// Returns false if the zone was already marked
    pub fn mark(&mut self, zone_id: &str) -> bool {
        if self.is_used(zone_id) {
            return false;
        }
        self.used.insert(zone_id.to_string(), Instant::now());
        debug!("Zone {} marked used", zone_id);
        true
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_idempotent() {
        let mut used = UsedZones::new();
        assert!(!used.is_used("2025-01-01T00:00:00Z"));
        assert!(used.mark("2025-01-01T00:00:00Z"));
        assert!(!used.mark("2025-01-01T00:00:00Z"));
        assert!(used.is_used("2025-01-01T00:00:00Z"));
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn test_build_intent_carries_strategy_identity() {
        let stops = StopPlan {
            stop_loss: Decimal::from(1990),
            take_profit: Decimal::from(2020),
        };
        let intent = build_intent(
            "XAUUSD",
            Strategy::Voting,
            Direction::Long,
            Decimal::from(2000),
            stops,
            Decimal::new(3, 2),
        );
        assert_eq!(intent.tag, "Voting");
        assert_eq!(intent.magic, 234_001);
        assert_eq!(intent.stop_loss, Decimal::from(1990));
    }
}
