//! Strategy variants and their entry rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{DirectionalSignal, Direction, Tick, VotingSignal, Zone};

/// Magic number stamped on zone-strategy orders
pub const ZONE_MAGIC: u64 = 234_000;
/// Magic number stamped on voting-strategy orders
pub const VOTING_MAGIC: u64 = 234_001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Zone entry confirmed by both external signals
    Advanced,
    /// Zone entry on score and price alone
    Simple,
    /// Zone-independent, driven by signal agreement
    Voting,
}

impl Strategy {
    pub fn uses_zones(self) -> bool {
        !matches!(self, Strategy::Voting)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Strategy::Advanced => "Advanced",
            Strategy::Simple => "Simple",
            Strategy::Voting => "Voting",
        }
    }

    pub fn magic(self) -> u64 {
        match self {
            Strategy::Voting => VOTING_MAGIC,
            _ => ZONE_MAGIC,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy tag: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    /// Accepts the account-file labels as well as the variant names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "advanced" => Ok(Strategy::Advanced),
            "fvg + trend" | "fvg+trend" | "simple" => Ok(Strategy::Simple),
            "voting" => Ok(Strategy::Voting),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Why a candidate entry was turned down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    WeakZone,
    PriceOutsideZone,
    DirectionalUnavailable,
    DirectionalDisagrees,
    VotingUnavailable,
    VotingDisagrees,
}

/// Score and price test shared by both zone strategies
pub fn zone_qualifies(zone: &Zone, tick: &Tick, strong_threshold: u8) -> Result<(), Rejection> {
    if zone.score < strong_threshold {
        return Err(Rejection::WeakZone);
    }
    if !zone.contains(tick.entry_price(zone.direction)) {
        return Err(Rejection::PriceOutsideZone);
    }
    Ok(())
}

/// Directional confirmation for an Advanced entry
pub fn directional_confirms(
    zone_direction: Direction,
    signal: Option<&DirectionalSignal>,
) -> Result<(), Rejection> {
    match signal {
        None => Err(Rejection::DirectionalUnavailable),
        Some(s) if s.direction != zone_direction => Err(Rejection::DirectionalDisagrees),
        Some(_) => Ok(()),
    }
}

/// Voting confirmation for an Advanced entry
pub fn voting_confirms(
    zone_direction: Direction,
    signal: Option<&VotingSignal>,
) -> Result<(), Rejection> {
    match signal {
        None => Err(Rejection::VotingUnavailable),
        Some(s) if s.direction != Some(zone_direction) => Err(Rejection::VotingDisagrees),
        Some(_) => Ok(()),
    }
}

/// Full Advanced rule; every part must agree
pub fn advanced_accepts(
    zone: &Zone,
    tick: &Tick,
    strong_threshold: u8,
    directional: Option<&DirectionalSignal>,
    voting: Option<&VotingSignal>,
) -> Result<(), Rejection> {
    zone_qualifies(zone, tick, strong_threshold)?;
    directional_confirms(zone.direction, directional)?;
    voting_confirms(zone.direction, voting)
}

/// Direction both signals agree on, if any
pub fn voting_direction(
    voting: Option<&VotingSignal>,
    directional: Option<&DirectionalSignal>,
) -> Option<Direction> {
    let vote = voting?.direction?;
    (directional?.direction == vote).then_some(vote)
}
