//! Core types shared by the gate, the monitors and the reconciler
//!
//! Records arriving from outside (detector output, account files, terminal
//! reports) are validated into these structs at the boundary so the rest of
//! the service never deals with loosely shaped data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Broker ticket number; doubles as the trade id in the ledger
pub type Ticket = u64;

/// Ledger account identifier
pub type AccountId = u64;

/// Boundary validation failures
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("unknown direction: {0}")]
    UnknownDirection(String),
    #[error("zone {id}: lower bound {lower} is not below upper bound {upper}")]
    InvertedBounds {
        id: String,
        lower: Decimal,
        upper: Decimal,
    },
    #[error("zone {id}: size must be positive, got {size}")]
    NonPositiveSize { id: String, size: Decimal },
    #[error("zone {id}: score {score} outside 0..=100")]
    ScoreOutOfRange { id: String, score: i64 },
    #[error("zone is missing field `{0}`")]
    MissingField(&'static str),
    #[error("risk percentage {0} outside (0, 10]")]
    RiskOutOfRange(Decimal),
    #[error("lot bounds invalid: min {min}, max {max}")]
    LotBounds { min: Decimal, max: Decimal },
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "buy", alias = "BUY", alias = "up", alias = "UP")]
    Long,
    #[serde(alias = "sell", alias = "SELL", alias = "down", alias = "DOWN")]
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" | "up" | "bullish" => Ok(Direction::Long),
            "short" | "sell" | "down" | "bearish" => Ok(Direction::Short),
            other => Err(ValidationError::UnknownDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Login tuple for exactly one broker account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: u64,
    pub password: String,
    pub server: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}

/// A detected price-range opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Creation-time identifier, stable across refresh cycles
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub direction: Direction,
    pub lower: Decimal,
    pub upper: Decimal,
    pub size: Decimal,
    /// Strength score, 0..=100
    pub score: u8,
}

impl Zone {
    /// Inclusive bounds check
    pub fn contains(&self, price: Decimal) -> bool {
        self.lower <= price && price <= self.upper
    }
}

/// Zone as produced by the detector before validation
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawZone {
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub direction: Option<String>,
    pub lower: Option<Decimal>,
    pub upper: Option<Decimal>,
    pub size: Option<Decimal>,
    pub score: Option<i64>,
}

impl TryFrom<RawZone> for Zone {
    type Error = ValidationError;

    fn try_from(raw: RawZone) -> Result<Self, Self::Error> {
        let created_at = raw
            .created_at
            .ok_or(ValidationError::MissingField("created_at"))?;
        let id = raw.id.unwrap_or_else(|| created_at.to_rfc3339());
        let direction: Direction = raw
            .direction
            .as_deref()
            .ok_or(ValidationError::MissingField("direction"))?
            .parse()?;
        let lower = raw.lower.ok_or(ValidationError::MissingField("lower"))?;
        let upper = raw.upper.ok_or(ValidationError::MissingField("upper"))?;
        if lower >= upper {
            return Err(ValidationError::InvertedBounds { id, lower, upper });
        }
        let size = raw.size.unwrap_or(upper - lower);
        if size <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveSize { id, size });
        }
        let score = raw.score.unwrap_or(0);
        if !(0..=100).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange { id, score });
        }

        Ok(Zone {
            id,
            created_at,
            direction,
            lower,
            upper,
            size,
            score: score as u8,
        })
    }
}

/// Output of the directional predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionalSignal {
    pub direction: Direction,
    pub magnitude: Decimal,
}

/// Output of the voting ensemble; `None` direction means hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSignal {
    pub direction: Option<Direction>,
    pub confidence: f64,
}

/// Per-account risk budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Percent of balance risked per trade, (0, 10]
    pub risk_percentage: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.risk_percentage <= Decimal::ZERO || self.risk_percentage > Decimal::TEN {
            return Err(ValidationError::RiskOutOfRange(self.risk_percentage));
        }
        // Lots trade in hundredths; bounds off that grid could not be honoured
        let hundredths = |v: Decimal| (v * Decimal::ONE_HUNDRED).fract().is_zero();
        if self.min_lot <= Decimal::ZERO
            || self.min_lot > self.max_lot
            || !hundredths(self.min_lot)
            || !hundredths(self.max_lot)
        {
            return Err(ValidationError::LotBounds {
                min: self.min_lot,
                max: self.max_lot,
            });
        }
        Ok(())
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_percentage: Decimal::ONE,
            min_lot: Decimal::new(1, 2),
            max_lot: Decimal::TEN,
        }
    }
}

/// Order built immediately before submission; never persisted directly
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub lot_size: Decimal,
    /// Strategy tag sent as the order comment
    pub tag: String,
    pub magic: u64,
}

/// Ledger status of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Winning,
    Losing,
    Closed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TradeStatus::Open)
    }

    /// Only Open may move, and only into a terminal status
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        self == TradeStatus::Open && next.is_terminal()
    }

    /// Terminal status for a realised result
    pub fn from_profit(profit: Decimal) -> Self {
        if profit >= Decimal::ZERO {
            TradeStatus::Winning
        } else {
            TradeStatus::Losing
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "Open"),
            TradeStatus::Winning => write!(f, "Winning"),
            TradeStatus::Losing => write!(f, "Losing"),
            TradeStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Persisted trade row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Ticket,
    pub account_id: AccountId,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub lot_size: Decimal,
    pub open_price: Decimal,
    pub open_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub close_price: Option<Decimal>,
    pub close_time: Option<DateTime<Utc>>,
    /// Floating while Open, realised once terminal
    pub profit_loss: Option<Decimal>,
    pub status: TradeStatus,
}

/// Close fields written together by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub struct TradeClose {
    pub close_price: Option<Decimal>,
    pub close_time: DateTime<Utc>,
    pub profit_loss: Option<Decimal>,
    pub status: TradeStatus,
}

/// Current bid/ask
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

impl Tick {
    /// Price at which an order in `direction` would fill
    pub fn entry_price(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub balance: Decimal,
    pub equity: Decimal,
    pub currency: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    /// Smallest price increment
    pub point: Decimal,
    pub contract_size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Live position as reported by the terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub profit: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealEntry {
    In,
    Out,
}

/// Historical deal belonging to a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub position_id: Ticket,
    pub entry: DealEntry,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub profit: Decimal,
    pub swap: Decimal,
    pub commission: Decimal,
}

impl Deal {
    pub fn net(&self) -> Decimal {
        self.profit + self.swap + self.commission
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderStatus {
    Filled,
    Rejected { code: i64, reason: String },
}

/// Terminal response to an order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub ticket: Option<Ticket>,
    pub fill_price: Option<Decimal>,
    pub status: OrderStatus,
}

impl OrderReceipt {
    /// Ticket and price of a confirmed fill, if this was one
    pub fn confirmed_fill(&self) -> Option<(Ticket, Decimal)> {
        match (&self.status, self.ticket, self.fill_price) {
            (OrderStatus::Filled, Some(ticket), Some(price)) => Some((ticket, price)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw_zone() -> RawZone {
        RawZone {
            id: None,
            created_at: Some(Utc.with_ymd_and_hms(2025, 3, 4, 10, 15, 0).unwrap()),
            direction: Some("BUY".to_string()),
            lower: Some(Decimal::from(2000)),
            upper: Some(Decimal::from(2001)),
            size: None,
            score: Some(70),
        }
    }

    #[test]
    fn test_direction_parsing_accepts_all_labels() {
        assert_eq!("BUY".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("Bearish".parse::<Direction>().unwrap(), Direction::Short);
        assert!("HOLD".parse::<Direction>().is_err());
    }

    #[test]
    fn test_zone_validation_fills_defaults() {
        let zone = Zone::try_from(raw_zone()).unwrap();
        assert_eq!(zone.direction, Direction::Long);
        assert_eq!(zone.size, Decimal::ONE);
        assert_eq!(zone.id, "2025-03-04T10:15:00+00:00");
    }

    #[test]
    fn test_zone_validation_rejects_bad_records() {
        let inverted = RawZone {
            lower: Some(Decimal::from(2002)),
            ..raw_zone()
        };
        assert!(matches!(
            Zone::try_from(inverted),
            Err(ValidationError::InvertedBounds { .. })
        ));

        let scored = RawZone {
            score: Some(140),
            ..raw_zone()
        };
        assert!(matches!(
            Zone::try_from(scored),
            Err(ValidationError::ScoreOutOfRange { .. })
        ));

        let undirected = RawZone {
            direction: Some("neutral".to_string()),
            ..raw_zone()
        };
        assert!(Zone::try_from(undirected).is_err());
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(TradeStatus::Open.can_transition_to(TradeStatus::Winning));
        assert!(TradeStatus::Open.can_transition_to(TradeStatus::Closed));
        assert!(!TradeStatus::Open.can_transition_to(TradeStatus::Open));
        assert!(!TradeStatus::Winning.can_transition_to(TradeStatus::Losing));
        assert!(!TradeStatus::Closed.can_transition_to(TradeStatus::Open));
    }

    #[test]
    fn test_risk_config_validation() {
        assert!(RiskConfig::default().validate().is_ok());
        let too_risky = RiskConfig {
            risk_percentage: Decimal::from(11),
            ..RiskConfig::default()
        };
        assert!(too_risky.validate().is_err());
        let off_grid = RiskConfig {
            min_lot: Decimal::new(15, 3),
            ..RiskConfig::default()
        };
        assert!(off_grid.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            login: 42,
            password: "hunter2".to_string(),
            server: "Demo-1".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
