//! Orchestrator Configuration
//!
//! Layered as: built-in defaults, then optional `orchestrator.yaml`, then
//! `ORCH_*` environment variables (`__` separates nested keys, so
//! `ORCH_RISK__MAX_LOT=5` sets `risk.max_lot`).

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::RiskConfig;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Top-level settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Opening price of the simulated feed in paper mode
    #[serde(default = "default_paper_start_price")]
    pub paper_start_price: Decimal,
    /// When false monitors only log what they would trade
    #[serde(default)]
    pub auto_trading: bool,
    /// Minimum zone score for an entry
    #[serde(default = "default_strong_threshold")]
    pub strong_threshold: u8,
    #[serde(default)]
    pub intervals: IntervalSettings,
    #[serde(default)]
    pub risk: RiskDefaults,
    #[serde(default)]
    pub stops: StopSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub services: ServiceSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            trading_mode: TradingMode::default(),
            paper_start_price: default_paper_start_price(),
            auto_trading: false,
            strong_threshold: default_strong_threshold(),
            intervals: IntervalSettings::default(),
            risk: RiskDefaults::default(),
            stops: StopSettings::default(),
            paths: PathSettings::default(),
            services: ServiceSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

/// Loop cadences, all in seconds
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct IntervalSettings {
    #[serde(default = "default_monitor_tick_secs")]
    pub monitor_tick_secs: u64,
    #[serde(default = "default_zone_refresh_secs")]
    pub zone_refresh_secs: u64,
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_secs: u64,
    /// Pause after a voting entry before the next evaluation
    #[serde(default = "default_voting_cooldown_secs")]
    pub voting_cooldown_secs: u64,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            monitor_tick_secs: default_monitor_tick_secs(),
            zone_refresh_secs: default_zone_refresh_secs(),
            reconcile_secs: default_reconcile_secs(),
            voting_cooldown_secs: default_voting_cooldown_secs(),
        }
    }
}

impl IntervalSettings {
    pub fn monitor_tick(&self) -> Duration {
        Duration::from_secs(self.monitor_tick_secs)
    }

    pub fn zone_refresh(&self) -> Duration {
        Duration::from_secs(self.zone_refresh_secs)
    }

    pub fn reconcile(&self) -> Duration {
        Duration::from_secs(self.reconcile_secs)
    }

    pub fn voting_cooldown(&self) -> Duration {
        Duration::from_secs(self.voting_cooldown_secs)
    }
}

/// Lot bounds applied when an account does not set its own
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct RiskDefaults {
    #[serde(default = "default_risk_percentage")]
    pub risk_percentage: Decimal,
    #[serde(default = "default_min_lot")]
    pub min_lot: Decimal,
    #[serde(default = "default_max_lot")]
    pub max_lot: Decimal,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            risk_percentage: default_risk_percentage(),
            min_lot: default_min_lot(),
            max_lot: default_max_lot(),
        }
    }
}

impl RiskDefaults {
    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            risk_percentage: self.risk_percentage,
            min_lot: self.min_lot,
            max_lot: self.max_lot,
        }
    }
}

/// Stop and target geometry for the three stop tiers
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct StopSettings {
    #[serde(default = "default_zone_entry_offset")]
    pub zone_entry_offset: Decimal,
    #[serde(default = "default_zone_stop_offset")]
    pub zone_stop_offset: Decimal,
    #[serde(default = "default_zone_stop_size_factor")]
    pub zone_stop_size_factor: Decimal,
    #[serde(default = "default_zone_reward_multiple")]
    pub zone_reward_multiple: Decimal,
    #[serde(default = "default_range_candles")]
    pub range_candles: usize,
    #[serde(default = "default_range_buffer_points")]
    pub range_buffer_points: Decimal,
    #[serde(default = "default_range_reward_multiple")]
    pub range_reward_multiple: Decimal,
    /// Fixed fallback for zone strategies
    #[serde(default = "default_fixed_sl_pips")]
    pub fixed_sl_pips: Decimal,
    #[serde(default = "default_fixed_tp_pips")]
    pub fixed_tp_pips: Decimal,
    /// Fixed fallback for the voting strategy
    #[serde(default = "default_fixed_sl_pips")]
    pub voting_fixed_sl_pips: Decimal,
    #[serde(default = "default_voting_fixed_tp_pips")]
    pub voting_fixed_tp_pips: Decimal,
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            zone_entry_offset: default_zone_entry_offset(),
            zone_stop_offset: default_zone_stop_offset(),
            zone_stop_size_factor: default_zone_stop_size_factor(),
            zone_reward_multiple: default_zone_reward_multiple(),
            range_candles: default_range_candles(),
            range_buffer_points: default_range_buffer_points(),
            range_reward_multiple: default_range_reward_multiple(),
            fixed_sl_pips: default_fixed_sl_pips(),
            fixed_tp_pips: default_fixed_tp_pips(),
            voting_fixed_sl_pips: default_fixed_sl_pips(),
            voting_fixed_tp_pips: default_voting_fixed_tp_pips(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PathSettings {
    #[serde(default = "default_accounts_file")]
    pub accounts_file: PathBuf,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            accounts_file: default_accounts_file(),
            ledger_file: default_ledger_file(),
            journal_dir: default_journal_dir(),
        }
    }
}

/// External HTTP collaborators
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceSettings {
    #[serde(default = "default_model_service_url")]
    pub model_service_url: String,
    /// Terminal bridge used in live mode
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Candles handed to the detector and predictors per call
    #[serde(default = "default_history_candles")]
    pub history_candles: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            model_service_url: default_model_service_url(),
            bridge_url: default_bridge_url(),
            request_timeout_secs: default_request_timeout_secs(),
            history_candles: default_history_candles(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_push_endpoint")]
    pub push_endpoint: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            push_endpoint: default_push_endpoint(),
        }
    }
}

fn default_symbol() -> String {
    "XAUUSD".to_string()
}
fn default_paper_start_price() -> Decimal {
    Decimal::from(2000)
}
fn default_strong_threshold() -> u8 {
    60
}
fn default_monitor_tick_secs() -> u64 {
    1
}
fn default_zone_refresh_secs() -> u64 {
    15 * 60
}
fn default_reconcile_secs() -> u64 {
    1
}
fn default_voting_cooldown_secs() -> u64 {
    15 * 60
}
fn default_risk_percentage() -> Decimal {
    Decimal::ONE
}
fn default_min_lot() -> Decimal {
    Decimal::new(1, 2)
}
fn default_max_lot() -> Decimal {
    Decimal::TEN
}
fn default_zone_entry_offset() -> Decimal {
    Decimal::new(5, 1)
}
fn default_zone_stop_offset() -> Decimal {
    Decimal::ONE
}
fn default_zone_stop_size_factor() -> Decimal {
    Decimal::new(1, 1)
}
fn default_zone_reward_multiple() -> Decimal {
    Decimal::from(5)
}
fn default_range_candles() -> usize {
    10
}
fn default_range_buffer_points() -> Decimal {
    Decimal::from(5)
}
fn default_range_reward_multiple() -> Decimal {
    Decimal::TWO
}
fn default_fixed_sl_pips() -> Decimal {
    Decimal::from(30)
}
fn default_fixed_tp_pips() -> Decimal {
    Decimal::from(90)
}
fn default_voting_fixed_tp_pips() -> Decimal {
    Decimal::from(60)
}
fn default_accounts_file() -> PathBuf {
    PathBuf::from("accounts.yaml")
}
fn default_ledger_file() -> PathBuf {
    PathBuf::from("state/ledger.json")
}
fn default_journal_dir() -> PathBuf {
    PathBuf::from("journal")
}
fn default_model_service_url() -> String {
    "http://localhost:8090".to_string()
}
fn default_bridge_url() -> String {
    "http://localhost:8228".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_history_candles() -> usize {
    672
}
fn default_true() -> bool {
    true
}
fn default_push_endpoint() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

impl Settings {
    /// Load from `orchestrator.yaml` (optional) and `ORCH_*` env vars
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from("orchestrator")
    }

    /// Load with an explicit config file stem
    pub fn load_from(file_stem: &str) -> anyhow::Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("ORCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.symbol.trim().is_empty() {
            anyhow::bail!("symbol must not be empty");
        }
        if self.strong_threshold > 100 {
            anyhow::bail!("strong_threshold {} outside 0..=100", self.strong_threshold);
        }
        self.risk
            .risk_config()
            .validate()
            .context("Invalid default risk settings")?;

        let i = &self.intervals;
        if i.monitor_tick_secs == 0 || i.zone_refresh_secs == 0 || i.reconcile_secs == 0 {
            anyhow::bail!("loop intervals must be at least one second");
        }
        if self.paper_start_price <= Decimal::ZERO {
            anyhow::bail!("paper_start_price must be positive");
        }
        if self.stops.range_candles == 0 {
            anyhow::bail!("range_candles must be positive");
        }
        if self.stops.fixed_sl_pips <= Decimal::ZERO || self.stops.voting_fixed_sl_pips <= Decimal::ZERO
        {
            anyhow::bail!("fixed stop distances must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.symbol, "XAUUSD");
        assert_eq!(settings.strong_threshold, 60);
        assert_eq!(settings.intervals.zone_refresh(), Duration::from_secs(900));
        assert!(!settings.auto_trading);
        assert_eq!(settings.trading_mode, TradingMode::Paper);
    }

    #[test]
    fn test_yaml_overrides_keep_other_defaults() {
        let yaml = r#"
symbol: EURUSD
auto_trading: true
risk:
  max_lot: 2.5
stops:
  fixed_tp_pips: 120
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.symbol, "EURUSD");
        assert!(settings.auto_trading);
        assert_eq!(settings.risk.max_lot, Decimal::new(25, 1));
        assert_eq!(settings.risk.min_lot, Decimal::new(1, 2));
        assert_eq!(settings.stops.fixed_tp_pips, Decimal::from(120));
        assert_eq!(settings.stops.fixed_sl_pips, Decimal::from(30));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.strong_threshold = 101;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.risk.min_lot = Decimal::from(20);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.intervals.reconcile_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_trading_mode_parsing() {
        let mode: TradingMode = serde_json::from_str("\"live\"").unwrap();
        assert_eq!(mode, TradingMode::Live);
    }
}
