//! Trade Orchestrator Library
//!
//! Multi-account trading over a single-login broker terminal.

pub mod accounts;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod intent;
pub mod journal;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod reconciler;
pub mod runner;
pub mod session;
pub mod shutdown;
pub mod signals;
pub mod sizing;
pub mod strategy;
pub mod types;
pub mod zones;

// Re-export main types for convenience
pub use accounts::{AccountProfile, CredentialStore, YamlAccountStore};
pub use bridge::BridgeTerminal;
pub use broker::{BrokerTerminal, PaperTerminal};
pub use config::{Settings, TradingMode};
pub use journal::{AttemptOutcome, TradeAttempt, TradeJournal};
pub use ledger::{JsonLedger, LedgerError, TradeLedger};
pub use monitor::{MonitorContext, MonitorSettings, StrategyMonitor, TickOutcome};
pub use notify::{NoopNotifier, Notifier, PushNotifier};
pub use reconciler::{ReconciliationResult, TradeReconciler};
pub use runner::Orchestrator;
pub use session::{SessionError, SessionGate, SessionGuard};
pub use signals::{ModelServiceClient, SignalSource, ZoneDetector};
pub use strategy::Strategy;
pub use types::{
    AccountId, Credentials, Direction, OrderIntent, RiskConfig, Ticket, Trade, TradeStatus, Zone,
};
pub use zones::{ZoneCache, ZoneRefresher};
