//! Orchestrator - spawns and supervises every loop

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::accounts::AccountProfile;
use crate::config::Settings;
use crate::journal::TradeJournal;
use crate::ledger::TradeLedger;
use crate::monitor::{MonitorContext, MonitorSettings, StrategyMonitor};
use crate::notify::Notifier;
use crate::reconciler::TradeReconciler;
use crate::session::SessionGate;
use crate::shutdown::Shutdown;
use crate::signals::{SignalSource, ZoneDetector};
use crate::zones::{ZoneCache, ZoneRefresher};

/// Everything the loops share
pub struct Orchestrator {
    settings: Settings,
    accounts: Vec<AccountProfile>,
    gate: Arc<SessionGate>,
    zones: Arc<ZoneCache>,
    detector: Arc<dyn ZoneDetector>,
    signals: Arc<dyn SignalSource>,
    ledger: Arc<dyn TradeLedger>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<TradeJournal>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        accounts: Vec<AccountProfile>,
        gate: Arc<SessionGate>,
        detector: Arc<dyn ZoneDetector>,
        signals: Arc<dyn SignalSource>,
        ledger: Arc<dyn TradeLedger>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<TradeJournal>,
    ) -> Self {
        Self {
            settings,
            accounts,
            gate,
            zones: Arc::new(ZoneCache::new()),
            detector,
            signals,
            ledger,
            notifier,
            journal,
        }
    }

    pub fn zone_cache(&self) -> Arc<ZoneCache> {
        Arc::clone(&self.zones)
    }

    /// Make sure every account has a ledger balance
    pub async fn seed_ledger(&self) -> anyhow::Result<()> {
        for account in &self.accounts {
            let balance = self
                .ledger
                .open_account(account.id, account.opening_balance)
                .await?;
            info!("Account {} ({}): ledger balance {}", account.id, account.name, balance);
        }
        Ok(())
    }

    /// Spawn the refresher, one monitor per account and the reconciler,
    /// then wait until all of them have stopped
    pub async fn run(self, shutdown: Shutdown) -> anyhow::Result<()> {
        if self.accounts.is_empty() {
            warn!("No active accounts; nothing to run");
            return Ok(());
        }
        self.seed_ledger().await?;

        let mut tasks = JoinSet::new();

        let refresher = ZoneRefresher::new(
            Arc::clone(&self.gate),
            Arc::clone(&self.zones),
            Arc::clone(&self.detector),
            self.accounts.iter().map(|a| a.credentials.clone()).collect(),
            &self.settings.symbol,
            self.settings.intervals.zone_refresh(),
        );
        tasks.spawn(refresher.run(shutdown.clone()));

        let ctx = MonitorContext {
            gate: Arc::clone(&self.gate),
            zones: Arc::clone(&self.zones),
            signals: Arc::clone(&self.signals),
            ledger: Arc::clone(&self.ledger),
            notifier: Arc::clone(&self.notifier),
            journal: Arc::clone(&self.journal),
        };
        let monitor_settings = MonitorSettings::from_settings(&self.settings);
        for account in &self.accounts {
            info!(
                "Starting {} monitor for account {} ({})",
                account.strategy, account.id, account.name
            );
            let monitor = StrategyMonitor::new(account.clone(), ctx.clone(), monitor_settings.clone());
            tasks.spawn(monitor.run(shutdown.clone()));
        }

        let reconciler = TradeReconciler::new(
            Arc::clone(&self.gate),
            Arc::clone(&self.ledger),
            Arc::clone(&self.notifier),
            self.accounts.clone(),
        )
        .with_interval(self.settings.intervals.reconcile());
        tasks.spawn(reconciler.run(shutdown.clone()));

        info!(
            "Orchestrator running: {} monitors on {} (auto-trading {})",
            self.accounts.len(),
            self.settings.symbol,
            self.settings.auto_trading
        );

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Loop task ended abnormally: {}", e);
            }
        }

        info!("All loops stopped");
        Ok(())
    }
}
