//! Trade Orchestrator - multi-account automated trading service
//!
//! Runs headless:
//! 1. Refreshes the shared zone list on a fixed interval
//! 2. Runs one strategy monitor per configured account
//! 3. Reconciles open trades against the broker and settles closes
//!
//! All broker access goes through a single session gate because the
//! terminal holds only one login at a time.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trade_orchestrator::{
    BridgeTerminal, BrokerTerminal, CredentialStore, JsonLedger, ModelServiceClient, NoopNotifier,
    Notifier, Orchestrator, PaperTerminal, PushNotifier, SessionGate, Settings, TradeJournal,
    TradingMode, YamlAccountStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Trade Orchestrator...");

    let settings = Settings::load()?;
    info!(
        "Symbol: {}, mode: {:?}, auto-trading: {}",
        settings.symbol, settings.trading_mode, settings.auto_trading
    );
    if !settings.auto_trading {
        warn!("Auto-trading disabled: monitors will only log recommendations");
    }

    let store = YamlAccountStore::new(&settings.paths.accounts_file, settings.risk);
    let accounts = store.list_active_accounts().await?;

    let timeout = Duration::from_secs(settings.services.request_timeout_secs);
    let terminal: Box<dyn BrokerTerminal> = match settings.trading_mode {
        TradingMode::Paper => {
            let mut paper = PaperTerminal::new(&settings.symbol, settings.paper_start_price);
            for account in &accounts {
                paper.add_account(&account.credentials, account.opening_balance);
            }
            Box::new(paper)
        }
        TradingMode::Live => Box::new(BridgeTerminal::new(&settings.services.bridge_url, timeout)?),
    };
    let gate = Arc::new(SessionGate::from_boxed(terminal));

    let models = Arc::new(ModelServiceClient::new(
        &settings.services.model_service_url,
        timeout,
        settings.services.history_candles,
    )?);

    let ledger = Arc::new(JsonLedger::open(&settings.paths.ledger_file).await?);
    let journal = Arc::new(TradeJournal::open(&settings.paths.journal_dir).await?);
    let notifier: Arc<dyn Notifier> = if settings.notifications.enabled {
        Arc::new(PushNotifier::new(&settings.notifications.push_endpoint)?)
    } else {
        Arc::new(NoopNotifier)
    };

    let (trigger, shutdown) = trade_orchestrator::shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, stopping loops...");
        }
        trigger.trigger();
    });

    let orchestrator = Orchestrator::new(
        settings,
        accounts,
        gate,
        models.clone(),
        models,
        ledger,
        notifier,
        journal,
    );
    orchestrator.run(shutdown).await
}
