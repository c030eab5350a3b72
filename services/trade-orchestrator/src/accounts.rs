//! Account credential store

use async_trait::async_trait;
use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::RiskDefaults;
use crate::strategy::Strategy;
use crate::types::{AccountId, Credentials, RiskConfig};

/// Everything a monitor needs to trade one account
#[derive(Debug, Clone, PartialEq)]
pub struct AccountProfile {
    pub id: AccountId,
    pub name: String,
    pub credentials: Credentials,
    pub risk: RiskConfig,
    pub strategy: Strategy,
    /// Ledger balance used the first time the account is seen
    pub opening_balance: Decimal,
    pub push_token: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list_active_accounts(&self) -> anyhow::Result<Vec<AccountProfile>>;
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: AccountId,
    #[serde(default)]
    name: Option<String>,
    login: Option<u64>,
    password: Option<String>,
    server: Option<String>,
    strategy: Option<String>,
    risk_percentage: Option<Decimal>,
    min_lot: Option<Decimal>,
    max_lot: Option<Decimal>,
    #[serde(default)]
    balance: Decimal,
    push_token: Option<String>,
}

/// Accounts read from a YAML file on every listing
pub struct YamlAccountStore {
    path: PathBuf,
    defaults: RiskDefaults,
}

impl YamlAccountStore {
    pub fn new(path: impl Into<PathBuf>, defaults: RiskDefaults) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }
}

#[async_trait]
impl CredentialStore for YamlAccountStore {
    async fn list_active_accounts(&self) -> anyhow::Result<Vec<AccountProfile>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read accounts file {:?}", self.path))?;
        let accounts = parse_accounts(&text, &self.defaults)?;
        info!("Loaded {} active accounts from {:?}", accounts.len(), self.path);
        Ok(accounts)
    }
}

/// Parse the accounts document, skipping inactive or malformed entries
pub fn parse_accounts(yaml: &str, defaults: &RiskDefaults) -> anyhow::Result<Vec<AccountProfile>> {
    let file: AccountsFile = serde_yaml::from_str(yaml).context("Invalid accounts file")?;
    Ok(file
        .accounts
        .into_iter()
        .filter_map(|record| activate(record, defaults))
        .collect())
}

fn activate(record: AccountRecord, defaults: &RiskDefaults) -> Option<AccountProfile> {
    let id = record.id;
    let (Some(login), Some(password), Some(server)) = (record.login, record.password, record.server)
    else {
        info!("Account {} has no login configured, skipping", id);
        return None;
    };

    let tag = record.strategy.unwrap_or_default();
    let strategy = match tag.parse::<Strategy>() {
        Ok(strategy) => strategy,
        Err(e) => {
            warn!("Account {}: {}, skipping", id, e);
            return None;
        }
    };

    let risk = RiskConfig {
        risk_percentage: record.risk_percentage.unwrap_or(defaults.risk_percentage),
        min_lot: record.min_lot.unwrap_or(defaults.min_lot),
        max_lot: record.max_lot.unwrap_or(defaults.max_lot),
    };
    if let Err(e) = risk.validate() {
        warn!("Account {}: {}, skipping", id, e);
        return None;
    }

    Some(AccountProfile {
        id,
        name: record.name.unwrap_or_else(|| format!("account-{}", id)),
        credentials: Credentials {
            login,
            password,
            server,
        },
        risk,
        strategy,
        opening_balance: record.balance,
        push_token: record.push_token,
    })
}
