//! Trade-attempt journal (journal/attempts.jsonl)
//!
//! Every attempt is appended before submission and again with its outcome,
//! so an order that crashed mid-flight still leaves a trace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use crate::types::{AccountId, Direction, OrderIntent, Ticket};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Written before the order goes out
    Pending,
    Filled { ticket: Ticket, fill_price: Decimal },
    Rejected { code: i64, reason: String },
    Failed { error: String },
    /// Auto-trading off; written once per zone or voting direction
    Recommended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAttempt {
    pub attempt_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub account_id: AccountId,
    pub strategy: String,
    pub symbol: String,
    pub direction: Direction,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub lot_size: Decimal,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl TradeAttempt {
    pub fn new(account_id: AccountId, intent: &OrderIntent) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            account_id,
            strategy: intent.tag.clone(),
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            price: intent.entry_price,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            lot_size: intent.lot_size,
            outcome: AttemptOutcome::Pending,
        }
    }

    /// Same attempt with its final outcome
    pub fn resolved(&self, outcome: AttemptOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
            ..self.clone()
        }
    }
}

/// Append-only JSONL writer
pub struct TradeJournal {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TradeJournal {
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        Ok(Self {
            path: Some(dir.join("attempts.jsonl")),
            write_lock: Mutex::new(()),
        })
    }

    /// Journal that records nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one line; failures are logged, never returned
    pub async fn record(&self, attempt: &TradeAttempt) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.append(path, attempt).await {
            error!("Failed to journal attempt {}: {}", attempt.attempt_id, e);
        }
    }

    async fn append(&self, path: &Path, attempt: &TradeAttempt) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(attempt)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("Journaled attempt {}", attempt.attempt_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> OrderIntent {
        OrderIntent {
            symbol: "XAUUSD".to_string(),
            direction: Direction::Short,
            entry_price: Decimal::from(2010),
            stop_loss: Decimal::from(2012),
            take_profit: Decimal::from(2000),
            lot_size: Decimal::new(4, 2),
            tag: "Advanced".to_string(),
            magic: 234_000,
        }
    }

    #[tokio::test]
    async fn test_attempts_append_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = TradeJournal::open(dir.path()).await.unwrap();

        let attempt = TradeAttempt::new(3, &intent());
        journal.record(&attempt).await;
        journal
            .record(&attempt.resolved(AttemptOutcome::Filled {
                ticket: 55,
                fill_price: Decimal::from(2010),
            }))
            .await;

        let text = tokio::fs::read_to_string(dir.path().join("attempts.jsonl"))
            .await
            .unwrap();
        let lines: Vec<TradeAttempt> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].outcome, AttemptOutcome::Pending);
        assert_eq!(lines[0].attempt_id, lines[1].attempt_id);
        assert!(matches!(lines[1].outcome, AttemptOutcome::Filled { ticket: 55, .. }));
    }
}
