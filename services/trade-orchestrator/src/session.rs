//! Session gate: exclusive, scoped access to the broker terminal
//!
//! The terminal supports one login at a time, so every component funnels
//! through [`SessionGate`]. Acquiring a [`SessionGuard`] takes the lock and
//! logs in; dropping it logs out and only then releases the lock, on every
//! exit path including early returns and panics.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::broker::BrokerTerminal;
use crate::types::Credentials;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("login {login} failed: {source}")]
    Login {
        login: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// Process-wide gate around the single broker terminal
pub struct SessionGate {
    terminal: Mutex<Box<dyn BrokerTerminal>>,
}

/// Open session bound to one set of credentials
///
/// Never hold one across a sleep: every other account is waiting on it.
pub struct SessionGuard<'g> {
    terminal: MutexGuard<'g, Box<dyn BrokerTerminal>>,
    login: u64,
}

impl SessionGate {
    pub fn new(terminal: impl BrokerTerminal + 'static) -> Self {
        Self::from_boxed(Box::new(terminal))
    }

    pub fn from_boxed(terminal: Box<dyn BrokerTerminal>) -> Self {
        Self {
            terminal: Mutex::new(terminal),
        }
    }

    /// Wait for the terminal, then log in with `credentials`
    pub async fn open(&self, credentials: &Credentials) -> Result<SessionGuard<'_>, SessionError> {
        let mut terminal = self.terminal.lock().await;
        if let Err(source) = terminal.login(credentials).await {
            // A half-initialised login must not leak into the next holder
            terminal.logout();
            return Err(SessionError::Login {
                login: credentials.login,
                source,
            });
        }
        debug!("Session opened for login {}", credentials.login);
        Ok(SessionGuard {
            terminal,
            login: credentials.login,
        })
    }

    /// Run `work` inside a session for `credentials`
    ///
    /// Returns `None` when the login fails (`work` is not called) or when
    /// `work` fails; both are logged here so callers only skip the cycle.
    pub async fn with_session<'g, T, F, Fut>(&'g self, credentials: &Credentials, work: F) -> Option<T>
    where
        F: FnOnce(SessionGuard<'g>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let session = match self.open(credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Skipping cycle: {}", e);
                return None;
            }
        };

        match work(session).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Session work for login {} failed: {:#}", credentials.login, e);
                None
            }
        }
    }
}

impl SessionGuard<'_> {
    pub fn account_login(&self) -> u64 {
        self.login
    }
}

impl Deref for SessionGuard<'_> {
    type Target = dyn BrokerTerminal;

    fn deref(&self) -> &Self::Target {
        &**self.terminal
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.terminal
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        // Runs before the MutexGuard field drops, so logout precedes unlock
        self.terminal.logout();
        debug!("Session closed for login {}", self.login);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTerminal;
    use rust_decimal::Decimal;

    fn creds(login: u64) -> Credentials {
        Credentials {
            login,
            password: format!("pw{}", login),
            server: "Paper".to_string(),
        }
    }

    fn gate() -> SessionGate {
        SessionGate::new(
            PaperTerminal::seeded("XAUUSD", Decimal::from(2000), 1)
                .with_account(&creds(1), Decimal::from(1000))
                .with_account(&creds(2), Decimal::from(5000)),
        )
    }

    #[tokio::test]
    async fn test_session_binds_supplied_credentials() {
        let gate = gate();
        let balance = gate
            .with_session(&creds(2), |mut s| async move {
                let info = s.account_info().await?;
                Ok(info.map(|i| (i.login, i.balance)))
            })
            .await
            .flatten();
        assert_eq!(balance, Some((2, Decimal::from(5000))));
    }

    #[tokio::test]
    async fn test_failed_login_skips_work() {
        let gate = gate();
        let mut called = false;
        let result = gate
            .with_session(&creds(9), |_s| {
                called = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.is_none());
        assert!(!called);

        // Gate is usable again afterwards
        assert!(gate.with_session(&creds(1), |_s| async { Ok(()) }).await.is_some());
    }

    #[tokio::test]
    async fn test_work_error_still_logs_out() {
        let gate = gate();
        let result: Option<()> = gate
            .with_session(&creds(1), |_s| async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert!(result.is_none());

        // Terminal is logged out: raw access without a login fails
        let mut terminal = gate.terminal.lock().await;
        assert!(terminal.account_info().await.is_err());
    }
}
