//! Live terminal bridge client
//!
//! The bridge is a small HTTP service running next to the broker terminal.
//! It exposes one JSON endpoint per terminal primitive. A login returns a
//! session token that every later request carries; logging in again on the
//! bridge terminates whatever session was active before.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::BrokerTerminal;
use crate::types::{
    AccountInfo, Candle, Credentials, Deal, LivePosition, OrderIntent, OrderReceipt, SymbolInfo,
    Ticket, Tick,
};

const SESSION_HEADER: &str = "x-session-token";

/// HTTP client for the live terminal bridge
pub struct BridgeTerminal {
    client: Client,
    base_url: String,
    session: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    login: u64,
    password: &'a str,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session_token: String,
}

#[derive(Debug, Serialize)]
struct CandleQuery {
    count: usize,
}

impl BridgeTerminal {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: None,
        })
    }

    fn token(&self) -> anyhow::Result<&str> {
        self.session
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No active bridge session"))
    }

    /// GET returning `None` on 404
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(SESSION_HEADER, self.token()?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("Bridge GET {} failed: {} - {}", path, status, text))
            }
        }
    }

    async fn get<T: DeserializeOwned + Default>(&self, path: &str) -> anyhow::Result<T> {
        Ok(self.get_optional(path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl BrokerTerminal for BridgeTerminal {
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        let url = format!("{}/session/login", self.base_url);
        let req = LoginRequest {
            login: credentials.login,
            password: &credentials.password,
            server: &credentials.server,
        };

        let response = self.client.post(&url).json(&req).send().await?;

        if response.status().is_success() {
            let resp: LoginResponse = response.json().await?;
            debug!("Bridge session opened for login {}", credentials.login);
            self.session = Some(resp.session_token);
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Bridge login failed: {} - {}", status, text))
        }
    }

    fn logout(&mut self) {
        let Some(token) = self.session.take() else {
            return;
        };
        // The remote close carries the old token, so if it lands after the
        // next login the bridge ends only that stale session.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available to close bridge session");
            return;
        };
        let request = self
            .client
            .post(format!("{}/session/logout", self.base_url))
            .header(SESSION_HEADER, token);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                warn!("Bridge logout failed: {}", e);
            }
        });
    }

    async fn current_tick(&mut self, symbol: &str) -> anyhow::Result<Option<Tick>> {
        self.get_optional(&format!("/market/{}/tick", symbol)).await
    }

    async fn account_info(&mut self) -> anyhow::Result<Option<AccountInfo>> {
        self.get_optional("/account").await
    }

    async fn symbol_info(&mut self, symbol: &str) -> anyhow::Result<Option<SymbolInfo>> {
        self.get_optional(&format!("/market/{}", symbol)).await
    }

    async fn recent_candles(&mut self, symbol: &str, count: usize) -> anyhow::Result<Vec<Candle>> {
        let url = format!("{}/market/{}/candles", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .header(SESSION_HEADER, self.token()?)
            .query(&CandleQuery { count })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Candle request failed: {} - {}", status, text))
        }
    }

    async fn position_by_ticket(&mut self, ticket: Ticket) -> anyhow::Result<Option<LivePosition>> {
        self.get_optional(&format!("/positions/{}", ticket)).await
    }

    async fn positions_for_symbol(&mut self, symbol: &str) -> anyhow::Result<Vec<LivePosition>> {
        self.get(&format!("/positions?symbol={}", symbol)).await
    }

    async fn deals_by_position(&mut self, ticket: Ticket) -> anyhow::Result<Vec<Deal>> {
        self.get(&format!("/history/deals?position={}", ticket)).await
    }

    async fn submit_order(&mut self, intent: &OrderIntent) -> anyhow::Result<OrderReceipt> {
        let url = format!("{}/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(SESSION_HEADER, self.token()?)
            .json(intent)
            .send()
            .await?;

        // Broker rejections come back as a receipt, not an HTTP error
        if response.status().is_success() || response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Order submission failed: {} - {}", status, text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OrderStatus};
    use rust_decimal::Decimal;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials {
            login: 7,
            password: "pw".to_string(),
            server: "Live-1".to_string(),
        }
    }

    async fn logged_in(server: &MockServer) -> BridgeTerminal {
        Mock::given(method("POST"))
            .and(path("/session/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "session_token": "tok-1" })),
            )
            .mount(server)
            .await;
        let mut terminal = BridgeTerminal::new(&server.uri(), Duration::from_secs(5)).unwrap();
        terminal.login(&creds()).await.unwrap();
        terminal
    }

    #[tokio::test]
    async fn test_late_logout_targets_only_the_old_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "session_token": "tok-1" })),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "session_token": "tok-2" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/logout"))
            .and(header(SESSION_HEADER, "tok-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/logout"))
            .and(header(SESSION_HEADER, "tok-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/account"))
            .and(header(SESSION_HEADER, "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "login": 8,
                "balance": "2500",
                "equity": "2500",
                "currency": "USD",
                "server": "Live-1"
            })))
            .mount(&server)
            .await;

        let mut terminal = BridgeTerminal::new(&server.uri(), Duration::from_secs(5)).unwrap();
        terminal.login(&creds()).await.unwrap();
        terminal.logout();
        terminal.login(&creds()).await.unwrap();

        // Let the detached close reach the bridge, whenever it lands
        for _ in 0..100 {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path() == "/session/logout") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let info = terminal.account_info().await.unwrap().unwrap();
        assert_eq!(info.login, 8);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad password"))
            .mount(&server)
            .await;

        let mut terminal = BridgeTerminal::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = terminal.login(&creds()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(terminal.current_tick("XAUUSD").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_position_maps_to_none() {
        let server = MockServer::start().await;
        let mut terminal = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/positions/99"))
            .and(header(SESSION_HEADER, "tok-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(terminal.position_by_ticket(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_order_is_a_receipt() {
        let server = MockServer::start().await;
        let mut terminal = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "ticket": null,
                "fill_price": null,
                "status": { "state": "rejected", "code": 10019, "reason": "no money" }
            })))
            .mount(&server)
            .await;

        let intent = OrderIntent {
            symbol: "XAUUSD".to_string(),
            direction: Direction::Short,
            entry_price: Decimal::from(2000),
            stop_loss: Decimal::from(2010),
            take_profit: Decimal::from(1950),
            lot_size: Decimal::new(5, 2),
            tag: "Voting".to_string(),
            magic: 234_001,
        };
        let receipt = terminal.submit_order(&intent).await.unwrap();
        assert!(matches!(receipt.status, OrderStatus::Rejected { code: 10019, .. }));
        assert!(receipt.confirmed_fill().is_none());
    }
}
