//! Zone detector and signal sources
//!
//! Both read price history through the caller's open session, so they are
//! only ever invoked inside the session gate.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::broker::BrokerTerminal;
use crate::types::{Candle, DirectionalSignal, Direction, RawZone, VotingSignal, Zone};

/// Only the most recent zones are kept per refresh
pub const MAX_ACTIVE_ZONES: usize = 10;

#[async_trait]
pub trait ZoneDetector: Send + Sync {
    async fn compute_zones(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Vec<Zone>>;
}

/// Directional predictor and voting ensemble; `None` means unavailable
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn directional(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Option<DirectionalSignal>>;

    async fn voting(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Option<VotingSignal>>;
}

/// Client for the external model service
pub struct ModelServiceClient {
    client: Client,
    base_url: String,
    history_candles: usize,
}

#[derive(Debug, Serialize)]
struct CandlePayload<'a> {
    symbol: &'a str,
    candles: &'a [Candle],
}

#[derive(Debug, Deserialize)]
struct ZonesResponse {
    zones: Vec<RawZone>,
}

#[derive(Debug, Deserialize)]
struct DirectionalResponse {
    direction: String,
    #[serde(default)]
    magnitude: Decimal,
}

#[derive(Debug, Deserialize)]
struct VotingResponse {
    recommendation: String,
    #[serde(default)]
    confidence: f64,
}

impl ModelServiceClient {
    pub fn new(base_url: &str, timeout: Duration, history_candles: usize) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            history_candles,
        })
    }

    async fn history(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Vec<Candle>> {
        let candles = session.recent_candles(symbol, self.history_candles).await?;
        if candles.is_empty() {
            return Err(anyhow::anyhow!("No price history for {}", symbol));
        }
        Ok(candles)
    }

    /// POST candles; `None` on 204 No Content
    async fn post_candles<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        symbol: &str,
        candles: &[Candle],
    ) -> anyhow::Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Posting {} candles to {}", candles.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&CandlePayload { symbol, candles })
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("Model service {} failed: {} - {}", path, status, text))
            }
        }
    }
}

/// Validate raw zones, dropping bad records, keeping the newest
pub fn accept_zones(raw: Vec<RawZone>) -> Vec<Zone> {
    let mut zones: Vec<Zone> = raw
        .into_iter()
        .filter_map(|r| match Zone::try_from(r) {
            Ok(zone) => Some(zone),
            Err(e) => {
                warn!("Dropping invalid zone: {}", e);
                None
            }
        })
        .collect();
    zones.sort_by_key(|z| z.created_at);
    let skip = zones.len().saturating_sub(MAX_ACTIVE_ZONES);
    zones.split_off(skip)
}

#[async_trait]
impl ZoneDetector for ModelServiceClient {
    async fn compute_zones(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Vec<Zone>> {
        let candles = self.history(session, symbol).await?;
        let resp: Option<ZonesResponse> = self.post_candles("/v1/zones", symbol, &candles).await?;
        Ok(resp.map(|r| accept_zones(r.zones)).unwrap_or_default())
    }
}

#[async_trait]
impl SignalSource for ModelServiceClient {
    async fn directional(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Option<DirectionalSignal>> {
        let candles = self.history(session, symbol).await?;
        let resp: Option<DirectionalResponse> = self
            .post_candles("/v1/signals/directional", symbol, &candles)
            .await?;

        Ok(resp.and_then(|r| match r.direction.parse::<Direction>() {
            Ok(direction) => Some(DirectionalSignal {
                direction,
                magnitude: r.magnitude,
            }),
            Err(e) => {
                debug!("Directional signal unusable: {}", e);
                None
            }
        }))
    }

    async fn voting(
        &self,
        session: &mut dyn BrokerTerminal,
        symbol: &str,
    ) -> anyhow::Result<Option<VotingSignal>> {
        let candles = self.history(session, symbol).await?;
        let resp: Option<VotingResponse> = self
            .post_candles("/v1/signals/voting", symbol, &candles)
            .await?;

        // Anything other than a direction (HOLD, NEUTRAL) is a hold vote
        Ok(resp.map(|r| VotingSignal {
            direction: r.recommendation.parse().ok(),
            confidence: r.confidence,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperTerminal;
    use crate::types::Credentials;
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn session() -> PaperTerminal {
        let creds = Credentials {
            login: 1,
            password: "pw".to_string(),
            server: "Paper".to_string(),
        };
        let mut terminal =
            PaperTerminal::seeded("XAUUSD", Decimal::from(2000), 3).with_account(&creds, Decimal::from(1000));
        terminal.login(&creds).await.unwrap();
        terminal
    }

    fn raw(minutes_ago: i64, direction: &str, lower: i64, upper: i64) -> RawZone {
        RawZone {
            id: None,
            created_at: Some(Utc::now() - ChronoDuration::minutes(minutes_ago)),
            direction: Some(direction.to_string()),
            lower: Some(Decimal::from(lower)),
            upper: Some(Decimal::from(upper)),
            size: None,
            score: Some(65),
        }
    }

    #[test]
    fn test_accept_zones_drops_invalid_and_keeps_newest() {
        let mut input: Vec<RawZone> = (0..12).map(|i| raw(100 - i, "BUY", 1, 2)).collect();
        input.push(raw(0, "BUY", 5, 4));
        input.push(raw(0, "HOLD", 1, 2));

        let zones = accept_zones(input);
        assert_eq!(zones.len(), MAX_ACTIVE_ZONES);
        assert!(zones.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_zones_fetched_and_validated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "zones": [
                    { "created_at": "2025-01-02T03:00:00Z", "direction": "SELL",
                      "lower": "2010.5", "upper": "2012.0", "score": 72 },
                    { "created_at": "2025-01-02T03:15:00Z", "direction": "BUY",
                      "lower": "2000", "upper": "1990", "score": 90 }
                ]
            })))
            .mount(&server)
            .await;

        let client = ModelServiceClient::new(&server.uri(), Duration::from_secs(5), 50).unwrap();
        let mut terminal = session().await;
        let zones = client.compute_zones(&mut terminal, "XAUUSD").await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].direction, Direction::Short);
        assert_eq!(zones[0].size, Decimal::new(15, 1));
    }

    #[tokio::test]
    async fn test_signals_map_labels_and_absence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/signals/directional"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/signals/voting"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "recommendation": "HOLD", "confidence": 0.4 })),
            )
            .mount(&server)
            .await;

        let client = ModelServiceClient::new(&server.uri(), Duration::from_secs(5), 50).unwrap();
        let mut terminal = session().await;
        assert!(client.directional(&mut terminal, "XAUUSD").await.unwrap().is_none());
        let vote = client.voting(&mut terminal, "XAUUSD").await.unwrap().unwrap();
        assert_eq!(vote.direction, None);
    }
}
