//! User notifications (fire-and-forget)

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery never blocks or fails the caller
pub trait Notifier: Send + Sync {
    fn notify(&self, user_token: &str, title: &str, body: &str, data: serde_json::Value);
}

/// Used when notifications are disabled
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _user_token: &str, title: &str, _body: &str, _data: serde_json::Value) {
        debug!("Notification suppressed: {}", title);
    }
}

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    sound: &'a str,
    title: &'a str,
    body: &'a str,
    data: serde_json::Value,
}

/// Expo push API sender
#[derive(Clone)]
pub struct PushNotifier {
    client: Client,
    endpoint: String,
}

impl PushNotifier {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn is_valid_token(token: &str) -> bool {
        token.starts_with("ExponentPushToken") || token.starts_with("ExpoPushToken")
    }

    /// Deliver one message and wait for the result
    pub async fn send(
        &self,
        user_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> anyhow::Result<()> {
        if !Self::is_valid_token(user_token) {
            return Err(anyhow::anyhow!("Invalid push token"));
        }
        let message = PushMessage {
            to: user_token,
            sound: "default",
            title,
            body,
            data,
        };

        let response = self.client.post(&self.endpoint).json(&message).send().await?;

        if response.status().is_success() {
            debug!("Push delivered: {}", title);
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Push failed: {} - {}", status, text))
        }
    }
}

impl Notifier for PushNotifier {
    fn notify(&self, user_token: &str, title: &str, body: &str, data: serde_json::Value) {
        if !Self::is_valid_token(user_token) {
            warn!("Skipping notification '{}': invalid push token", title);
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Skipping notification '{}': no runtime", title);
            return;
        };

        let notifier = self.clone();
        let token = user_token.to_string();
        let title = title.to_string();
        let body = body.to_string();
        handle.spawn(async move {
            if let Err(e) = notifier.send(&token, &title, &body, data).await {
                warn!("Notification '{}' not delivered: {}", title, e);
            }
        });
    }
}
