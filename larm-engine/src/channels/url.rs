//! Url channel: one HTTP request per notification.
//!
//! The expanded address is the URL, the expanded message the body. Delivery
//! is best-effort: failures are logged and the notification is discarded.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method};
use tracing::{debug, warn};

use larm_config::{AlerterConfig, UrlChannelConfig};

use super::Channel;
use crate::alert::Alert;
use crate::error::ChannelError;

pub const URL_CHANNEL: &str = "url";

pub struct UrlChannel {
    client: Client,
    config: UrlChannelConfig,
}

impl UrlChannel {
    pub fn new(config: &UrlChannelConfig) -> Result<Self, ChannelError> {
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
        })
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), ChannelError> {
        let Some(subscription) = alert.subscription.as_ref() else {
            return Ok(());
        };
        let url = subscription.address_for(alert);
        if url.trim().is_empty() {
            return Err(ChannelError::Address(format!(
                "empty url for subscription '{}'",
                subscription.pattern()
            )));
        }
        let method = request_method(
            subscription.params.get("method").map(String::as_str),
            &self.config.method,
        );
        let body = subscription.message_for_status(alert);

        let response = self
            .client
            .request(method, url.trim())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header("X-Larm-Alert", alert.id.as_str())
            .header("X-Larm-Status", alert.status.as_str())
            .body(body)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

fn build_client(config: &UrlChannelConfig) -> Result<Client, ChannelError> {
    Ok(Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()?)
}

/// Method named by the subscription, else by the channel configuration,
/// else `POST`.
fn request_method(param: Option<&str>, configured: &str) -> Method {
    param
        .into_iter()
        .chain(std::iter::once(configured))
        .find_map(|name| Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes()).ok())
        .unwrap_or(Method::POST)
}

#[async_trait]
impl Channel for UrlChannel {
    fn name(&self) -> &str {
        URL_CHANNEL
    }

    async fn notify(&mut self, alert: Alert, _now: DateTime<Utc>) {
        let wanted = alert
            .subscription
            .as_ref()
            .is_some_and(|s| s.notifies(alert.status));
        if !wanted {
            return;
        }
        match self.deliver(&alert).await {
            Ok(()) => debug!(alert = %alert.id, "Url notification delivered"),
            Err(e) => warn!(alert = %alert.id, "Url notification dropped: {e}"),
        }
    }

    async fn set_config(&mut self, config: &AlerterConfig, _now: DateTime<Utc>) {
        if config.channels.url == self.config {
            return;
        }
        match build_client(&config.channels.url) {
            Ok(client) => {
                self.client = client;
                self.config = config.channels.url.clone();
            }
            Err(e) => warn!("Keeping previous url channel settings: {e}"),
        }
    }
}
