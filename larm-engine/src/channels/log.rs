//! Log channel: writes the expanded message through `tracing`.
//!
//! The subscription parameter `level` selects the level (`error`, `warn`,
//! `info`, `debug` or `trace`, default `info`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::Channel;
use crate::alert::Alert;

pub const LOG_CHANNEL: &str = "log";

#[derive(Debug, Default)]
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        LOG_CHANNEL
    }

    async fn notify(&mut self, alert: Alert, _now: DateTime<Utc>) {
        let Some(subscription) = alert.subscription.as_ref() else {
            return;
        };
        if !subscription.notifies(alert.status) {
            return;
        }
        let message = subscription.message_for_status(&alert);
        let level = subscription.params.get("level").map(String::as_str);
        match level.unwrap_or("info") {
            "error" => error!(alert = %alert.id, status = %alert.status, "{message}"),
            "warn" | "warning" => warn!(alert = %alert.id, status = %alert.status, "{message}"),
            "debug" => debug!(alert = %alert.id, status = %alert.status, "{message}"),
            "trace" => trace!(alert = %alert.id, status = %alert.status, "{message}"),
            _ => info!(alert = %alert.id, status = %alert.status, "{message}"),
        }
    }
}
