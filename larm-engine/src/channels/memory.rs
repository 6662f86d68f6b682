//! In-memory channel keeping every snapshot it receives.
//!
//! Used by tests and by embedders that poll notifications instead of
//! pushing them somewhere.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use larm_config::AlerterConfig;

use super::Channel;
use crate::alert::{Alert, AlertStatus};

#[derive(Debug, Default)]
struct Recorded {
    alerts: Vec<Alert>,
    configured: usize,
}

/// Shared view on what a [`MemoryChannel`] received.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    inner: Arc<Mutex<Recorded>>,
}

impl MemoryRecorder {
    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.lock().alerts.clone()
    }

    /// `(id, status)` pairs in delivery order.
    pub fn statuses(&self) -> Vec<(String, AlertStatus)> {
        self.inner
            .lock()
            .alerts
            .iter()
            .map(|a| (a.id.clone(), a.status))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn configure_count(&self) -> usize {
        self.inner.lock().configured
    }

    pub fn clear(&self) {
        self.inner.lock().alerts.clear();
    }
}

pub struct MemoryChannel {
    name: String,
    recorder: MemoryRecorder,
}

impl MemoryChannel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorder: MemoryRecorder::default(),
        }
    }

    pub fn recorder(&self) -> MemoryRecorder {
        self.recorder.clone()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&mut self, alert: Alert, _now: DateTime<Utc>) {
        self.recorder.inner.lock().alerts.push(alert);
    }

    async fn set_config(&mut self, _config: &AlerterConfig, _now: DateTime<Utc>) {
        self.recorder.inner.lock().configured += 1;
    }
}
