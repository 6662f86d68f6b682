//! ## larm-telemetry::metrics
//! **Prometheus counters of the alerting engine**
//!
//! Counters are monotonically increasing; the `*_size`/`*_count` gauges move
//! both ways and each has a high-water-mark companion. The engine worker is
//! the only writer of engine counters, the gridboard aggregator the only
//! writer of gridboard counters. Readers take an [`AlerterStats`] snapshot or
//! the Prometheus text exposition.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,

    pub emit_requests: IntCounter,
    pub raise_requests: IntCounter,
    pub cancel_requests: IntCounter,
    pub raise_immediately_requests: IntCounter,
    pub cancel_immediately_requests: IntCounter,

    pub raised_notifications: IntCounter,
    pub canceled_notifications: IntCounter,
    pub emitted_notifications: IntCounter,
    pub channel_notifications: IntCounter,

    pub rules_cache_size: IntGauge,
    pub rules_cache_hwm: IntGauge,
    pub deduplicating_alerts: IntGauge,
    pub deduplicating_alerts_hwm: IntGauge,

    pub gridboard_evaluations: IntCounter,
    pub gridboard_updates: IntCounter,
    pub gridboard_feed_drops: IntCounter,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            emit_requests: counter("larm_emit_requests_total", "emit() calls")?,
            raise_requests: counter("larm_raise_requests_total", "raise() calls")?,
            cancel_requests: counter("larm_cancel_requests_total", "cancel() calls")?,
            raise_immediately_requests: counter(
                "larm_raise_immediately_requests_total",
                "raiseImmediately() calls",
            )?,
            cancel_immediately_requests: counter(
                "larm_cancel_immediately_requests_total",
                "cancelImmediately() calls",
            )?,
            raised_notifications: counter(
                "larm_raised_notifications_total",
                "Transitions to raised",
            )?,
            canceled_notifications: counter(
                "larm_canceled_notifications_total",
                "Transitions to canceled",
            )?,
            emitted_notifications: counter(
                "larm_emitted_notifications_total",
                "One-shot alert emissions",
            )?,
            channel_notifications: counter(
                "larm_channel_notifications_total",
                "Notifications handed to channels",
            )?,
            rules_cache_size: gauge("larm_rules_cache_size", "Alert ids in the rule cache")?,
            rules_cache_hwm: gauge(
                "larm_rules_cache_hwm",
                "High-water mark of the rule cache size",
            )?,
            deduplicating_alerts: gauge(
                "larm_deduplicating_alerts",
                "One-shot alerts inside their deduplication window",
            )?,
            deduplicating_alerts_hwm: gauge(
                "larm_deduplicating_alerts_hwm",
                "High-water mark of deduplicating one-shot alerts",
            )?,
            gridboard_evaluations: counter(
                "larm_gridboard_evaluations_total",
                "Alert snapshots evaluated against gridboards",
            )?,
            gridboard_updates: counter(
                "larm_gridboard_updates_total",
                "Gridboard cells updated",
            )?,
            gridboard_feed_drops: counter(
                "larm_gridboard_feed_drops_total",
                "Snapshots dropped because the gridboard feed was full",
            )?,
            registry,
        })
    }

    /// Sets the rule cache size gauge and raises its high-water mark.
    pub fn set_rules_cache_size(&self, size: usize) {
        set_with_hwm(&self.rules_cache_size, &self.rules_cache_hwm, size);
    }

    /// Sets the deduplicating alert gauge and raises its high-water mark.
    pub fn set_deduplicating_alerts(&self, count: usize) {
        set_with_hwm(&self.deduplicating_alerts, &self.deduplicating_alerts_hwm, count);
    }

    pub fn snapshot(&self) -> AlerterStats {
        AlerterStats {
            emit_requests: self.emit_requests.get(),
            raise_requests: self.raise_requests.get(),
            cancel_requests: self.cancel_requests.get(),
            raise_immediately_requests: self.raise_immediately_requests.get(),
            cancel_immediately_requests: self.cancel_immediately_requests.get(),
            raised_notifications: self.raised_notifications.get(),
            canceled_notifications: self.canceled_notifications.get(),
            emitted_notifications: self.emitted_notifications.get(),
            channel_notifications: self.channel_notifications.get(),
            rules_cache_size: self.rules_cache_size.get().max(0) as u64,
            rules_cache_hwm: self.rules_cache_hwm.get().max(0) as u64,
            deduplicating_alerts: self.deduplicating_alerts.get().max(0) as u64,
            deduplicating_alerts_hwm: self.deduplicating_alerts_hwm.get().max(0) as u64,
            gridboard_evaluations: self.gridboard_evaluations.get(),
            gridboard_updates: self.gridboard_updates.get(),
            gridboard_feed_drops: self.gridboard_feed_drops.get(),
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn set_with_hwm(gauge: &IntGauge, hwm: &IntGauge, value: usize) {
    let value = value as i64;
    gauge.set(value);
    if value > hwm.get() {
        hwm.set(value);
    }
}

/// Point-in-time copy of every engine counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlerterStats {
    pub emit_requests: u64,
    pub raise_requests: u64,
    pub cancel_requests: u64,
    pub raise_immediately_requests: u64,
    pub cancel_immediately_requests: u64,
    pub raised_notifications: u64,
    pub canceled_notifications: u64,
    pub emitted_notifications: u64,
    pub channel_notifications: u64,
    pub rules_cache_size: u64,
    pub rules_cache_hwm: u64,
    pub deduplicating_alerts: u64,
    pub deduplicating_alerts_hwm: u64,
    pub gridboard_evaluations: u64,
    pub gridboard_updates: u64,
    pub gridboard_feed_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_keep_high_water_mark() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.set_rules_cache_size(12);
        metrics.set_rules_cache_size(3);
        metrics.set_deduplicating_alerts(2);

        let stats = metrics.snapshot();
        assert_eq!(stats.rules_cache_size, 3);
        assert_eq!(stats.rules_cache_hwm, 12);
        assert_eq!(stats.deduplicating_alerts, 2);
        assert_eq!(stats.deduplicating_alerts_hwm, 2);
    }

    #[test]
    fn exposes_prometheus_text() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.raise_requests.inc();
        metrics.raise_requests.inc();

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("larm_raise_requests_total 2"));
        assert_eq!(metrics.snapshot().raise_requests, 2);
    }
}
