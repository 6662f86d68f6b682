//! Channel dispatch: hands a notified snapshot to every matching channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use opentelemetry::KeyValue;
use tracing::trace;

use larm_config::AlerterConfig;
use larm_telemetry::{EventLogger, MetricsRecorder};

use crate::alert::Alert;
use crate::channels::ChannelHandle;
use crate::rules::MatchedRules;

pub struct Dispatcher {
    channels: HashMap<String, ChannelHandle>,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(channels: HashMap<String, ChannelHandle>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { channels, metrics }
    }

    /// Enqueues one copy of `alert` per matching subscription, tagged with
    /// that subscription. Returns the number of notifications handed over.
    pub async fn dispatch(&self, alert: &Alert, rules: &MatchedRules, now: DateTime<Utc>) -> usize {
        let mut delivered = 0;
        for subscription in &rules.subscriptions {
            if !subscription.routes(alert.status) {
                continue;
            }
            let Some(channel) = self.channels.get(&subscription.channel) else {
                continue;
            };
            let snapshot = alert.clone().with_subscription(Arc::clone(subscription));
            if !channel.notify(snapshot, now) {
                continue;
            }
            delivered += 1;
            self.metrics.channel_notifications.inc();
            EventLogger::log_event(
                "alert_notification",
                vec![
                    KeyValue::new("alert", alert.id.clone()),
                    KeyValue::new("status", alert.status.as_str()),
                    KeyValue::new("channel", subscription.channel.clone()),
                    KeyValue::new("count", i64::from(alert.count)),
                ],
            )
            .await;
        }
        trace!(alert = %alert.id, delivered, "Dispatched");
        delivered
    }

    pub fn configure_all(&self, config: &AlerterConfig) {
        for channel in self.channels.values() {
            channel.configure(config);
        }
    }

    /// Lets every channel run the deferred work due at `now`.
    pub fn wake_all(&self, now: DateTime<Utc>) {
        for channel in self.channels.values() {
            channel.wake(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use larm_config::SubscriptionConfig;
    use larm_core::time::VirtualClock;

    use crate::alert::AlertStatus;
    use crate::channels::{ChannelRegistry, MemoryChannel};
    use crate::rules::RuleSet;

    #[tokio::test]
    async fn dispatches_to_matching_channels_only() {
        let first = MemoryChannel::named("first");
        let second = MemoryChannel::named("second");
        let (first_rec, second_rec) = (first.recorder(), second.recorder());
        let mut registry = ChannelRegistry::new();
        registry.register(first).unwrap();
        registry.register(second).unwrap();

        let mut quiet = SubscriptionConfig::new("task.**", "second");
        quiet.notify_cancel = false;
        let config = AlerterConfig {
            subscriptions: vec![SubscriptionConfig::new("task.**", "first"), quiet],
            ..AlerterConfig::default()
        };
        let names: HashSet<String> = registry.names();
        let rules = RuleSet::compile(&config, &names);
        let workers = registry.spawn(&config, Arc::new(VirtualClock::new(0)));
        let metrics = Arc::new(MetricsRecorder::new().unwrap());
        let dispatcher = Dispatcher::new(workers.handles().clone(), Arc::clone(&metrics));

        let mut alert = Alert::new("task.failure.foo");
        alert.status = AlertStatus::Raised;
        assert_eq!(dispatcher.dispatch(&alert, &rules.resolve(&alert.id), Utc::now()).await, 2);
        alert.status = AlertStatus::Canceled;
        assert_eq!(dispatcher.dispatch(&alert, &rules.resolve(&alert.id), Utc::now()).await, 1);
        workers.shutdown().await;

        assert_eq!(first_rec.len(), 2);
        assert_eq!(second_rec.len(), 1);
        let delivered = &first_rec.alerts()[0];
        assert_eq!(
            delivered.subscription.as_ref().map(|s| s.channel.as_str()),
            Some("first")
        );
        assert_eq!(metrics.snapshot().channel_notifications, 3);
    }
}
