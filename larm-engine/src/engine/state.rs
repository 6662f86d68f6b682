//! The alert lifecycle.
//!
//! [`AlertStateMachine`] owns the registry of live alerts, the one-shot
//! deduplication records and the rule cache. It is a plain synchronous value:
//! the worker in [`super::worker`] serializes every call onto it, and tests
//! drive it directly with explicit timestamps.
//!
//! Every call returns the resulting alert snapshot, even when nothing
//! changed, so that gridboards always see the latest known status. Only
//! snapshots flagged `notify` are dispatched to channels.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use larm_config::AlerterConfig;
use larm_core::time::after;

use crate::alert::{Alert, AlertStatus};
use crate::rules::{EffectiveDelays, MatchedRules, RuleCache, RuleSet};

/// Result of one state machine step.
#[derive(Debug, Clone)]
pub struct Transition {
    pub alert: Alert,
    /// Whether channels must be told.
    pub notify: bool,
}

impl Transition {
    fn silent(alert: Alert) -> Self {
        Self {
            alert,
            notify: false,
        }
    }

    fn notify(alert: Alert) -> Self {
        Self {
            alert,
            notify: true,
        }
    }
}

/// Deduplication window of a one-shot alert.
#[derive(Debug, Clone)]
struct OneShot {
    first_emit: DateTime<Utc>,
    window_end: DateTime<Utc>,
    /// Emissions swallowed since the last notification.
    pending: u32,
}

impl OneShot {
    fn snapshot(&self, id: &str, count: u32) -> Alert {
        let mut alert = Alert::new(id);
        alert.rise_date = Some(self.first_emit);
        alert.visibility_date = Some(self.window_end);
        alert.count = count;
        alert
    }
}

pub struct AlertStateMachine {
    config: AlerterConfig,
    rules: RuleCache,
    registry: HashMap<String, Alert>,
    one_shots: HashMap<String, OneShot>,
}

impl AlertStateMachine {
    /// Creates a state machine routing to the channels named in `channels`.
    pub fn new(config: AlerterConfig, channels: &HashSet<String>) -> Self {
        let rules = RuleCache::new(RuleSet::compile(&config, channels));
        Self {
            config,
            rules,
            registry: HashMap::new(),
            one_shots: HashMap::new(),
        }
    }

    /// Replaces delays and rules. Live alerts and one-shot windows survive,
    /// the rule cache does not.
    pub fn apply_config(&mut self, config: AlerterConfig, channels: &HashSet<String>) {
        self.rules.replace(RuleSet::compile(&config, channels));
        self.config = config;
        debug!("Alerter configuration applied");
    }

    pub fn config(&self) -> &AlerterConfig {
        &self.config
    }

    pub fn status(&self, id: &str) -> AlertStatus {
        self.registry
            .get(id)
            .map(|a| a.status)
            .unwrap_or(AlertStatus::Nonexistent)
    }

    pub fn alert(&self, id: &str) -> Option<&Alert> {
        self.registry.get(id)
    }

    /// Alerts currently held in the registry.
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    /// One-shot alerts inside their deduplication window.
    pub fn deduplicating_count(&self) -> usize {
        self.one_shots.len()
    }

    pub fn rules_cache_len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&mut self, id: &str) -> Arc<MatchedRules> {
        self.rules.lookup(id)
    }

    fn delays(&mut self, id: &str) -> EffectiveDelays {
        let matched = self.rules.lookup(id);
        EffectiveDelays::resolve(&self.config, matched.settings.as_deref())
    }

    fn current(&self, id: &str) -> Alert {
        self.registry
            .get(id)
            .cloned()
            .unwrap_or_else(|| Alert::new(id))
    }

    /// Writes `alert` back when live, forgets it otherwise.
    fn store(&mut self, alert: &Alert) {
        if alert.status.is_live() {
            self.registry.insert(alert.id.clone(), alert.clone());
        } else {
            self.registry.remove(&alert.id);
        }
    }

    fn commit(&mut self, from: AlertStatus, alert: Alert, notify: bool) -> Transition {
        if from != alert.status {
            debug!(alert = %alert.id, "{} -> {}", from, alert.status);
        }
        self.store(&alert);
        if notify {
            Transition::notify(alert)
        } else {
            Transition::silent(alert)
        }
    }

    pub fn raise(&mut self, id: &str, now: DateTime<Utc>) -> Transition {
        let delays = self.delays(id);
        let mut alert = self.current(id);
        let from = alert.status;
        let notify = match from {
            AlertStatus::Nonexistent | AlertStatus::Canceled => {
                alert.status = AlertStatus::Rising;
                alert.rise_date = Some(now);
                alert.visibility_date = Some(after(now, delays.rise));
                alert.cancellation_date = None;
                false
            }
            AlertStatus::MayRise => {
                if alert.visibility_date.is_some_and(|v| now >= v) {
                    alert.become_raised(now);
                    true
                } else {
                    false
                }
            }
            AlertStatus::Dropping => {
                alert.become_raised(now);
                true
            }
            AlertStatus::Rising | AlertStatus::Raised => false,
        };
        self.commit(from, alert, notify)
    }

    pub fn raise_immediately(&mut self, id: &str, now: DateTime<Utc>) -> Transition {
        let mut alert = self.current(id);
        let from = alert.status;
        if from == AlertStatus::Raised {
            return Transition::silent(alert);
        }
        if !from.is_live() {
            alert.rise_date = Some(now);
        }
        alert.become_raised(now);
        self.commit(from, alert, true)
    }

    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> Transition {
        let delays = self.delays(id);
        let mut alert = self.current(id);
        let from = alert.status;
        match from {
            AlertStatus::Rising => {
                alert.status = AlertStatus::MayRise;
                alert.cancellation_date = Some(after(now, delays.mayrise));
            }
            AlertStatus::Raised | AlertStatus::Dropping => {
                alert.status = AlertStatus::Dropping;
                alert.cancellation_date = Some(after(now, delays.drop));
            }
            AlertStatus::Nonexistent | AlertStatus::MayRise | AlertStatus::Canceled => {}
        }
        self.commit(from, alert, false)
    }

    pub fn cancel_immediately(&mut self, id: &str, now: DateTime<Utc>) -> Transition {
        let mut alert = self.current(id);
        let from = alert.status;
        let notify = match from {
            AlertStatus::Rising | AlertStatus::MayRise => {
                alert.status = AlertStatus::Nonexistent;
                false
            }
            AlertStatus::Raised | AlertStatus::Dropping => {
                alert.status = AlertStatus::Canceled;
                alert.cancellation_date = Some(now);
                true
            }
            AlertStatus::Nonexistent | AlertStatus::Canceled => false,
        };
        self.commit(from, alert, notify)
    }

    /// One-shot alert, deduplicated within the duplicate-emit window.
    pub fn emit(&mut self, id: &str, now: DateTime<Utc>) -> Transition {
        let delays = self.delays(id);
        if let Some(record) = self.one_shots.get_mut(id) {
            if now < record.window_end {
                record.pending = record.pending.saturating_add(1);
                trace!(alert = %id, pending = record.pending, "Emission deduplicated");
                return Transition::silent(record.snapshot(id, record.pending));
            }
        }

        // An expired window whose swallowed emissions were not flushed yet
        // hands them over to this notification.
        let carried = self.one_shots.get(id).map(|r| r.pending).unwrap_or(0);
        let record = OneShot {
            first_emit: now,
            window_end: after(now, delays.duplicate_emit),
            pending: 0,
        };
        let alert = record.snapshot(id, carried.saturating_add(1));
        self.one_shots.insert(id.to_owned(), record);
        debug!(alert = %id, count = alert.count, "One-shot alert emitted");
        Transition::notify(alert)
    }

    /// Time-driven transitions and expiry of one-shot windows.
    ///
    /// Returns the snapshots whose status changed, plus one notification per
    /// expired one-shot window holding swallowed emissions.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let mut transitions = Vec::new();

        self.registry.retain(|_, alert| {
            let from = alert.status;
            let reached = |date: Option<DateTime<Utc>>| date.is_some_and(|d| now >= d);
            let notify = match from {
                AlertStatus::Rising if reached(alert.visibility_date) => {
                    alert.become_raised(now);
                    true
                }
                AlertStatus::MayRise if reached(alert.cancellation_date) => {
                    alert.status = AlertStatus::Nonexistent;
                    false
                }
                AlertStatus::MayRise if reached(alert.visibility_date) => {
                    alert.become_raised(now);
                    true
                }
                AlertStatus::Dropping if reached(alert.cancellation_date) => {
                    alert.status = AlertStatus::Canceled;
                    true
                }
                _ => return true,
            };
            debug!(alert = %alert.id, "{} -> {} on tick", from, alert.status);
            transitions.push(Transition {
                alert: alert.clone(),
                notify,
            });
            alert.status.is_live()
        });

        self.one_shots.retain(|id, record| {
            if now < record.window_end {
                return true;
            }
            if record.pending > 0 {
                debug!(alert = %id, count = record.pending, "Flushing deduplicated emissions");
                transitions.push(Transition::notify(record.snapshot(id, record.pending)));
            }
            false
        });

        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use larm_config::{SettingsConfig, SubscriptionConfig};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn channels() -> HashSet<String> {
        ["log".to_owned()].into_iter().collect()
    }

    fn machine() -> AlertStateMachine {
        let config = AlerterConfig {
            rise_delay_ms: 2_000,
            mayrise_delay_ms: 500,
            drop_delay_ms: 3_000,
            duplicate_emit_delay_ms: 1_000,
            subscriptions: vec![SubscriptionConfig::new("**", "log")],
            ..AlerterConfig::default()
        };
        AlertStateMachine::new(config, &channels())
    }

    fn notified(transitions: &[Transition]) -> Vec<(String, AlertStatus)> {
        transitions
            .iter()
            .filter(|t| t.notify)
            .map(|t| (t.alert.id.clone(), t.alert.status))
            .collect()
    }

    #[test]
    fn raise_becomes_visible_after_rise_delay() {
        let mut sm = machine();
        let t = sm.raise("x", at(0));
        assert_eq!(t.alert.status, AlertStatus::Rising);
        assert!(!t.notify);

        assert!(sm.tick(at(1_000)).is_empty());
        assert_eq!(sm.status("x"), AlertStatus::Rising);

        let ticked = sm.tick(at(2_500));
        assert_eq!(notified(&ticked), vec![("x".to_owned(), AlertStatus::Raised)]);
        assert_eq!(sm.status("x"), AlertStatus::Raised);
        assert_eq!(sm.alert("x").unwrap().rise_date, Some(at(0)));
    }

    #[test]
    fn cancel_while_rising_never_notifies() {
        let mut sm = machine();
        sm.raise("x", at(0));
        let t = sm.cancel("x", at(1_000));
        assert_eq!(t.alert.status, AlertStatus::MayRise);
        assert_eq!(t.alert.cancellation_date, Some(at(1_500)));

        let ticked = sm.tick(at(1_600));
        assert!(notified(&ticked).is_empty());
        assert_eq!(ticked[0].alert.status, AlertStatus::Nonexistent);
        assert_eq!(sm.status("x"), AlertStatus::Nonexistent);
        assert_eq!(sm.live_count(), 0);
        assert!(sm.tick(at(10_000)).is_empty());
    }

    #[test]
    fn mayrise_rises_again_once_visible() {
        let mut sm = machine();
        sm.raise("x", at(0));
        sm.cancel("x", at(1_800));
        assert!(!sm.raise("x", at(1_900)).notify);
        assert_eq!(sm.status("x"), AlertStatus::MayRise);

        let t = sm.raise("x", at(2_100));
        assert!(t.notify);
        assert_eq!(t.alert.status, AlertStatus::Raised);
        assert_eq!(t.alert.cancellation_date, None);
    }

    #[test]
    fn mayrise_tick_raises_when_visibility_comes_first() {
        let mut sm = machine();
        sm.raise("x", at(0));
        sm.cancel("x", at(1_800));
        let ticked = sm.tick(at(2_000));
        assert_eq!(notified(&ticked), vec![("x".to_owned(), AlertStatus::Raised)]);
    }

    #[test]
    fn mayrise_tick_past_both_dates_drops_silently() {
        let mut sm = machine();
        sm.raise("early", at(0));
        sm.cancel("early", at(1_000));
        sm.raise("late", at(0));
        sm.cancel("late", at(1_800));
        assert_eq!(sm.alert("late").unwrap().cancellation_date, Some(at(2_300)));

        let ticked = sm.tick(at(5_000));
        assert!(notified(&ticked).is_empty());
        assert_eq!(ticked.len(), 2);
        assert_eq!(sm.status("early"), AlertStatus::Nonexistent);
        assert_eq!(sm.status("late"), AlertStatus::Nonexistent);
        assert_eq!(sm.live_count(), 0);
    }

    #[test]
    fn huge_delays_saturate() {
        let config = AlerterConfig {
            rise_delay_ms: 10_000_000_000_000_000,
            drop_delay_ms: u64::MAX,
            duplicate_emit_delay_ms: u64::MAX,
            subscriptions: vec![SubscriptionConfig::new("**", "log")],
            ..AlerterConfig::default()
        };
        let mut sm = AlertStateMachine::new(config, &channels());
        let now = Utc::now();

        let t = sm.raise("x", now);
        assert_eq!(t.alert.status, AlertStatus::Rising);
        assert_eq!(t.alert.visibility_date, Some(DateTime::<Utc>::MAX_UTC));

        sm.raise_immediately("y", now);
        let t = sm.cancel("y", now);
        assert_eq!(t.alert.status, AlertStatus::Dropping);
        assert_eq!(t.alert.cancellation_date, Some(DateTime::<Utc>::MAX_UTC));

        assert!(sm.emit("z", now).notify);
        assert!(!sm.emit("z", now).notify);
        assert!(sm.tick(now + Duration::days(365)).is_empty());
        assert_eq!(sm.status("x"), AlertStatus::Rising);
    }

    #[test]
    fn raise_immediately_notifies_once() {
        for prepare in [0, 1, 2, 3] {
            let mut sm = machine();
            match prepare {
                1 => {
                    sm.raise("x", at(0));
                }
                2 => {
                    sm.raise("x", at(0));
                    sm.cancel("x", at(100));
                }
                3 => {
                    sm.raise_immediately("x", at(0));
                    sm.cancel("x", at(100));
                }
                _ => {}
            }
            let t = sm.raise_immediately("x", at(200));
            assert!(t.notify, "from preparation {prepare}");
            assert_eq!(t.alert.status, AlertStatus::Raised);

            let again = sm.raise_immediately("x", at(300));
            assert!(!again.notify);
            assert_eq!(again.alert.status, AlertStatus::Raised);
        }
    }

    #[test]
    fn cancel_immediately_from_visible_states() {
        let mut sm = machine();
        sm.raise_immediately("x", at(0));
        let t = sm.cancel_immediately("x", at(10));
        assert!(t.notify);
        assert_eq!(t.alert.status, AlertStatus::Canceled);
        assert_eq!(sm.live_count(), 0);

        sm.raise_immediately("y", at(0));
        sm.cancel("y", at(10));
        assert_eq!(sm.status("y"), AlertStatus::Dropping);
        let t = sm.cancel_immediately("y", at(20));
        assert!(t.notify);
        assert_eq!(t.alert.status, AlertStatus::Canceled);
    }

    #[test]
    fn cancel_immediately_from_hidden_states() {
        let mut sm = machine();
        sm.raise("x", at(0));
        let t = sm.cancel_immediately("x", at(10));
        assert!(!t.notify);
        assert_eq!(t.alert.status, AlertStatus::Nonexistent);

        sm.raise("y", at(0));
        sm.cancel("y", at(10));
        let t = sm.cancel_immediately("y", at(20));
        assert!(!t.notify);
        assert_eq!(sm.live_count(), 0);

        let t = sm.cancel_immediately("z", at(20));
        assert!(!t.notify);
        assert_eq!(t.alert.status, AlertStatus::Nonexistent);
    }

    #[test]
    fn dropping_goes_back_to_raised_or_cancels() {
        let mut sm = machine();
        sm.raise_immediately("x", at(0));
        let t = sm.cancel("x", at(1_000));
        assert_eq!(t.alert.status, AlertStatus::Dropping);
        assert_eq!(t.alert.cancellation_date, Some(at(4_000)));

        let t = sm.cancel("x", at(2_000));
        assert_eq!(t.alert.cancellation_date, Some(at(5_000)));

        let t = sm.raise("x", at(2_500));
        assert!(t.notify);
        assert_eq!(t.alert.status, AlertStatus::Raised);
        assert_eq!(t.alert.cancellation_date, None);
        assert_eq!(t.alert.rise_date, Some(at(0)));

        sm.cancel("x", at(3_000));
        assert!(sm.tick(at(5_999)).is_empty());
        let ticked = sm.tick(at(6_000));
        assert_eq!(notified(&ticked), vec![("x".to_owned(), AlertStatus::Canceled)]);
        assert_eq!(sm.live_count(), 0);
    }

    #[test]
    fn no_op_calls_still_return_a_snapshot() {
        let mut sm = machine();
        let t = sm.cancel("unknown", at(0));
        assert_eq!(t.alert.id, "unknown");
        assert_eq!(t.alert.status, AlertStatus::Nonexistent);
        assert!(!t.notify);

        sm.raise("x", at(0));
        let t = sm.raise("x", at(10));
        assert_eq!(t.alert.status, AlertStatus::Rising);
        assert_eq!(t.alert.visibility_date, Some(at(2_000)));
    }

    #[test]
    fn emissions_are_deduplicated_then_flushed() {
        let mut sm = machine();
        let first = sm.emit("ping", at(0));
        assert!(first.notify);
        assert_eq!(first.alert.count, 1);
        assert!(first.alert.is_one_shot());

        assert!(!sm.emit("ping", at(200)).notify);
        assert!(!sm.emit("ping", at(400)).notify);
        assert_eq!(sm.deduplicating_count(), 1);
        assert!(sm.tick(at(900)).is_empty());

        let ticked = sm.tick(at(1_000));
        assert_eq!(ticked.len(), 1);
        assert!(ticked[0].notify);
        assert_eq!(ticked[0].alert.count, 2);
        assert_eq!(sm.deduplicating_count(), 0);

        let again = sm.emit("ping", at(1_100));
        assert!(again.notify);
        assert_eq!(again.alert.count, 1);
    }

    #[test]
    fn lone_emission_expires_silently() {
        let mut sm = machine();
        sm.emit("ping", at(0));
        assert!(sm.tick(at(5_000)).is_empty());
        assert_eq!(sm.deduplicating_count(), 0);
    }

    #[test]
    fn emission_after_unflushed_window_carries_count() {
        let mut sm = machine();
        sm.emit("ping", at(0));
        sm.emit("ping", at(100));
        let t = sm.emit("ping", at(1_500));
        assert!(t.notify);
        assert_eq!(t.alert.count, 2);
    }

    #[test]
    fn settings_override_delays() {
        let mut config = sm_config();
        config.settings = vec![SettingsConfig {
            pattern: "fast.**".into(),
            rise_delay_ms: Some(0),
            ..SettingsConfig::default()
        }];
        let mut sm = AlertStateMachine::new(config, &channels());
        let t = sm.raise("fast.one", at(0));
        assert_eq!(t.alert.visibility_date, Some(at(0)));
        assert_eq!(notified(&sm.tick(at(0))).len(), 1);

        let t = sm.raise("slow.one", at(0));
        assert_eq!(t.alert.visibility_date, Some(at(0) + Duration::milliseconds(2_000)));
    }

    #[test]
    fn apply_config_keeps_live_alerts_and_clears_cache() {
        let mut sm = machine();
        sm.raise_immediately("x", at(0));
        sm.raise("y", at(0));
        assert_eq!(sm.rules_cache_len(), 1);

        sm.apply_config(sm_config(), &channels());
        assert_eq!(sm.rules_cache_len(), 0);
        assert_eq!(sm.status("x"), AlertStatus::Raised);
        assert_eq!(sm.status("y"), AlertStatus::Rising);
    }

    fn sm_config() -> AlerterConfig {
        AlerterConfig {
            rise_delay_ms: 2_000,
            subscriptions: vec![SubscriptionConfig::new("**", "log")],
            ..AlerterConfig::default()
        }
    }
}
