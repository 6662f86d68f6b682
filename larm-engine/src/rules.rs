//! ## larm-engine::rules
//! **Subscriptions, settings and the per-id rule cache**
//!
//! Rules are compiled from configuration once per `apply_config`. Resolving
//! which subscriptions and which settings apply to an alert id is memoized in
//! [`RuleCache`]; the cache is dropped wholesale on reload and whenever it
//! grows past [`RULE_CACHE_MAX_ENTRIES`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use larm_config::{AlerterConfig, SettingsConfig, SubscriptionConfig};
use larm_core::pattern::{PatternError, PatternMatcher};
use larm_core::time::millis;

use crate::alert::{Alert, AlertStatus};
use crate::template::{self, MessageKind};

/// Channel name ending rule evaluation for the ids it matches.
pub const STOP_CHANNEL: &str = "stop";

/// Size above which the rule cache is cleared.
pub const RULE_CACHE_MAX_ENTRIES: usize = 1000;

/// A compiled routing rule. Immutable; rebuilt on reload.
#[derive(Debug)]
pub struct AlertSubscription {
    matcher: PatternMatcher,
    pub channel: String,
    pub address: String,
    pub emit_message: String,
    pub cancel_message: String,
    pub reminder_message: String,
    pub notify_emit: bool,
    pub notify_cancel: bool,
    pub notify_reminder: bool,
    pub params: BTreeMap<String, String>,
}

impl AlertSubscription {
    pub fn compile(config: &SubscriptionConfig) -> Result<Self, PatternError> {
        Ok(Self {
            matcher: PatternMatcher::compile(&config.pattern)?,
            channel: config.channel.clone(),
            address: config.address.clone(),
            emit_message: config.emit_message.clone(),
            cancel_message: config.cancel_message.clone(),
            reminder_message: config.reminder_message.clone(),
            notify_emit: config.notify_emit || config.notify_reminder,
            notify_cancel: config.notify_cancel,
            notify_reminder: config.notify_reminder,
            params: config.params.clone(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn is_match(&self, id: &str) -> bool {
        self.matcher.is_match(id)
    }

    pub fn is_stop(&self) -> bool {
        self.channel == STOP_CHANNEL
    }

    /// Whether a snapshot in `status` should reach this subscription's channel.
    pub fn notifies(&self, status: AlertStatus) -> bool {
        match status {
            AlertStatus::Raised | AlertStatus::Nonexistent => self.notify_emit,
            AlertStatus::Canceled => self.notify_cancel,
            _ => false,
        }
    }

    /// Whether the channel must see a snapshot in `status`. Wider than
    /// [`Self::notifies`]: a cancellation always reaches a reminding
    /// subscription so the channel can stop reminding.
    pub fn routes(&self, status: AlertStatus) -> bool {
        self.notifies(status) || (status == AlertStatus::Canceled && self.notify_reminder)
    }

    pub fn address_for(&self, alert: &Alert) -> String {
        template::expand(&self.address, alert, &self.params)
    }

    pub fn message_for(&self, alert: &Alert, kind: MessageKind) -> String {
        let configured = match kind {
            MessageKind::Emit => &self.emit_message,
            MessageKind::Cancel => &self.cancel_message,
            MessageKind::Reminder => &self.reminder_message,
        };
        let source = if !configured.is_empty() {
            configured.as_str()
        } else {
            match kind {
                MessageKind::Emit if alert.is_one_shot() => template::DEFAULT_EMIT_MESSAGE,
                MessageKind::Emit => template::DEFAULT_RAISE_MESSAGE,
                MessageKind::Cancel => template::DEFAULT_CANCEL_MESSAGE,
                MessageKind::Reminder => template::DEFAULT_REMINDER_MESSAGE,
            }
        };
        template::expand(source, alert, &self.params)
    }

    /// Message matching the snapshot's own status.
    pub fn message_for_status(&self, alert: &Alert) -> String {
        let kind = if alert.status == AlertStatus::Canceled {
            MessageKind::Cancel
        } else {
            MessageKind::Emit
        };
        self.message_for(alert, kind)
    }
}

/// A compiled delay override.
#[derive(Debug)]
pub struct AlertSettings {
    matcher: PatternMatcher,
    pub rise_delay_ms: Option<u64>,
    pub mayrise_delay_ms: Option<u64>,
    pub drop_delay_ms: Option<u64>,
    pub duplicate_emit_delay_ms: Option<u64>,
}

impl AlertSettings {
    pub fn compile(config: &SettingsConfig) -> Result<Self, PatternError> {
        Ok(Self {
            matcher: PatternMatcher::compile(&config.pattern)?,
            rise_delay_ms: config.rise_delay_ms,
            mayrise_delay_ms: config.mayrise_delay_ms,
            drop_delay_ms: config.drop_delay_ms,
            duplicate_emit_delay_ms: config.duplicate_emit_delay_ms,
        })
    }

    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }
}

/// Delays applying to one alert id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveDelays {
    pub rise: Duration,
    pub mayrise: Duration,
    pub drop: Duration,
    pub duplicate_emit: Duration,
}

impl EffectiveDelays {
    pub fn resolve(config: &AlerterConfig, settings: Option<&AlertSettings>) -> Self {
        let pick = |over: Option<u64>, global: u64| millis(over.unwrap_or(global));
        Self {
            rise: pick(settings.and_then(|s| s.rise_delay_ms), config.rise_delay_ms),
            mayrise: pick(
                settings.and_then(|s| s.mayrise_delay_ms),
                config.mayrise_delay_ms,
            ),
            drop: pick(settings.and_then(|s| s.drop_delay_ms), config.drop_delay_ms),
            duplicate_emit: pick(
                settings.and_then(|s| s.duplicate_emit_delay_ms),
                config.duplicate_emit_delay_ms,
            ),
        }
    }
}

/// Every compiled rule of one configuration generation.
#[derive(Debug, Default)]
pub struct RuleSet {
    subscriptions: Vec<Arc<AlertSubscription>>,
    settings: Vec<Arc<AlertSettings>>,
}

impl RuleSet {
    /// Compiles the rules of `config`.
    ///
    /// Rules with an invalid pattern, or naming a channel missing from
    /// `channels`, are logged and left out.
    pub fn compile(config: &AlerterConfig, channels: &HashSet<String>) -> Self {
        let mut subscriptions = Vec::with_capacity(config.subscriptions.len());
        for sub in &config.subscriptions {
            if sub.channel != STOP_CHANNEL && !channels.contains(&sub.channel) {
                warn!(
                    "Ignoring subscription '{}': unknown channel '{}'",
                    sub.pattern, sub.channel
                );
                continue;
            }
            match AlertSubscription::compile(sub) {
                Ok(compiled) => subscriptions.push(Arc::new(compiled)),
                Err(e) => warn!("Ignoring subscription '{}': {e}", sub.pattern),
            }
        }

        let mut settings = Vec::with_capacity(config.settings.len());
        for setting in &config.settings {
            match AlertSettings::compile(setting) {
                Ok(compiled) => settings.push(Arc::new(compiled)),
                Err(e) => warn!("Ignoring settings '{}': {e}", setting.pattern),
            }
        }

        debug!(
            "Compiled {} subscriptions and {} settings",
            subscriptions.len(),
            settings.len()
        );
        Self {
            subscriptions,
            settings,
        }
    }

    pub fn subscriptions(&self) -> &[Arc<AlertSubscription>] {
        &self.subscriptions
    }

    pub fn settings(&self) -> &[Arc<AlertSettings>] {
        &self.settings
    }

    /// Uncached resolution: matching subscriptions in configured order up to
    /// the first `stop`, and the first matching settings.
    pub fn resolve(&self, id: &str) -> MatchedRules {
        let mut subscriptions = Vec::new();
        for sub in &self.subscriptions {
            if !sub.is_match(id) {
                continue;
            }
            if sub.is_stop() {
                break;
            }
            subscriptions.push(Arc::clone(sub));
        }
        let settings = self
            .settings
            .iter()
            .find(|s| s.matcher.is_match(id))
            .cloned();
        MatchedRules {
            subscriptions,
            settings,
        }
    }
}

/// Rules resolved for one alert id.
#[derive(Debug, Default)]
pub struct MatchedRules {
    pub subscriptions: Vec<Arc<AlertSubscription>>,
    pub settings: Option<Arc<AlertSettings>>,
}

/// Memoized [`RuleSet::resolve`].
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: RuleSet,
    entries: HashMap<String, Arc<MatchedRules>>,
}

impl RuleCache {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            entries: HashMap::new(),
        }
    }

    /// Installs a new rule generation and forgets every cached entry.
    pub fn replace(&mut self, rules: RuleSet) {
        self.rules = rules;
        self.entries.clear();
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn lookup(&mut self, id: &str) -> Arc<MatchedRules> {
        if let Some(entry) = self.entries.get(id) {
            return Arc::clone(entry);
        }
        if self.entries.len() >= RULE_CACHE_MAX_ENTRIES {
            debug!("Rule cache reached {} entries, clearing", self.entries.len());
            self.entries.clear();
        }
        let entry = Arc::new(self.rules.resolve(id));
        self.entries.insert(id.to_owned(), Arc::clone(&entry));
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
