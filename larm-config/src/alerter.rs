//! Alerting engine configuration.
//!
//! Global delays, routing rules (subscriptions), per-pattern delay overrides
//! (settings), gridboard definitions and channel parameters. Everything here
//! is plain data: patterns are compiled by the engine when the configuration
//! is applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::channels::ChannelsConfig;
use crate::gridboard::GridboardConfig;
use crate::validation;

/// Floor of [`AlerterConfig::min_delay_between_send_ms`].
pub const MIN_DELAY_BETWEEN_SEND_FLOOR_MS: u64 = 60_000;
/// Floor of [`AlerterConfig::remind_period_ms`].
pub const REMIND_PERIOD_FLOOR_MS: u64 = 60_000;
/// Floor of [`AlerterConfig::delay_before_first_send_ms`].
pub const DELAY_BEFORE_FIRST_SEND_FLOOR_MS: u64 = 1_000;
/// Floor of [`AlerterConfig::duplicate_emit_delay_ms`].
pub const DUPLICATE_EMIT_DELAY_FLOOR_MS: u64 = 1_000;

/// Alerting engine configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct AlerterConfig {
    /// Grace period before a raised alert becomes visible.
    #[serde(default = "default_rise_delay")]
    pub rise_delay_ms: u64,

    /// Grace period during which an alert canceled while rising may still rise.
    #[serde(default = "default_mayrise_delay")]
    pub mayrise_delay_ms: u64,

    /// Grace period before a canceled visible alert is finally canceled.
    #[serde(default = "default_drop_delay")]
    pub drop_delay_ms: u64,

    /// Deduplication window of one-shot alerts.
    #[serde(default = "default_duplicate_emit_delay")]
    pub duplicate_emit_delay_ms: u64,

    /// Minimum interval between two mails to the same address.
    #[serde(default = "default_min_delay_between_send")]
    pub min_delay_between_send_ms: u64,

    /// Time left for related alerts to coalesce before the first mail.
    #[serde(default = "default_delay_before_first_send")]
    pub delay_before_first_send_ms: u64,

    /// Minimum spacing between reminders of a still raised alert.
    #[serde(default = "default_remind_period")]
    pub remind_period_ms: u64,

    /// Routing rules, evaluated in order.
    #[validate(nested)]
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Delay overrides, first match wins.
    #[validate(nested)]
    #[serde(default)]
    pub settings: Vec<SettingsConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub gridboards: Vec<GridboardConfig>,

    #[validate(nested)]
    #[serde(default)]
    pub channels: ChannelsConfig,
}

fn default_rise_delay() -> u64 {
    120_000
}
fn default_mayrise_delay() -> u64 {
    45_000
}
fn default_drop_delay() -> u64 {
    900_000
}
fn default_duplicate_emit_delay() -> u64 {
    60_000
}
fn default_min_delay_between_send() -> u64 {
    600_000
}
fn default_delay_before_first_send() -> u64 {
    30_000
}
fn default_remind_period() -> u64 {
    3_600_000
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            rise_delay_ms: default_rise_delay(),
            mayrise_delay_ms: default_mayrise_delay(),
            drop_delay_ms: default_drop_delay(),
            duplicate_emit_delay_ms: default_duplicate_emit_delay(),
            min_delay_between_send_ms: default_min_delay_between_send(),
            delay_before_first_send_ms: default_delay_before_first_send(),
            remind_period_ms: default_remind_period(),
            subscriptions: Vec::new(),
            settings: Vec::new(),
            gridboards: Vec::new(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AlerterConfig {
    /// Returns a copy with every delay raised to its minimum floor.
    pub fn floored(mut self) -> Self {
        self.min_delay_between_send_ms = floor(
            "min_delay_between_send_ms",
            self.min_delay_between_send_ms,
            MIN_DELAY_BETWEEN_SEND_FLOOR_MS,
        );
        self.remind_period_ms = floor(
            "remind_period_ms",
            self.remind_period_ms,
            REMIND_PERIOD_FLOOR_MS,
        );
        self.delay_before_first_send_ms = floor(
            "delay_before_first_send_ms",
            self.delay_before_first_send_ms,
            DELAY_BEFORE_FIRST_SEND_FLOOR_MS,
        );
        self.duplicate_emit_delay_ms = floor(
            "duplicate_emit_delay_ms",
            self.duplicate_emit_delay_ms,
            DUPLICATE_EMIT_DELAY_FLOOR_MS,
        );
        self
    }
}

fn floor(name: &str, value: u64, min: u64) -> u64 {
    if value < min {
        debug!("{name} = {value} below floor, using {min}");
        min
    } else {
        value
    }
}

/// A routing rule mapping alert ids to a channel.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SubscriptionConfig {
    /// Glob (or `^`-prefixed regex) selecting alert ids.
    #[validate(length(min = 1))]
    pub pattern: String,

    /// Target channel name, or `stop` to end rule evaluation.
    #[validate(custom(function = validation::validate_channel_name))]
    pub channel: String,

    /// Address template (mail recipients, url, ...).
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub emit_message: String,

    #[serde(default)]
    pub cancel_message: String,

    #[serde(default)]
    pub reminder_message: String,

    #[serde(default = "default_true")]
    pub notify_emit: bool,

    #[serde(default = "default_true")]
    pub notify_cancel: bool,

    /// Periodic reminders while raised; implies `notify_emit`.
    #[serde(default)]
    pub notify_reminder: bool,

    /// Free parameters available to templates as `%{name}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl SubscriptionConfig {
    /// Minimal subscription with default templates and flags.
    pub fn new(pattern: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            channel: channel.into(),
            address: String::new(),
            emit_message: String::new(),
            cancel_message: String::new(),
            reminder_message: String::new(),
            notify_emit: true,
            notify_cancel: true,
            notify_reminder: false,
            params: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

/// Per-pattern delay overrides.
#[derive(Debug, Default, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SettingsConfig {
    #[validate(length(min = 1))]
    pub pattern: String,

    #[serde(default)]
    pub rise_delay_ms: Option<u64>,

    #[serde(default)]
    pub mayrise_delay_ms: Option<u64>,

    #[serde(default)]
    pub drop_delay_ms: Option<u64>,

    #[serde(default)]
    pub duplicate_emit_delay_ms: Option<u64>,
}
