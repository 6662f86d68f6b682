//! Channel parameters shared by every subscription of a channel type.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct ChannelsConfig {
    #[validate(nested)]
    #[serde(default)]
    pub mail: MailChannelConfig,

    #[validate(nested)]
    #[serde(default)]
    pub url: UrlChannelConfig,
}

/// SMTP delivery parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct MailChannelConfig {
    /// SMTP relay host.
    #[validate(length(min = 1))]
    #[serde(default = "default_relay")]
    pub relay: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,

    /// `From:` mailbox.
    #[validate(custom(function = validation::validate_mailbox))]
    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Delay before retrying a failed delivery.
    #[validate(range(min = 1_000))]
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_relay() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    25
}
fn default_sender() -> String {
    "larm@localhost".into()
}
fn default_subject_prefix() -> String {
    "[larm]".into()
}
fn default_retry_delay() -> u64 {
    60_000
}

impl Default for MailChannelConfig {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            port: default_port(),
            starttls: false,
            sender: default_sender(),
            subject_prefix: default_subject_prefix(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// HTTP notification parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct UrlChannelConfig {
    /// Default method, overridden by the `method` subscription parameter.
    #[validate(custom(function = validation::validate_http_method))]
    #[serde(default = "default_method")]
    pub method: String,

    #[validate(range(min = 100, max = 300_000))]
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_method() -> String {
    "POST".into()
}
fn default_timeout() -> u64 {
    10_000
}

impl Default for UrlChannelConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            timeout_ms: default_timeout(),
        }
    }
}
