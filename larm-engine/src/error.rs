use thiserror::Error;

use larm_config::ConfigError;
use larm_core::CoreError;

#[derive(Debug, Error)]
pub enum AlerterError {
    #[error("Alerter stopped")]
    Stopped,

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("Channel setup failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Delivery errors reported by channel implementations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Invalid mailbox: {0}")]
    Mailbox(#[from] lettre::address::AddressError),

    #[error("Cannot build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel not configured")]
    NotConfigured,
}

impl ChannelError {
    /// Whether retrying the same delivery later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ChannelError::Address(_) | ChannelError::Mailbox(_) | ChannelError::Message(_)
        )
    }
}
