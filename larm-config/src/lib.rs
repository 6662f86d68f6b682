//! # Larm Configuration System
//!
//! Hierarchical configuration for the alerting daemon.
//!
//! ## Features
//! - **Unified Configuration**: one document for engine delays, routing
//!   rules, gridboards, channel parameters and telemetry
//! - **Validation**: structural checks with `validator`, delay floors applied
//!   by [`AlerterConfig::floored`]
//! - **Environment Awareness**: `LARM_*` variables override file values

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

mod alerter;
mod channels;
mod error;
mod gridboard;
mod telemetry;
mod validation;

pub use alerter::{
    AlerterConfig, SettingsConfig, SubscriptionConfig, DELAY_BEFORE_FIRST_SEND_FLOOR_MS,
    DUPLICATE_EMIT_DELAY_FLOOR_MS, MIN_DELAY_BETWEEN_SEND_FLOOR_MS, REMIND_PERIOD_FLOOR_MS,
};
pub use channels::{ChannelsConfig, MailChannelConfig, UrlChannelConfig};
pub use error::ConfigError;
pub use gridboard::{DimensionConfig, GridboardConfig};
pub use telemetry::TelemetryConfig;

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct LarmConfig {
    /// Alerting engine configuration.
    #[validate(nested)]
    #[serde(default)]
    pub alerter: AlerterConfig,

    /// Logging and metrics configuration.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LarmConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/larm.yaml`, if present
    /// 3. `LARM_*` environment variables (`__` separates nesting levels)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(LarmConfig::default()));

        if Path::new("config/larm.yaml").exists() {
            figment = figment.merge(Yaml::file("config/larm.yaml"));
        } else {
            info!("config/larm.yaml not found, using default configuration");
        }

        Self::extract(figment.merge(Env::prefixed("LARM_").split("__")))
    }

    /// Load configuration from a specific file, with environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::extract(
            Figment::from(Serialized::defaults(LarmConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("LARM_").split("__")),
        )
    }

    /// Parse a YAML document, without environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(LarmConfig::default())).merge(Yaml::string(yaml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
