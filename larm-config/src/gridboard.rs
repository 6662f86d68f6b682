//! Gridboard definitions.
//!
//! A gridboard selects alert ids with a pattern and files their status into a
//! tree keyed by one value per dimension, each value being extracted from a
//! capture group of the pattern.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct GridboardConfig {
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(default)]
    pub label: Option<String>,

    #[validate(length(min = 1))]
    pub pattern: String,

    /// Ordered dimensions, outermost first.
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub dimensions: Vec<DimensionConfig>,

    /// Age after which an `ok` cell is rendered as stale.
    #[serde(default = "default_warning_delay")]
    pub warning_delay_ms: u64,
}

fn default_warning_delay() -> u64 {
    3_600_000
}

impl GridboardConfig {
    pub fn new(id: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            pattern: pattern.into(),
            dimensions: Vec::new(),
            warning_delay_ms: default_warning_delay(),
        }
    }

    pub fn with_dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(DimensionConfig {
            name: name.into(),
            group: None,
        });
        self
    }
}

/// One gridboard axis.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct DimensionConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// Named capture group holding the value. Defaults to `name` when the
    /// pattern has such a group, else to the positional group of this
    /// dimension.
    #[serde(default)]
    pub group: Option<String>,
}
