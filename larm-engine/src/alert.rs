//! Alert records and their lifecycle status.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::rules::AlertSubscription;

/// Lifecycle status of a raisable alert.
///
/// Only `Rising`, `MayRise`, `Raised` and `Dropping` are ever stored in the
/// registry; `Nonexistent` and `Canceled` are transient. Channels observe
/// three logical states: raised, canceled and nonexistent (one-shot
/// emissions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Nonexistent,
    Rising,
    MayRise,
    Raised,
    Dropping,
    Canceled,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Nonexistent => "nonexistent",
            AlertStatus::Rising => "rising",
            AlertStatus::MayRise => "mayrise",
            AlertStatus::Raised => "raised",
            AlertStatus::Dropping => "dropping",
            AlertStatus::Canceled => "canceled",
        }
    }

    /// Whether an alert in this status is kept in the registry.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            AlertStatus::Rising | AlertStatus::MayRise | AlertStatus::Raised | AlertStatus::Dropping
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert snapshot.
///
/// The engine mutates its own copy; channels and gridboards receive clones.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: String,
    pub status: AlertStatus,
    pub rise_date: Option<DateTime<Utc>>,
    /// End of the rise or mayrise wait.
    pub visibility_date: Option<DateTime<Utc>>,
    /// End of the drop or mayrise wait.
    pub cancellation_date: Option<DateTime<Utc>>,
    pub last_reminded_date: Option<DateTime<Utc>>,
    /// Occurrences carried by a one-shot emission.
    pub count: u32,
    /// Subscription the snapshot is being notified under.
    pub subscription: Option<Arc<AlertSubscription>>,
}

impl Alert {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AlertStatus::Nonexistent,
            rise_date: None,
            visibility_date: None,
            cancellation_date: None,
            last_reminded_date: None,
            count: 0,
            subscription: None,
        }
    }

    pub fn with_subscription(mut self, subscription: Arc<AlertSubscription>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// One-shot emissions are delivered with no lifecycle status.
    pub fn is_one_shot(&self) -> bool {
        self.status == AlertStatus::Nonexistent && self.count > 0
    }

    pub(crate) fn become_raised(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Raised;
        self.rise_date.get_or_insert(now);
        self.visibility_date.get_or_insert(now);
        self.cancellation_date = None;
    }
}
