//! Address and message templates.
//!
//! | Token                | Expands to                                  |
//! |----------------------|---------------------------------------------|
//! | `%!alertid`          | alert identifier                            |
//! | `%!status`           | `raised`, `canceled`, `nonexistent`, ...    |
//! | `%!risedate`         | RFC 3339 rise timestamp                     |
//! | `%!visibilitydate`   | RFC 3339 end of the rise/mayrise wait       |
//! | `%!cancellationdate` | RFC 3339 end of the drop/mayrise wait       |
//! | `%!count`            | occurrences of a one-shot alert             |
//! | `%{name}`            | subscription parameter `name`               |
//! | `%%`                 | a literal `%`                               |
//!
//! Unknown tokens are kept verbatim.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::{Captures, Regex};

use crate::alert::Alert;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(?:!([a-z]+)|\{([^}]*)\}|%)").expect("token regex is valid")
});

/// Which template of a subscription applies to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Emit,
    Cancel,
    Reminder,
}

pub(crate) const DEFAULT_RAISE_MESSAGE: &str = "raised alert: %!alertid";
pub(crate) const DEFAULT_EMIT_MESSAGE: &str = "emitted alert: %!alertid (count: %!count)";
pub(crate) const DEFAULT_CANCEL_MESSAGE: &str = "canceled alert: %!alertid";
pub(crate) const DEFAULT_REMINDER_MESSAGE: &str =
    "reminder: alert still raised: %!alertid (since %!risedate)";

pub fn expand(template: &str, alert: &Alert, params: &BTreeMap<String, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures| {
            if let Some(var) = caps.get(1) {
                variable(var.as_str(), alert).unwrap_or_else(|| caps[0].to_owned())
            } else if let Some(name) = caps.get(2) {
                params
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_owned())
            } else {
                "%".to_owned()
            }
        })
        .into_owned()
}

fn variable(name: &str, alert: &Alert) -> Option<String> {
    let value = match name {
        "alertid" => alert.id.clone(),
        "status" => alert.status.as_str().to_owned(),
        "risedate" => date(alert.rise_date),
        "visibilitydate" => date(alert.visibility_date),
        "cancellationdate" => date(alert.cancellation_date),
        "count" => alert.count.to_string(),
        _ => return None,
    };
    Some(value)
}

fn date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use chrono::TimeZone;

    fn alert() -> Alert {
        let mut alert = Alert::new("task.failure.backup");
        alert.status = AlertStatus::Raised;
        alert.rise_date = Utc.timestamp_opt(0, 0).single();
        alert.count = 3;
        alert
    }

    #[test]
    fn expands_alert_variables() {
        let text = expand(
            "%!alertid is %!status since %!risedate (%!count)",
            &alert(),
            &BTreeMap::new(),
        );
        assert_eq!(
            text,
            "task.failure.backup is raised since 1970-01-01T00:00:00Z (3)"
        );
    }

    #[test]
    fn expands_parameters_and_escapes() {
        let mut params = BTreeMap::new();
        params.insert("team".to_owned(), "ops".to_owned());
        let text = expand("%{team}@example.org 100%% %{missing} %!nope", &alert(), &params);
        assert_eq!(text, "ops@example.org 100% %{missing} %!nope");
    }

    #[test]
    fn missing_dates_expand_to_nothing() {
        let text = expand("[%!cancellationdate]", &alert(), &BTreeMap::new());
        assert_eq!(text, "[]");
    }
}
