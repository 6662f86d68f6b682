//! ## larm-engine::channels::mail
//! **Batched, throttled mail notifications with reminders**
//!
//! One [`MailQueue`] per destination address. Notifications are not mailed
//! one by one: the first one schedules a flush after the first-send grace
//! delay, letting related alerts coalesce, and two mails to the same address
//! are always at least the minimum inter-send interval apart.
//!
//! A flush composes a single mail with three sections (raised, canceled,
//! reminders). On success the pending lists are cleared; on a transient
//! failure nothing is lost and the flush is retried after the configured
//! retry delay.
//!
//! Delivery goes through the [`MailTransport`] trait; [`SmtpMailTransport`]
//! is the `lettre` implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lettre::message::{header::ContentType, Mailbox};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use larm_config::{AlerterConfig, MailChannelConfig};
use larm_core::time::{after, millis};

use super::Channel;
use crate::alert::{Alert, AlertStatus};
use crate::error::ChannelError;
use crate::template::MessageKind;

pub const MAIL_CHANNEL: &str = "mail";

/// A composed mail, before transport-specific encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), ChannelError>;

    /// Applies new channel parameters.
    fn reconfigure(&mut self, _config: &MailChannelConfig) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// SMTP delivery through `lettre`.
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    config: MailChannelConfig,
}

impl SmtpMailTransport {
    pub fn new(config: &MailChannelConfig) -> Result<Self, ChannelError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.relay)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.relay.as_str())
        };
        Ok(Self {
            mailer: builder.port(config.port).build(),
            sender: config.sender.parse()?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), ChannelError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &mail.to {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }
        let message = builder.body(mail.body.clone())?;
        self.mailer.send(message).await?;
        Ok(())
    }

    fn reconfigure(&mut self, config: &MailChannelConfig) -> Result<(), ChannelError> {
        if *config != self.config {
            *self = Self::new(config)?;
            debug!(relay = %config.relay, port = config.port, "SMTP transport rebuilt");
        }
        Ok(())
    }
}

/// Pacing parameters taken from the alerter configuration.
#[derive(Debug, Clone)]
struct MailSettings {
    min_delay_between_send: Duration,
    delay_before_first_send: Duration,
    remind_period: Duration,
    retry_delay: Duration,
    subject_prefix: String,
}

impl MailSettings {
    fn from_config(config: &AlerterConfig) -> Self {
        Self {
            min_delay_between_send: millis(config.min_delay_between_send_ms),
            delay_before_first_send: millis(config.delay_before_first_send_ms),
            remind_period: millis(config.remind_period_ms),
            retry_delay: millis(config.channels.mail.retry_delay_ms),
            subject_prefix: config.channels.mail.subject_prefix.clone(),
        }
    }
}

/// Pending work for one destination address.
#[derive(Debug, Default)]
pub struct MailQueue {
    raised: Vec<Alert>,
    canceled: Vec<Alert>,
    reminders: BTreeMap<String, Alert>,
    last_sent: Option<DateTime<Utc>>,
    next_processing: Option<DateTime<Utc>>,
}

impl MailQueue {
    fn has_pending(&self) -> bool {
        !self.raised.is_empty() || !self.canceled.is_empty()
    }

    fn is_stale(&self, now: DateTime<Utc>, min_delay: Duration) -> bool {
        !self.has_pending()
            && self.reminders.is_empty()
            && self.last_sent.map_or(true, |sent| now >= after(sent, min_delay))
    }

    /// Keeps the earliest of the current and the requested processing time.
    fn schedule(&mut self, at: DateTime<Utc>) {
        self.next_processing = Some(self.next_processing.map_or(at, |current| current.min(at)));
    }

    fn push(list: &mut Vec<Alert>, alert: Alert) {
        match list.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert,
            None => list.push(alert),
        }
    }

    /// Ids of reminders due at `now`, alerts already listed as raised aside.
    fn due_reminders(&self, now: DateTime<Utc>, period: Duration) -> Vec<String> {
        self.reminders
            .values()
            .filter(|a| !self.raised.iter().any(|r| r.id == a.id))
            .filter(|a| a.last_reminded_date.map_or(true, |last| now >= after(last, period)))
            .map(|a| a.id.clone())
            .collect()
    }

    fn schedule_next_reminder(&mut self, now: DateTime<Utc>, period: Duration) {
        let next = self
            .reminders
            .values()
            .map(|a| after(a.last_reminded_date.unwrap_or(now), period))
            .min();
        if let Some(at) = next {
            self.schedule(at);
        }
    }

    fn compose(&self, address: &str, due: &[String], prefix: &str) -> OutgoingMail {
        let reminded: Vec<&Alert> = due.iter().filter_map(|id| self.reminders.get(id)).collect();

        let subject = match (self.raised.as_slice(), self.canceled.as_slice(), reminded.as_slice()) {
            ([one], [], []) if one.is_one_shot() => format!("{prefix} emitted: {}", one.id),
            ([one], [], []) => format!("{prefix} raised: {}", one.id),
            ([], [one], []) => format!("{prefix} canceled: {}", one.id),
            ([], [], [one]) => format!("{prefix} reminder: {}", one.id),
            (raised, canceled, reminded) => {
                let parts: Vec<String> = [
                    (raised.len(), "raised"),
                    (canceled.len(), "canceled"),
                    (reminded.len(), "reminded"),
                ]
                .into_iter()
                .filter(|(n, _)| *n > 0)
                .map(|(n, what)| format!("{n} {what}"))
                .collect();
                format!("{prefix} {}", parts.join(", "))
            }
        };

        let mut body = String::new();
        section(&mut body, "Raised alerts", &self.raised, MessageKind::Emit);
        section(&mut body, "Canceled alerts", &self.canceled, MessageKind::Cancel);
        section(&mut body, "Still raised", reminded.iter().copied(), MessageKind::Reminder);

        OutgoingMail {
            to: recipients(address),
            subject,
            body,
        }
    }
}

fn section<'a>(
    body: &mut String,
    title: &str,
    alerts: impl IntoIterator<Item = &'a Alert>,
    kind: MessageKind,
) {
    let mut lines = alerts
        .into_iter()
        .map(|alert| match alert.subscription.as_ref() {
            Some(sub) => sub.message_for(alert, kind),
            None => alert.id.clone(),
        })
        .peekable();
    if lines.peek().is_none() {
        return;
    }
    if !body.is_empty() {
        body.push('\n');
    }
    let _ = writeln!(body, "{title}:");
    for line in lines {
        let _ = writeln!(body, "  - {line}");
    }
}

fn recipients(address: &str) -> Vec<String> {
    address
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

pub struct MailChannel {
    transport: Box<dyn MailTransport>,
    settings: MailSettings,
    queues: BTreeMap<String, MailQueue>,
}

impl MailChannel {
    pub fn new(transport: Box<dyn MailTransport>) -> Self {
        Self {
            transport,
            settings: MailSettings::from_config(&AlerterConfig::default()),
            queues: BTreeMap::new(),
        }
    }

    pub fn queue(&self, address: &str) -> Option<&MailQueue> {
        self.queues.get(address)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Flushes the queue of `address` if anything is due.
    async fn process(&mut self, address: &str, now: DateTime<Utc>) {
        let settings = &self.settings;
        let Some(queue) = self.queues.get_mut(address) else {
            return;
        };
        queue.next_processing = None;

        let due = queue.due_reminders(now, settings.remind_period);
        if !queue.has_pending() && due.is_empty() {
            queue.schedule_next_reminder(now, settings.remind_period);
            return;
        }
        if let Some(sent) = queue.last_sent {
            let earliest = after(sent, settings.min_delay_between_send);
            if now < earliest {
                debug!(%address, "Mail throttled until {earliest}");
                queue.schedule(earliest);
                return;
            }
        }

        let mail = queue.compose(address, &due, &settings.subject_prefix);
        match self.transport.send(&mail).await {
            Ok(()) => {
                info!(%address, subject = %mail.subject, "Alert mail sent");
                let mut stamped: BTreeSet<String> = due.into_iter().collect();
                stamped.extend(queue.raised.drain(..).map(|a| a.id));
                queue.canceled.clear();
                for id in &stamped {
                    if let Some(reminder) = queue.reminders.get_mut(id) {
                        reminder.last_reminded_date = Some(now);
                    }
                }
                queue.last_sent = Some(now);
                queue.schedule_next_reminder(now, settings.remind_period);
            }
            Err(e) if e.is_transient() => {
                warn!(%address, "Alert mail not sent, retrying: {e}");
                queue.schedule(after(now, settings.retry_delay));
            }
            Err(e) => {
                warn!(%address, "Alert mail discarded: {e}");
                queue.raised.clear();
                queue.canceled.clear();
                queue.reminders.clear();
            }
        }
    }

    fn due_addresses(&self, now: DateTime<Utc>) -> Vec<String> {
        self.queues
            .iter()
            .filter(|(_, q)| q.next_processing.is_some_and(|at| at <= now))
            .map(|(address, _)| address.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for MailChannel {
    fn name(&self) -> &str {
        MAIL_CHANNEL
    }

    async fn notify(&mut self, alert: Alert, now: DateTime<Utc>) {
        let Some(subscription) = alert.subscription.clone() else {
            return;
        };
        let address = subscription.address_for(&alert).trim().to_owned();
        if address.is_empty() {
            warn!(
                alert = %alert.id,
                "No mail address for subscription '{}'",
                subscription.pattern()
            );
            return;
        }

        let queue = self.queues.entry(address.clone()).or_default();
        match alert.status {
            AlertStatus::Raised => {
                if subscription.notify_reminder {
                    let mut reminder = alert.clone();
                    reminder.last_reminded_date = None;
                    queue.reminders.insert(alert.id.clone(), reminder);
                }
                if subscription.notifies(AlertStatus::Raised) {
                    MailQueue::push(&mut queue.raised, alert);
                }
            }
            AlertStatus::Nonexistent if alert.is_one_shot() => {
                if subscription.notifies(AlertStatus::Nonexistent) {
                    MailQueue::push(&mut queue.raised, alert);
                }
            }
            AlertStatus::Canceled => {
                queue.reminders.remove(&alert.id);
                if subscription.notifies(AlertStatus::Canceled) {
                    MailQueue::push(&mut queue.canceled, alert);
                }
            }
            _ => return,
        }

        if queue.has_pending() {
            queue.schedule(after(now, self.settings.delay_before_first_send));
        }
        debug!(%address, "Mail queued");
    }

    async fn set_config(&mut self, config: &AlerterConfig, now: DateTime<Utc>) {
        self.settings = MailSettings::from_config(config);
        if let Err(e) = self.transport.reconfigure(&config.channels.mail) {
            warn!("Keeping previous mail transport: {e}");
        }
        let min_delay = self.settings.min_delay_between_send;
        let before = self.queues.len();
        self.queues.retain(|_, q| !q.is_stale(now, min_delay));
        if self.queues.len() < before {
            debug!("Dropped {} idle mail queues", before - self.queues.len());
        }
    }

    fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.queues.values().filter_map(|q| q.next_processing).min()
    }

    async fn wake(&mut self, now: DateTime<Utc>) {
        for address in self.due_addresses(now) {
            self.process(&address, now).await;
        }
    }

    async fn shutdown(&mut self, now: DateTime<Utc>) {
        let pending: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.has_pending())
            .map(|(address, _)| address.clone())
            .collect();
        for address in pending {
            self.process(&address, now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use parking_lot::Mutex;

    use larm_config::SubscriptionConfig;

    use crate::rules::AlertSubscription;

    #[derive(Clone, Default)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<OutgoingMail>>>,
        failing: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), ChannelError> {
            if *self.failing.lock() {
                return Err(ChannelError::NotConfigured);
            }
            self.sent.lock().push(mail.clone());
            Ok(())
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn subscription(reminders: bool) -> Arc<AlertSubscription> {
        let mut sub = SubscriptionConfig::new("**", MAIL_CHANNEL).with_address("ops@example.org");
        sub.notify_reminder = reminders;
        Arc::new(AlertSubscription::compile(&sub).unwrap())
    }

    fn snapshot(id: &str, status: AlertStatus, sub: &Arc<AlertSubscription>) -> Alert {
        let mut alert = Alert::new(id).with_subscription(Arc::clone(sub));
        alert.status = status;
        alert.rise_date = Some(at(0));
        alert
    }

    fn channel() -> (MailChannel, RecordingTransport) {
        let transport = RecordingTransport::default();
        (MailChannel::new(Box::new(transport.clone())), transport)
    }

    #[tokio::test]
    async fn coalesces_notifications_into_one_mail() {
        let (mut mail, transport) = channel();
        let sub = subscription(false);

        mail.notify(snapshot("task.failure.a", AlertStatus::Raised, &sub), at(0)).await;
        mail.notify(snapshot("task.failure.b", AlertStatus::Raised, &sub), at(5_000)).await;
        assert_eq!(mail.next_wakeup(), Some(at(30_000)));

        mail.wake(at(29_999)).await;
        assert!(transport.sent.lock().is_empty());

        mail.wake(at(30_000)).await;
        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["ops@example.org"]);
        assert_eq!(sent[0].subject, "[larm] 2 raised");
        assert!(sent[0].body.contains("raised alert: task.failure.a"));
        assert!(sent[0].body.contains("raised alert: task.failure.b"));
        assert_eq!(mail.next_wakeup(), None);
    }

    #[tokio::test]
    async fn throttles_by_minimum_interval() {
        let (mut mail, transport) = channel();
        let sub = subscription(false);

        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        mail.wake(at(30_000)).await;
        mail.notify(snapshot("a", AlertStatus::Canceled, &sub), at(60_000)).await;
        mail.wake(at(90_000)).await;
        assert_eq!(transport.sent.lock().len(), 1);
        assert_eq!(mail.next_wakeup(), Some(at(630_000)));

        mail.wake(at(630_000)).await;
        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].subject, "[larm] canceled: a");
        assert!(sent[1].body.starts_with("Canceled alerts:"));
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_without_loss() {
        let (mut mail, transport) = channel();
        let sub = subscription(false);
        *transport.failing.lock() = true;

        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        mail.wake(at(30_000)).await;
        assert!(transport.sent.lock().is_empty());
        assert_eq!(mail.next_wakeup(), Some(at(90_000)));

        *transport.failing.lock() = false;
        mail.notify(snapshot("b", AlertStatus::Raised, &sub), at(40_000)).await;
        assert_eq!(mail.next_wakeup(), Some(at(70_000)));
        mail.wake(at(70_000)).await;

        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("raised alert: a"));
        assert!(sent[0].body.contains("raised alert: b"));
    }

    #[tokio::test]
    async fn reminders_repeat_until_canceled() {
        let (mut mail, transport) = channel();
        let sub = subscription(true);
        let hour = 3_600_000;

        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        mail.wake(at(30_000)).await;
        assert_eq!(transport.sent.lock().len(), 1);
        assert_eq!(mail.next_wakeup(), Some(at(30_000 + hour)));

        mail.wake(at(30_000 + hour)).await;
        {
            let sent = transport.sent.lock();
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[1].subject, "[larm] reminder: a");
            assert!(sent[1].body.contains("reminder: alert still raised: a"));
        }

        mail.notify(snapshot("a", AlertStatus::Canceled, &sub), at(40_000 + hour)).await;
        mail.wake(at(30_000 + 2 * hour)).await;
        let sent = transport.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].subject, "[larm] canceled: a");
        assert!(mail.queue("ops@example.org").unwrap().reminders.is_empty());
        assert_eq!(mail.next_wakeup(), None);
    }

    #[tokio::test]
    async fn one_shot_emissions_are_mailed() {
        let (mut mail, transport) = channel();
        let sub = subscription(false);
        let mut alert = snapshot("disk.full", AlertStatus::Nonexistent, &sub);
        alert.count = 3;

        mail.notify(alert, at(0)).await;
        mail.wake(at(30_000)).await;
        let sent = transport.sent.lock().clone();
        assert_eq!(sent[0].subject, "[larm] emitted: disk.full");
        assert!(sent[0].body.contains("emitted alert: disk.full (count: 3)"));
    }

    #[tokio::test]
    async fn idle_queues_are_collected_on_reload() {
        let (mut mail, _transport) = channel();
        let sub = subscription(false);
        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        mail.wake(at(30_000)).await;

        let config = AlerterConfig::default();
        mail.set_config(&config, at(60_000)).await;
        assert_eq!(mail.queue_count(), 1);
        mail.set_config(&config, at(630_000)).await;
        assert_eq!(mail.queue_count(), 0);
    }

    #[tokio::test]
    async fn huge_delays_saturate() {
        let (mut mail, transport) = channel();
        let config = AlerterConfig {
            delay_before_first_send_ms: u64::MAX,
            min_delay_between_send_ms: u64::MAX,
            remind_period_ms: u64::MAX,
            ..AlerterConfig::default()
        };
        mail.set_config(&config, at(0)).await;
        let sub = subscription(true);

        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        assert_eq!(mail.next_wakeup(), Some(DateTime::<Utc>::MAX_UTC));
        mail.wake(at(1_000_000)).await;
        assert!(transport.sent.lock().is_empty());
        mail.set_config(&config, at(2_000_000)).await;
        assert_eq!(mail.queue_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_mail() {
        let (mut mail, transport) = channel();
        let sub = subscription(false);
        mail.notify(snapshot("a", AlertStatus::Raised, &sub), at(0)).await;
        mail.shutdown(at(1_000)).await;
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn splits_recipient_lists() {
        assert_eq!(
            recipients("a@example.org, b@example.org;c@example.org"),
            vec!["a@example.org", "b@example.org", "c@example.org"]
        );
    }
}
