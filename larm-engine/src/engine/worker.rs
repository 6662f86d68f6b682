//! The engine worker.
//!
//! A single tokio task owns the [`AlertStateMachine`]; public calls arrive as
//! [`AlerterCommand`]s on an unbounded mailbox and run one at a time, so the
//! registry, the rule cache and the counters are never shared.
//!
//! After each step the worker dispatches notified snapshots to the channel
//! workers and offers the resulting snapshot to the gridboard feed. The feed
//! is bounded: when it stays full for the offer timeout the snapshot is
//! dropped and counted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, instrument, trace};

use larm_config::AlerterConfig;
use larm_core::events::{EventError, FeedBus};
use larm_core::time::Clock;
use larm_telemetry::{AlerterStats, MetricsRecorder};

use super::state::{AlertStateMachine, Transition};
use crate::alert::{Alert, AlertStatus};
use crate::dispatch::Dispatcher;

/// Snapshot handed to the gridboard aggregator.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub alert: Alert,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum AlerterCommand {
    Raise(String),
    RaiseImmediately(String),
    Cancel(String),
    CancelImmediately(String),
    Emit(String),
    /// Periodic sweep; `None` reads the worker clock.
    Tick(Option<DateTime<Utc>>),
    ApplyConfig(Box<AlerterConfig>, oneshot::Sender<()>),
    Stats(oneshot::Sender<AlerterStats>),
    /// Answered once every earlier command has been handled.
    Sync(oneshot::Sender<()>),
    Shutdown,
}

pub struct AlerterWorker {
    machine: AlertStateMachine,
    dispatcher: Dispatcher,
    feed: FeedBus<FeedItem>,
    metrics: Arc<MetricsRecorder>,
    clock: Arc<dyn Clock>,
    channels: HashSet<String>,
}

impl AlerterWorker {
    pub fn new(
        config: AlerterConfig,
        channels: HashSet<String>,
        dispatcher: Dispatcher,
        feed: FeedBus<FeedItem>,
        metrics: Arc<MetricsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            machine: AlertStateMachine::new(config, &channels),
            dispatcher,
            feed,
            metrics,
            clock,
            channels,
        }
    }

    #[instrument(name = "alerter_worker", skip_all)]
    pub async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<AlerterCommand>,
        tick_interval: Option<Duration>,
    ) {
        debug!("Alerter worker started");
        let mut ticker = tick_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        loop {
            tokio::select! {
                biased;
                command = mailbox.recv() => match command {
                    Some(AlerterCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = next_tick(&mut ticker) => {
                    let now = self.clock.now();
                    self.tick(now).await;
                }
            }
        }
        debug!(live = self.machine.live_count(), "Alerter worker stopped");
    }

    pub async fn handle(&mut self, command: AlerterCommand) {
        let now = self.clock.now();
        match command {
            AlerterCommand::Raise(id) => {
                self.metrics.raise_requests.inc();
                let t = self.machine.raise(&id, now);
                self.publish(t, now).await;
            }
            AlerterCommand::RaiseImmediately(id) => {
                self.metrics.raise_immediately_requests.inc();
                let t = self.machine.raise_immediately(&id, now);
                self.publish(t, now).await;
            }
            AlerterCommand::Cancel(id) => {
                self.metrics.cancel_requests.inc();
                let t = self.machine.cancel(&id, now);
                self.publish(t, now).await;
            }
            AlerterCommand::CancelImmediately(id) => {
                self.metrics.cancel_immediately_requests.inc();
                let t = self.machine.cancel_immediately(&id, now);
                self.publish(t, now).await;
            }
            AlerterCommand::Emit(id) => {
                self.metrics.emit_requests.inc();
                let t = self.machine.emit(&id, now);
                self.publish(t, now).await;
            }
            AlerterCommand::Tick(at) => self.tick(at.unwrap_or(now)).await,
            AlerterCommand::ApplyConfig(config, ack) => {
                self.dispatcher.configure_all(&config);
                self.machine.apply_config(*config, &self.channels);
                self.update_gauges();
                let _ = ack.send(());
            }
            AlerterCommand::Stats(reply) => {
                let _ = reply.send(self.metrics.snapshot());
            }
            AlerterCommand::Sync(reply) => {
                let _ = reply.send(());
            }
            AlerterCommand::Shutdown => {}
        }
    }

    async fn tick(&mut self, now: DateTime<Utc>) {
        let transitions = self.machine.tick(now);
        trace!(changed = transitions.len(), "Tick");
        for t in transitions {
            self.publish(t, now).await;
        }
        self.update_gauges();
        self.dispatcher.wake_all(now);
    }

    async fn publish(&mut self, transition: Transition, now: DateTime<Utc>) {
        let Transition { alert, notify } = transition;
        if notify {
            match alert.status {
                AlertStatus::Raised => self.metrics.raised_notifications.inc(),
                AlertStatus::Canceled => self.metrics.canceled_notifications.inc(),
                _ => self.metrics.emitted_notifications.inc(),
            }
            let rules = self.machine.rules(&alert.id);
            self.dispatcher.dispatch(&alert, &rules, now).await;
        }

        match self.feed.offer(FeedItem { alert, at: now }).await {
            Ok(()) => {}
            Err(EventError::QueueFull) => {
                self.metrics.gridboard_feed_drops.inc();
                trace!("Gridboard feed full, snapshot dropped");
            }
            Err(e) => trace!("Gridboard feed unavailable: {e}"),
        }
        self.update_gauges();
    }

    fn update_gauges(&self) {
        self.metrics.set_rules_cache_size(self.machine.rules_cache_len());
        self.metrics
            .set_deduplicating_alerts(self.machine.deduplicating_count());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
