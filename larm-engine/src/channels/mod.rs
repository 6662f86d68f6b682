//! ## larm-engine::channels
//! **Notification channels and their workers**
//!
//! A [`Channel`] turns alert snapshots into notification I/O. Each channel
//! runs on its own tokio task fed by an unbounded mailbox, so a slow SMTP
//! relay or HTTP endpoint never stalls the engine or another channel.
//!
//! Channels pace themselves: after every message the worker asks
//! [`Channel::next_wakeup`] and sleeps until then, unless another message
//! arrives first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info_span, warn, Instrument};

use larm_config::AlerterConfig;
use larm_core::time::{until, Clock};

use crate::alert::Alert;
use crate::error::AlerterError;
use crate::rules::STOP_CHANNEL;

pub mod log;
pub mod mail;
pub mod memory;
pub mod url;

pub use self::log::LogChannel;
pub use self::mail::{MailChannel, MailTransport, OutgoingMail, SmtpMailTransport};
pub use self::memory::MemoryChannel;
pub use self::url::UrlChannel;

#[async_trait]
pub trait Channel: Send + 'static {
    fn name(&self) -> &str;

    /// Handles one snapshot. The snapshot carries the subscription it is
    /// notified under.
    async fn notify(&mut self, alert: Alert, now: DateTime<Utc>);

    /// Receives the global configuration, at start and on every reload.
    async fn set_config(&mut self, _config: &AlerterConfig, _now: DateTime<Utc>) {}

    /// Next time the channel has deferred work to do.
    fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Runs deferred work that is due at `now`.
    async fn wake(&mut self, _now: DateTime<Utc>) {}

    /// Last chance to deliver pending work before the worker exits.
    async fn shutdown(&mut self, _now: DateTime<Utc>) {}
}

#[derive(Debug)]
pub enum ChannelMessage {
    /// A snapshot and the engine time of its transition.
    Notify(Alert, DateTime<Utc>),
    Configure(Box<AlerterConfig>),
    /// Deferred work due at the given engine time.
    Wake(DateTime<Utc>),
    Shutdown,
}

/// Sending side of a channel worker mailbox.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    name: String,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a snapshot; returns `false` when the worker is gone.
    pub fn notify(&self, alert: Alert, at: DateTime<Utc>) -> bool {
        self.send(ChannelMessage::Notify(alert, at))
    }

    pub fn configure(&self, config: &AlerterConfig) -> bool {
        self.send(ChannelMessage::Configure(Box::new(config.clone())))
    }

    pub fn wake(&self, at: DateTime<Utc>) -> bool {
        self.send(ChannelMessage::Wake(at))
    }

    fn send(&self, message: ChannelMessage) -> bool {
        if self.tx.send(message).is_err() {
            warn!(channel = %self.name, "Channel worker is stopped");
            return false;
        }
        true
    }
}

/// Channel implementations waiting to be started, by name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `log`, `mail` (SMTP) and `url` channels.
    pub fn with_builtins(config: &AlerterConfig) -> Result<Self, AlerterError> {
        let mut registry = Self::new();
        registry.register(LogChannel::new())?;
        registry.register(MailChannel::new(Box::new(SmtpMailTransport::new(
            &config.channels.mail,
        )?)))?;
        registry.register(UrlChannel::new(&config.channels.url)?)?;
        Ok(registry)
    }

    /// Adds a channel, replacing any channel of the same name.
    pub fn register<C: Channel>(&mut self, channel: C) -> Result<(), AlerterError> {
        let name = channel.name().to_owned();
        if name == STOP_CHANNEL {
            return Err(AlerterError::InvalidChannel(name));
        }
        self.channels.retain(|c| c.name() != name);
        self.channels.push(Box::new(channel));
        Ok(())
    }

    pub fn names(&self) -> HashSet<String> {
        self.channels.iter().map(|c| c.name().to_owned()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Starts one worker per channel, each configured with `config` before
    /// its first notification.
    pub fn spawn(self, config: &AlerterConfig, clock: Arc<dyn Clock>) -> ChannelWorkers {
        let mut handles = HashMap::new();
        let mut tasks = Vec::new();
        for channel in self.channels {
            let name = channel.name().to_owned();
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = ChannelHandle {
                name: name.clone(),
                tx,
            };
            handle.configure(config);
            let span = info_span!("channel_worker", channel = %name);
            tasks.push((
                name.clone(),
                tokio::spawn(run_channel(channel, rx, Arc::clone(&clock)).instrument(span)),
            ));
            handles.insert(name, handle);
        }
        ChannelWorkers { handles, tasks }
    }
}

async fn run_channel(
    mut channel: Box<dyn Channel>,
    mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    clock: Arc<dyn Clock>,
) {
    debug!("Channel worker started");
    loop {
        let wakeup = channel.next_wakeup().map(|at| until(clock.now(), at));
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(ChannelMessage::Notify(alert, at)) => channel.notify(alert, at).await,
                Some(ChannelMessage::Configure(config)) => {
                    channel.set_config(&config, clock.now()).await
                }
                Some(ChannelMessage::Wake(at)) => channel.wake(at).await,
                Some(ChannelMessage::Shutdown) | None => break,
            },
            _ = sleep(wakeup.unwrap_or_default()), if wakeup.is_some() => {
                channel.wake(clock.now()).await
            }
        }
    }
    channel.shutdown(clock.now()).await;
    debug!("Channel worker stopped");
}

/// Running channel workers.
pub struct ChannelWorkers {
    handles: HashMap<String, ChannelHandle>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl ChannelWorkers {
    pub fn handles(&self) -> &HashMap<String, ChannelHandle> {
        &self.handles
    }

    pub fn names(&self) -> HashSet<String> {
        self.handles.keys().cloned().collect()
    }

    /// Lets every worker drain its mailbox, flush, and exit.
    pub async fn shutdown(self) {
        for handle in self.handles.values() {
            let _ = handle.tx.send(ChannelMessage::Shutdown);
        }
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(channel = %name, "Channel worker failed: {e}");
            }
        }
    }
}
