//! The `Alerter` facade: starts the engine worker, one worker per channel and
//! the gridboard aggregator, exposes the call API and stops everything in
//! order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use validator::Validate;

use larm_config::{AlerterConfig, ConfigError};
use larm_core::events::{feed_bus, DEFAULT_FEED_CAPACITY, DEFAULT_OFFER_TIMEOUT};
use larm_core::time::{Clock, SystemClock};
use larm_core::CoreError;
use larm_telemetry::{AlerterStats, MetricsRecorder};

use crate::channels::{Channel, ChannelRegistry, ChannelWorkers};
use crate::dispatch::Dispatcher;
use crate::engine::{AlerterCommand, AlerterWorker};
use crate::error::AlerterError;
use crate::gridboard::{GridboardAggregator, GridboardControl, GridboardSnapshot};

/// Interval of the periodic sweep.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

pub struct AlerterBuilder {
    config: AlerterConfig,
    clock: Arc<dyn Clock>,
    channels: Option<ChannelRegistry>,
    extra: Vec<Box<dyn FnOnce(&mut ChannelRegistry) -> Result<(), AlerterError> + Send>>,
    tick_interval: Option<Duration>,
    feed_capacity: usize,
}

impl AlerterBuilder {
    pub fn new(config: AlerterConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            channels: None,
            extra: Vec::new(),
            tick_interval: Some(DEFAULT_TICK_INTERVAL),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the built-in channels.
    pub fn channels(mut self, registry: ChannelRegistry) -> Self {
        self.channels = Some(registry);
        self
    }

    /// Adds a channel on top of the built-in (or given) ones.
    pub fn channel<C: Channel>(mut self, channel: C) -> Self {
        self.extra
            .push(Box::new(move |registry| registry.register(channel)));
        self
    }

    /// `None` disables the periodic sweep; ticks then come from
    /// [`AlerterHandle::tick`] only.
    pub fn tick_interval(mut self, interval: Option<Duration>) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity;
        self
    }

    /// Starts every worker. Must run inside a tokio runtime.
    pub fn start(self) -> Result<Alerter, AlerterError> {
        let config = validated(self.config)?;
        let metrics = Arc::new(MetricsRecorder::new()?);

        let mut registry = match self.channels {
            Some(registry) => registry,
            None => ChannelRegistry::with_builtins(&config)?,
        };
        for register in self.extra {
            register(&mut registry)?;
        }
        let names = registry.names();
        let channels = registry.spawn(&config, Arc::clone(&self.clock));

        let (feed, feed_rx) = feed_bus(self.feed_capacity, DEFAULT_OFFER_TIMEOUT)
            .map_err(CoreError::from)?;
        let (grid_tx, grid_rx) = mpsc::unbounded_channel();
        let aggregator = GridboardAggregator::new(
            &config.gridboards,
            Arc::clone(&metrics),
            Arc::clone(&self.clock),
        );
        let aggregator_task = tokio::spawn(aggregator.run(feed_rx, grid_rx));

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let worker = AlerterWorker::new(
            config,
            names,
            Dispatcher::new(channels.handles().clone(), Arc::clone(&metrics)),
            feed,
            Arc::clone(&metrics),
            Arc::clone(&self.clock),
        );
        let engine_task = tokio::spawn(worker.run(engine_rx, self.tick_interval));

        info!(channels = channels.handles().len(), "Alerter started");
        Ok(Alerter {
            handle: AlerterHandle {
                engine: engine_tx,
                gridboards: grid_tx,
                metrics,
            },
            engine_task,
            channels,
            aggregator_task,
        })
    }
}

fn validated(config: AlerterConfig) -> Result<AlerterConfig, AlerterError> {
    config.validate().map_err(ConfigError::from)?;
    Ok(config.floored())
}

/// Cloneable call API.
#[derive(Clone)]
pub struct AlerterHandle {
    engine: mpsc::UnboundedSender<AlerterCommand>,
    gridboards: mpsc::UnboundedSender<GridboardControl>,
    metrics: Arc<MetricsRecorder>,
}

impl AlerterHandle {
    pub fn raise(&self, id: impl Into<String>) {
        self.enqueue(AlerterCommand::Raise(id.into()));
    }

    pub fn raise_immediately(&self, id: impl Into<String>) {
        self.enqueue(AlerterCommand::RaiseImmediately(id.into()));
    }

    pub fn cancel(&self, id: impl Into<String>) {
        self.enqueue(AlerterCommand::Cancel(id.into()));
    }

    pub fn cancel_immediately(&self, id: impl Into<String>) {
        self.enqueue(AlerterCommand::CancelImmediately(id.into()));
    }

    pub fn emit(&self, id: impl Into<String>) {
        self.enqueue(AlerterCommand::Emit(id.into()));
    }

    /// Runs the periodic sweep now, on the engine clock.
    pub fn tick(&self) {
        self.enqueue(AlerterCommand::Tick(None));
    }

    fn enqueue(&self, command: AlerterCommand) {
        if self.engine.send(command).is_err() {
            warn!("Alerter stopped, call dropped");
        }
    }

    /// Replaces delays, rules, channel parameters and gridboard definitions.
    /// Returns once calls made afterwards are guaranteed to see them.
    pub async fn apply_config(&self, config: AlerterConfig) -> Result<(), AlerterError> {
        let config = validated(config)?;
        let gridboards = config.gridboards.clone();

        let (ack, done) = oneshot::channel();
        self.engine
            .send(AlerterCommand::ApplyConfig(Box::new(config), ack))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)?;

        let (ack, done) = oneshot::channel();
        self.gridboards
            .send(GridboardControl::Configure(gridboards, ack))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)?;
        info!("Alerter configuration reloaded");
        Ok(())
    }

    /// Waits until every call made before has been handled by the engine.
    pub async fn sync(&self) -> Result<(), AlerterError> {
        let (reply, done) = oneshot::channel();
        self.engine
            .send(AlerterCommand::Sync(reply))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)
    }

    /// Current state of gridboard `id`, reflecting every earlier call whose
    /// snapshot was not dropped from the feed.
    pub async fn gridboard(&self, id: &str) -> Result<Option<GridboardSnapshot>, AlerterError> {
        self.sync().await?;
        let (reply, done) = oneshot::channel();
        self.gridboards
            .send(GridboardControl::Snapshot(id.to_owned(), reply))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)
    }

    /// Forgets the cells of gridboard `id`; `false` when there is no such board.
    pub async fn clear_gridboard(&self, id: &str) -> Result<bool, AlerterError> {
        self.sync().await?;
        let (reply, done) = oneshot::channel();
        self.gridboards
            .send(GridboardControl::Clear(id.to_owned(), reply))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)
    }

    /// Counters as seen after every earlier call.
    pub async fn stats(&self) -> Result<AlerterStats, AlerterError> {
        let (reply, done) = oneshot::channel();
        self.engine
            .send(AlerterCommand::Stats(reply))
            .map_err(|_| AlerterError::Stopped)?;
        done.await.map_err(|_| AlerterError::Stopped)
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

/// A running alerter.
pub struct Alerter {
    handle: AlerterHandle,
    engine_task: JoinHandle<()>,
    channels: ChannelWorkers,
    aggregator_task: JoinHandle<()>,
}

impl Alerter {
    pub fn builder(config: AlerterConfig) -> AlerterBuilder {
        AlerterBuilder::new(config)
    }

    pub fn handle(&self) -> AlerterHandle {
        self.handle.clone()
    }

    /// Stops the engine, then lets channels flush and stop, then stops the
    /// aggregator.
    pub async fn shutdown(self) -> Result<(), AlerterError> {
        let _ = self.handle.engine.send(AlerterCommand::Shutdown);
        self.engine_task.await?;
        self.channels.shutdown().await;
        let _ = self.handle.gridboards.send(GridboardControl::Shutdown);
        self.aggregator_task.await?;
        info!("Alerter stopped");
        Ok(())
    }
}
