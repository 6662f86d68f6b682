//! Gridboard aggregator worker.
//!
//! Consumes the best-effort feed of alert snapshots produced by the engine
//! and answers snapshot/clear/configure requests on a separate control
//! mailbox. The feed is always drained before a control request is served,
//! so a request observes every snapshot enqueued before it was sent.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use larm_config::GridboardConfig;
use larm_core::events::FeedReceiver;
use larm_core::time::Clock;
use larm_telemetry::MetricsRecorder;

use super::{Gridboard, GridboardSnapshot};
use crate::engine::FeedItem;

#[derive(Debug)]
pub enum GridboardControl {
    Configure(Vec<GridboardConfig>, oneshot::Sender<()>),
    Snapshot(String, oneshot::Sender<Option<GridboardSnapshot>>),
    Clear(String, oneshot::Sender<bool>),
    Shutdown,
}

pub struct GridboardAggregator {
    boards: Vec<Gridboard>,
    metrics: Arc<MetricsRecorder>,
    clock: Arc<dyn Clock>,
}

impl GridboardAggregator {
    pub fn new(
        configs: &[GridboardConfig],
        metrics: Arc<MetricsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut aggregator = Self {
            boards: Vec::new(),
            metrics,
            clock,
        };
        aggregator.configure(configs);
        aggregator
    }

    /// Installs new definitions. Boards whose definition did not change keep
    /// their cells; invalid definitions are logged and skipped.
    pub fn configure(&mut self, configs: &[GridboardConfig]) {
        let mut previous = std::mem::take(&mut self.boards);
        for config in configs {
            let mut board = match Gridboard::compile(config) {
                Ok(board) => board,
                Err(e) => {
                    warn!("Ignoring gridboard '{}': {e}", config.id);
                    continue;
                }
            };
            if let Some(index) = previous.iter().position(|b| b.same_definition(config)) {
                board.adopt(previous.swap_remove(index));
            }
            self.boards.push(board);
        }
        debug!("{} gridboards configured", self.boards.len());
    }

    pub fn evaluate(&mut self, item: &FeedItem) {
        for board in &mut self.boards {
            self.metrics.gridboard_evaluations.inc();
            if board.update(&item.alert, item.at) {
                self.metrics.gridboard_updates.inc();
                trace!(gridboard = %board.id(), alert = %item.alert.id, "Gridboard updated");
            }
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<GridboardSnapshot> {
        let now = self.clock.now();
        self.boards.iter().find(|b| b.id() == id).map(|b| b.snapshot(now))
    }

    pub fn clear(&mut self, id: &str) -> bool {
        match self.boards.iter_mut().find(|b| b.id() == id) {
            Some(board) => {
                board.clear();
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.boards.iter().map(|b| b.id().to_owned()).collect()
    }

    #[instrument(name = "gridboard_aggregator", skip_all)]
    pub async fn run(
        mut self,
        mut feed: FeedReceiver<FeedItem>,
        mut control: mpsc::UnboundedReceiver<GridboardControl>,
    ) {
        debug!("Gridboard aggregator started");
        let mut feed_open = true;
        loop {
            tokio::select! {
                biased;
                item = feed.recv(), if feed_open => match item {
                    Some(item) => self.evaluate(&item),
                    None => feed_open = false,
                },
                request = control.recv() => match request {
                    Some(GridboardControl::Configure(configs, ack)) => {
                        self.configure(&configs);
                        let _ = ack.send(());
                    }
                    Some(GridboardControl::Snapshot(id, reply)) => {
                        let _ = reply.send(self.snapshot(&id));
                    }
                    Some(GridboardControl::Clear(id, reply)) => {
                        let _ = reply.send(self.clear(&id));
                    }
                    Some(GridboardControl::Shutdown) | None => break,
                },
            }
        }
        while let Some(item) = feed.try_recv() {
            self.evaluate(&item);
        }
        debug!("Gridboard aggregator stopped");
    }
}
