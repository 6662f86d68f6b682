//! # larm-engine
//!
//! The alerting engine: a delay-driven alert lifecycle, glob-based routing to
//! notification channels, and live gridboards.
//!
//! ### Key Submodules:
//! - `engine`: the six-state lifecycle and the worker serializing calls on it
//! - `rules`: subscriptions, settings and the per-id rule cache
//! - `dispatch`: fan-out of notified snapshots to channel workers
//! - `channels`: the `Channel` trait with the log, mail and url channels
//! - `gridboard`: status boards and their aggregator worker
//! - `alerter`: start-up, call API and ordered shutdown
//!
//! ```no_run
//! # async fn example() -> Result<(), larm_engine::AlerterError> {
//! let alerter = larm_engine::Alerter::builder(Default::default()).start()?;
//! let handle = alerter.handle();
//! handle.raise("task.failure.backup");
//! handle.cancel("task.failure.backup");
//! alerter.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod alerter;
pub mod channels;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gridboard;
pub mod rules;
pub mod template;

pub use alert::{Alert, AlertStatus};
pub use alerter::{Alerter, AlerterBuilder, AlerterHandle, DEFAULT_TICK_INTERVAL};
pub use channels::{Channel, ChannelRegistry, MemoryChannel};
pub use error::{AlerterError, ChannelError};
pub use gridboard::{CellStatus, GridboardSnapshot};
