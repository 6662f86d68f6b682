//! Bounded multi-producer single-consumer feed with drop-on-timeout sends.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Default capacity of a feed bus.
pub const DEFAULT_FEED_CAPACITY: usize = 10;

/// Default time a producer waits for room before dropping an item.
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_millis(10);

/// Feed bus error conditions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Event queue capacity exceeded")]
    QueueFull,
    #[error("Event queue closed")]
    Closed,
    #[error("Invalid capacity (must be non-zero)")]
    InvalidCapacity,
}

/// Producer side of a feed bus. Cheap to clone.
#[derive(Debug)]
pub struct FeedBus<T> {
    tx: mpsc::Sender<T>,
    timeout: Duration,
}

impl<T> Clone for FeedBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            timeout: self.timeout,
        }
    }
}

/// Consumer side of a feed bus.
#[derive(Debug)]
pub struct FeedReceiver<T> {
    rx: mpsc::Receiver<T>,
}

/// Creates a feed bus holding at most `capacity` items.
///
/// # Example
/// ```
/// let (bus, _rx) = larm_core::events::feed_bus::<u32>(10, std::time::Duration::from_millis(10))
///     .expect("Valid capacity");
/// ```
pub fn feed_bus<T>(
    capacity: usize,
    timeout: Duration,
) -> Result<(FeedBus<T>, FeedReceiver<T>), EventError> {
    if capacity == 0 {
        return Err(EventError::InvalidCapacity);
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((FeedBus { tx, timeout }, FeedReceiver { rx }))
}

impl<T> FeedBus<T> {
    /// Offers an item, waiting at most the configured timeout for room.
    ///
    /// The item is dropped when the queue stays full.
    pub async fn offer(&self, item: T) -> Result<(), EventError> {
        match self.tx.send_timeout(item, self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(EventError::QueueFull),
            Err(SendTimeoutError::Closed(_)) => Err(EventError::Closed),
        }
    }

    /// Non-waiting variant of [`FeedBus::offer`].
    pub fn try_offer(&self, item: T) -> Result<(), EventError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EventError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EventError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> FeedReceiver<T> {
    /// Waits for the next item; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
