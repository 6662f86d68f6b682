//! ## larm-core::events
//! **Bounded feed bus for best-effort consumers**
//!
//! The alert engine hands snapshots to secondary consumers (gridboards)
//! through a small bounded queue. A producer waits at most a short timeout
//! for room and then drops the item: the monitoring path must never apply
//! backpressure to the engine.

pub mod bus;

pub use bus::{
    feed_bus, EventError, FeedBus, FeedReceiver, DEFAULT_FEED_CAPACITY, DEFAULT_OFFER_TIMEOUT,
};
