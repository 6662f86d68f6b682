//! Alert State Engine: the lifecycle state machine and the worker that
//! serializes every call onto it.

pub mod state;
pub mod worker;

pub use state::{AlertStateMachine, Transition};
pub use worker::{AlerterCommand, AlerterWorker, FeedItem};
