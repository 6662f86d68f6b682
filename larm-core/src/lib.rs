//! # larm-core
//!
//! Foundation layer shared by the alerting engine and its satellites.
//!
//! ### Key Submodules:
//! - `pattern`: dot-hierarchical glob patterns compiled to anchored regexes
//! - `events`: bounded, drop-on-full feed bus used for best-effort consumers
//! - `time`: `Clock` abstraction with a system clock and a virtual clock
//!
//! Nothing in here knows about configuration files or channels.

pub mod error;
pub mod events;
pub mod pattern;
pub mod time;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::pattern::*;
    pub use crate::time::*;
}

pub use error::CoreError;
