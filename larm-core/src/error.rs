use thiserror::Error;

use crate::events::EventError;
use crate::pattern::PatternError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("Event bus error: {0}")]
    Event(#[from] EventError),
}
