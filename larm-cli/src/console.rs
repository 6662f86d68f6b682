//! Operator commands read from stdin by `larm run`, one per line.

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Raise(String),
    RaiseImmediately(String),
    Cancel(String),
    CancelImmediately(String),
    Emit(String),
    Gridboard(String),
    Clear(String),
    Stats,
    Metrics,
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("'{0}' expects an id")]
    MissingId(String),

    #[error("'{0}' takes no argument")]
    UnexpectedArgument(String),
}

pub const HELP: &str = "\
raise <id>       raise after the rise delay
raise! <id>      raise now
cancel <id>      cancel after the drop delay
cancel! <id>     cancel now
emit <id>        one-shot notification
gridboard <id>   print a gridboard
clear <id>       empty a gridboard
stats            print engine counters
metrics          print Prometheus metrics
reload           re-read the configuration file
quit             shut down";

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let arg = words.next();
        if words.next().is_some() {
            return Err(ConsoleError::UnexpectedArgument(verb.to_owned()));
        }

        let with_id = |build: fn(String) -> ConsoleCommand| match arg {
            Some(id) => Ok(build(id.to_owned())),
            None => Err(ConsoleError::MissingId(verb.to_owned())),
        };
        let bare = |command: ConsoleCommand| match arg {
            Some(_) => Err(ConsoleError::UnexpectedArgument(verb.to_owned())),
            None => Ok(command),
        };

        match verb {
            "raise" => with_id(ConsoleCommand::Raise),
            "raise!" => with_id(ConsoleCommand::RaiseImmediately),
            "cancel" => with_id(ConsoleCommand::Cancel),
            "cancel!" => with_id(ConsoleCommand::CancelImmediately),
            "emit" => with_id(ConsoleCommand::Emit),
            "gridboard" => with_id(ConsoleCommand::Gridboard),
            "clear" => with_id(ConsoleCommand::Clear),
            "stats" => bare(ConsoleCommand::Stats),
            "metrics" => bare(ConsoleCommand::Metrics),
            "reload" => bare(ConsoleCommand::Reload),
            "help" => bare(ConsoleCommand::Help),
            "quit" | "exit" => bare(ConsoleCommand::Quit),
            other => Err(ConsoleError::Unknown(other.to_owned())),
        }
    }
}

/// Parses one input line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    line.parse().map(Some)
}
