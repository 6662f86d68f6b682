//! ## larm-cli
//! **Operator interface of the alerting engine**
//!
//! `larm run` starts the alerter with the built-in channels and reads
//! operator commands from stdin until `quit`, end of input or SIGINT.
//! `larm check` validates a configuration file and prints the rules it
//! compiles to.

use clap::Parser;

mod commands;
mod console;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
