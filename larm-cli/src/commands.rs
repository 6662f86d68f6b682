use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use larm_config::{AlerterConfig, LarmConfig};
use larm_engine::rules::RuleSet;
use larm_engine::{Alerter, AlerterHandle, ChannelRegistry};
use larm_telemetry::logging::EventLogger;

use crate::console::{self, ConsoleCommand, HELP};

#[derive(Parser)]
#[command(name = "larm", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the alerter, reading operator commands from stdin
    Run(ConfigArgs),
    /// Validate a configuration file and print the compiled rules
    Check(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration file; defaults to config/larm.yaml and LARM_* variables
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<LarmConfig> {
        match &self.config {
            Some(path) => LarmConfig::load_from_path(path)
                .with_context(|| format!("loading {}", path.display())),
            None => LarmConfig::load().context("loading configuration"),
        }
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_alerter(args).await,
        Commands::Check(args) => check_config(&args),
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn run_alerter(args: ConfigArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    EventLogger::init(&config.telemetry.log_level);

    let alerter = Alerter::builder(config.alerter.clone())
        .start()
        .context("starting alerter")?;
    let handle = alerter.handle();
    let mut metrics_enabled = config.telemetry.metrics_enabled;
    info!("larm running, type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let command = match console::parse_line(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                match execute(command, &handle, &args, &mut metrics_enabled).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => eprintln!("{e:#}"),
                }
            }
        }
    }

    alerter.shutdown().await.context("shutting down")?;
    info!("larm stopped");
    Ok(())
}

async fn execute(
    command: ConsoleCommand,
    handle: &AlerterHandle,
    args: &ConfigArgs,
    metrics_enabled: &mut bool,
) -> anyhow::Result<Flow> {
    match command {
        ConsoleCommand::Raise(id) => handle.raise(id),
        ConsoleCommand::RaiseImmediately(id) => handle.raise_immediately(id),
        ConsoleCommand::Cancel(id) => handle.cancel(id),
        ConsoleCommand::CancelImmediately(id) => handle.cancel_immediately(id),
        ConsoleCommand::Emit(id) => handle.emit(id),
        ConsoleCommand::Gridboard(id) => match handle.gridboard(&id).await? {
            Some(board) => println!("{}", board.to_text()?),
            None => println!("no gridboard '{id}'"),
        },
        ConsoleCommand::Clear(id) => {
            if !handle.clear_gridboard(&id).await? {
                println!("no gridboard '{id}'");
            }
        }
        ConsoleCommand::Stats => {
            let stats = handle.stats().await?;
            print!("{}", serde_yaml::to_string(&stats)?);
        }
        ConsoleCommand::Metrics => {
            if *metrics_enabled {
                print!("{}", handle.metrics().gather_metrics()?);
            } else {
                println!("metrics are disabled");
            }
        }
        ConsoleCommand::Reload => {
            let config = args.load()?;
            *metrics_enabled = config.telemetry.metrics_enabled;
            handle.apply_config(config.alerter).await?;
            println!("configuration reloaded");
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn check_config(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    EventLogger::init(&config.telemetry.log_level);
    println!("{}", rules_report(&config.alerter)?);
    Ok(())
}

/// Renders the rules that survive compilation against the built-in channels.
fn rules_report(config: &AlerterConfig) -> anyhow::Result<String> {
    let channels = ChannelRegistry::with_builtins(config)?.names();
    let rules = RuleSet::compile(config, &channels);
    let dropped = config.subscriptions.len() - rules.subscriptions().len();
    if dropped > 0 {
        warn!("{dropped} subscription(s) ignored");
    }

    let mut subscriptions = Table::new();
    subscriptions
        .load_preset(UTF8_FULL)
        .set_header(vec!["pattern", "channel", "address", "emit", "cancel", "remind"]);
    for sub in rules.subscriptions() {
        subscriptions.add_row(vec![
            sub.pattern().to_owned(),
            sub.channel.clone(),
            sub.address.clone(),
            yes_no(sub.notify_emit),
            yes_no(sub.notify_cancel),
            yes_no(sub.notify_reminder),
        ]);
    }

    let mut settings = Table::new();
    settings.load_preset(UTF8_FULL).set_header(vec![
        "pattern",
        "rise ms",
        "mayrise ms",
        "drop ms",
        "duplicate emit ms",
    ]);
    settings.add_row(vec![
        "(default)".to_owned(),
        config.rise_delay_ms.to_string(),
        config.mayrise_delay_ms.to_string(),
        config.drop_delay_ms.to_string(),
        config.duplicate_emit_delay_ms.to_string(),
    ]);
    for s in rules.settings() {
        settings.add_row(vec![
            s.pattern().to_owned(),
            or_default(s.rise_delay_ms),
            or_default(s.mayrise_delay_ms),
            or_default(s.drop_delay_ms),
            or_default(s.duplicate_emit_delay_ms),
        ]);
    }

    let boards: Vec<&str> = config.gridboards.iter().map(|g| g.id.as_str()).collect();
    Ok(format!(
        "Subscriptions\n{subscriptions}\n\nSettings\n{settings}\n\nGridboards: {}",
        if boards.is_empty() {
            "none".to_owned()
        } else {
            boards.join(", ")
        }
    ))
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_owned()
}

fn or_default(delay: Option<u64>) -> String {
    delay.map_or_else(|| "-".to_owned(), |ms| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use larm_config::SubscriptionConfig;

    #[test]
    fn report_lists_compiled_rules() {
        let config = AlerterConfig {
            subscriptions: vec![
                SubscriptionConfig::new("task.**", "stop"),
                SubscriptionConfig::new("**", "log"),
                SubscriptionConfig::new("**", "pager"),
            ],
            ..AlerterConfig::default()
        };
        let report = rules_report(&config).unwrap();
        assert!(report.contains("task.**"));
        assert!(report.contains("stop"));
        assert!(report.contains("(default)"));
        assert!(!report.contains("pager"));
        assert!(report.ends_with("Gridboards: none"));
    }

    #[test]
    fn loads_the_given_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "alerter:\n  rise_delay_ms: 1234\ntelemetry:\n  log_level: debug"
        )
        .unwrap();
        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
        };
        let config = args.load().unwrap();
        assert_eq!(config.alerter.rise_delay_ms, 1234);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn missing_file_is_an_error() {
        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/larm.yaml")),
        };
        assert!(args.load().is_err());
    }
}
