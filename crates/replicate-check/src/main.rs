//! consul-replicate-check — verify that consul-replicate is keeping the
//! local datacenter in step with the master datacenter.
//!
//! # Usage
//!
//! ```text
//! consul-replicate-check check --config /etc/dd-agent/conf.d/consul_replicate_check.yaml
//! consul-replicate-check watch --config check.yaml --interval 30 --format prometheus
//! consul-replicate-check validate --config check.yaml
//! ```
//!
//! Observations go to stdout, logs go to stderr. `check` exits with status 2
//! when any instance fails.

use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};

use replicate_health::config::parse_duration;
use replicate_health::{
    CheckFile, CheckRunner, HttpKvClient, InstanceRun, PsInspector, ReplicationCheck, Settings,
    all_succeeded,
};
use replicate_metrics::{Observation, OutputFormat, render};

const DEFAULT_CONFIG: &str = "/etc/dd-agent/conf.d/consul_replicate_check.yaml";
const FAILURE_EXIT: u8 = 2;

#[derive(Parser)]
#[command(
    name = "consul-replicate-check",
    about = "Health check for consul-replicate KV replication",
    version
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run every configured instance once and print the observations.
    Check {
        #[command(flatten)]
        target: Target,

        /// Output format: text, json, or prometheus.
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
    /// Run every configured instance on an interval until interrupted.
    Watch {
        #[command(flatten)]
        target: Target,

        /// Seconds between rounds.
        #[arg(short, long, default_value = "15")]
        interval: u64,

        /// Output format: text, json, or prometheus.
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
    /// Parse and validate a config file without contacting the agent.
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct Target {
    /// Check config file (YAML or TOML).
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Consul agent address, overriding init_config.consul_address.
    #[arg(long)]
    consul_address: Option<String>,

    /// Request timeout such as "5s" or "500ms", overriding init_config.timeout.
    #[arg(long)]
    timeout: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format)?;

    match cli.command {
        Command::Check { target, format } => run_check(&target, format).await,
        Command::Watch {
            target,
            interval,
            format,
        } => run_watch(&target, Duration::from_secs(interval.max(1)), format).await,
        Command::Validate { config } => {
            let file = CheckFile::from_file(&config)
                .with_context(|| format!("config {} is invalid", config.display()))?;
            let settings = file.settings()?;
            println!(
                "{}: {} instance(s), agent {}, timeout {:?}",
                config.display(),
                file.instances.len(),
                settings.consul_address,
                settings.timeout
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) -> anyhow::Result<()> {
    let default = if verbose {
        "info,replicate_health=debug,consul_replicate_check=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Load the config file and apply command-line overrides.
fn load(target: &Target) -> anyhow::Result<(CheckFile, Settings)> {
    let file = CheckFile::from_file(&target.config)
        .with_context(|| format!("failed to load {}", target.config.display()))?;
    let mut settings = file.settings()?;

    if let Some(address) = &target.consul_address {
        settings.consul_address = address.clone();
    }
    if let Some(raw) = &target.timeout {
        settings.timeout = parse_duration(raw)
            .filter(|d| !d.is_zero())
            .with_context(|| format!("invalid --timeout '{raw}'"))?;
    }
    Ok((file, settings))
}

fn build_runner(
    file: CheckFile,
    settings: &Settings,
) -> CheckRunner<HttpKvClient, PsInspector> {
    let check = ReplicationCheck::new(
        HttpKvClient::from_settings(settings),
        PsInspector::from_settings(settings),
        settings,
    );
    CheckRunner::new(check, file.instances)
}

/// Write one round's observations, rendered as a single document.
fn write_round(
    out: &mut impl Write,
    runs: &[InstanceRun],
    format: OutputFormat,
) -> anyhow::Result<()> {
    let observations: Vec<Observation> = runs
        .iter()
        .flat_map(|r| r.observations.iter().cloned())
        .collect();
    out.write_all(render(&observations, format)?.as_bytes())?;
    if format == OutputFormat::Json {
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn print_round(runs: &[InstanceRun], format: OutputFormat) -> anyhow::Result<()> {
    write_round(&mut std::io::stdout().lock(), runs, format)
        .context("failed to write observations")
}

async fn run_check(target: &Target, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let (file, settings) = load(target)?;
    let runner = build_runner(file, &settings);

    let runs = runner.run_once().await;
    print_round(&runs, format)?;

    if all_succeeded(&runs) {
        Ok(ExitCode::SUCCESS)
    } else {
        for run in runs.iter().filter(|r| !r.report.outcome.is_success()) {
            error!(instance = run.index, outcome = ?run.report.outcome, "check failed");
        }
        Ok(ExitCode::from(FAILURE_EXIT))
    }
}

async fn run_watch(
    target: &Target,
    interval: Duration,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let (file, settings) = load(target)?;
    let runner = build_runner(file, &settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut print_error = None;
    let rounds = runner
        .run_periodic(interval, shutdown_rx, |runs| match print_round(runs, format) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                print_error = Some(e);
                ControlFlow::Break(())
            }
        })
        .await;

    if let Some(e) = print_error {
        return Err(e);
    }
    info!(rounds, "watch stopped");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::io;

    use replicate_health::{RunOutcome, RunReport};
    use replicate_metrics::Tag;

    use super::*;

    /// A writer whose reader has gone away, as with `check | head -1`.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn round() -> Vec<InstanceRun> {
        vec![InstanceRun {
            index: 0,
            report: RunReport {
                outcome: RunOutcome::Success,
                local_dc: Some("us-east".into()),
                master_dc: Some("us-east".into()),
                liveness: None,
                paths: Vec::new(),
            },
            observations: vec![Observation::flag(
                "consul-replicate.in_master_dc",
                true,
                &[Tag::new("dc", "us-east")],
            )],
        }]
    }

    #[test]
    fn write_round_renders_all_observations() {
        let mut out = Vec::new();
        write_round(&mut out, &round(), OutputFormat::Text).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "consul-replicate.in_master_dc 1 dc:us-east\n"
        );
    }

    #[test]
    fn write_round_json_ends_with_newline() {
        let mut out = Vec::new();
        write_round(&mut out, &round(), OutputFormat::Json).unwrap();
        assert!(out.ends_with(b"]\n"));
    }

    #[test]
    fn closed_stdout_is_an_error_not_a_panic() {
        let err = write_round(&mut ClosedPipe, &round(), OutputFormat::Text).unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }
}
