//! fleetshell CLI
//!
//! Runs a shell command on one or more hosts over SSH

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use fleetshell_api::{
    BackupLogResponse, HostTarget, RemoteCommandResponse, parse_host_list,
    parse_host_list_lenient,
};
use fleetshell_exec::Executor;
use tracing_subscriber::EnvFilter;

mod config;
mod fleet;

use config::{Config, LogConfig, RemoteConfig};

#[derive(Parser)]
#[command(name = "fleetshell")]
#[command(about = "Run shell commands on remote hosts over SSH", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on every host
    Run {
        /// Comma-separated `host[:port]` list
        #[arg(long)]
        hosts: String,
        /// Command timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Skip malformed host entries instead of failing
        #[arg(long)]
        lenient: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        /// Command to run
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Run the configured backup log check on every host
    #[command(name = "backup-log")]
    BackupLog {
        /// Comma-separated `host[:port]` list
        #[arg(long)]
        hosts: String,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (config, source) = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.log);
    match &source {
        Some(path) => tracing::debug!(path = %path.display(), "loaded config"),
        None => tracing::warn!("no config file found, using defaults"),
    }
    config.warn_on_suspicious();

    let ok = match cli.command {
        Commands::Run {
            hosts,
            timeout,
            lenient,
            json,
            command,
        } => {
            let targets = targets(&hosts, lenient)?;
            let responses = run(
                &config.remote,
                &targets,
                &command.join(" "),
                timeout.map(Duration::from_secs),
            )
            .await;
            print_responses(&responses, json)?;
            responses.iter().all(RemoteCommandResponse::succeeded)
        }
        Commands::BackupLog { hosts, json } => {
            // Malformed entries are skipped, as the HTTP gateway always did
            let targets = targets(&hosts, true)?;
            let responses = run(&config.remote, &targets, &config.backup.check_command, None).await;
            let report = BackupLogResponse::from_responses(&responses);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_responses(&responses, false)?;
            }
            report.successful
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn targets(hosts: &str, lenient: bool) -> Result<Vec<HostTarget>> {
    if !lenient {
        return Ok(parse_host_list(hosts)?);
    }

    let (targets, rejected) = parse_host_list_lenient(hosts);
    for err in &rejected {
        tracing::error!(error = %err, "skipping host entry");
    }
    if targets.is_empty() {
        eyre::bail!("no valid hosts in {hosts:?}");
    }
    Ok(targets)
}

async fn run(
    remote: &RemoteConfig,
    targets: &[HostTarget],
    command: &str,
    timeout: Option<Duration>,
) -> Vec<RemoteCommandResponse> {
    tracing::info!(hosts = targets.len(), "dispatching command");
    fleet::run_on_hosts(targets, command, timeout, |target| {
        Executor::new(remote.executor_config(target))
    })
    .await
}

fn print_responses(responses: &[RemoteCommandResponse], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(responses)?);
        return Ok(());
    }

    for response in responses {
        println!(
            "== {}:{} (status {}, {}ms)",
            response.host, response.port, response.status, response.duration_ms
        );
        if !response.output.is_empty() {
            print!("{}", response.output);
            if !response.output.ends_with('\n') {
                println!();
            }
        }
        if let Some(error) = &response.error {
            println!("error: {error}");
        }
    }
    Ok(())
}
