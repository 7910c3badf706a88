//! duwatch CLI: run the collector daemon, check config, measure once.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use duwatch::collect::{Collectors, Measurement, ProcessRunner};
use duwatch::config::Config;
use duwatch::engine::Coordinator;
use duwatch::model::JobKind;
use duwatch::telemetry::{TelemetryConfig, init_telemetry};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "duwatch", about = "Periodic disk usage collector")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, short, global = true, default_value = "duwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector daemon until interrupted
    Serve,
    /// Validate the config and print every target's effective schedule
    Check,
    /// Measure one target now and print the result
    Measure {
        /// Target name
        target: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Check => cmd_check(&config),
        Command::Measure { target, json } => cmd_measure(&config, &target, json).await,
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: config.service_name.clone(),
        log_level: config.log_level.clone(),
    })?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        signal.cancel();
    });

    Coordinator::new(config, Arc::new(ProcessRunner))
        .run(shutdown)
        .await?;
    Ok(())
}

fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let targets = config.targets();

    println!(
        "{:<10}  {:<20}  {:<40}  {:>9}  {:>9}  LEVELS",
        "CATEGORY", "NAME", "PATH", "INTERVAL", "TIMEOUT"
    );
    println!("{}", "-".repeat(104));

    let mut warnings = Vec::new();
    for target in &targets {
        let levels = match &target.kind {
            JobKind::Filesystem(_) => "-".to_string(),
            JobKind::Directory(dir) => dir.subdirectory_levels.to_string(),
        };
        println!(
            "{:<10}  {:<20}  {:<40}  {:>8}s  {:>8}s  {}",
            target.category(),
            target.name,
            target.kind.path().display(),
            target.interval.as_secs(),
            target.timeout.as_secs(),
            levels
        );
        if target.interval_shorter_than_timeout() {
            warnings.push(format!(
                "warning: {} '{}' interval ({}s) is shorter than its timeout ({}s)",
                target.category(),
                target.name,
                target.interval.as_secs(),
                target.timeout.as_secs()
            ));
        }
    }

    println!("\n{} target(s), queue capacity {}", targets.len(), config.queue_capacity);
    for warning in warnings {
        println!("{warning}");
    }
    Ok(())
}

async fn cmd_measure(config: &Config, name: &str, json: bool) -> anyhow::Result<()> {
    let target = config
        .target(name)
        .ok_or_else(|| anyhow::anyhow!("no target named '{name}'"))?;
    let collectors = Collectors::new(Arc::new(ProcessRunner), config.retry_policy());

    let measurement = collectors
        .measure(&target.kind, target.timeout, &CancellationToken::new())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&measurement)?);
        return Ok(());
    }

    match measurement {
        Measurement::Filesystem(usage) => {
            println!("Target:     {}", target.name);
            println!("Mount:      {}", target.kind.path().display());
            println!("Size:       {} bytes", usage.size_bytes);
            println!("Available:  {} bytes", usage.available_bytes);
            println!("Used:       {} bytes ({:.1}%)", usage.used_bytes, usage.used_ratio * 100.0);
        }
        Measurement::Directory { samples } => {
            println!("{:<5}  {:>16}  PATH", "LEVEL", "BYTES");
            println!("{}", "-".repeat(60));
            for sample in &samples {
                println!(
                    "{:<5}  {:>16}  {}",
                    sample.level,
                    sample.size_bytes,
                    sample.path.display()
                );
            }
            println!("\n{} directories", samples.len());
        }
    }
    Ok(())
}
