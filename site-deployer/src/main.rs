//! Site Deployer - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use site_deployer::{
    config::Config,
    shutdown::ShutdownCoordinator,
    transfer::progress::{format_duration, LogSink},
    utils, DeploySession,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the input directory to the configured target
    Deploy,
    /// Show what a deployment would do without transferring anything
    Plan,
    /// Check that the configured target is reachable
    TestConnection,
    /// Print a default configuration file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    if let Command::InitConfig = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "site-deployer v{} ({} transport)",
        env!("CARGO_PKG_VERSION"),
        config.transport.kind
    );

    let session = DeploySession::from_config(&config, Arc::new(LogSink))?;

    match args.command {
        Command::Deploy => {
            let cancel = ShutdownCoordinator::new().listen();
            let report = session.with_cancel(cancel).run().await?;
            println!(
                "Deployed revision {}: {} removed, {} uploaded, {} operations in {}{}",
                report.revision,
                report.removed,
                report.uploaded,
                report.operations,
                format_duration(report.duration),
                if report.snapshot_trusted {
                    ""
                } else {
                    " (full upload)"
                }
            );
        }
        Command::Plan => {
            let plan = session.plan().await?;
            println!(
                "{} local entries, remote snapshot {:?}",
                plan.local_entries, plan.verdict
            );
            for target in plan.schedule.removals.iter() {
                println!("- {}", target.path);
            }
            for target in plan.schedule.uploads.iter() {
                println!("+ {}", target.path);
            }
            if plan.schedule.is_empty() {
                println!("Nothing to do");
            }
        }
        Command::TestConnection => {
            let mut session = session;
            session.test_connection().await?;
            println!("Connection OK");
        }
        Command::InitConfig => {} // handled before logging starts
    }

    Ok(())
}
