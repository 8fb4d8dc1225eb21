//! Demo binary: load a config, wire up logging callbacks, run the router.
//!
//! CLI shape and logging setup follow `jamjam::main`'s `clap::Parser` derive
//! and `tracing_subscriber::FmtSubscriber` pattern.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::FmtSubscriber;

use voxrouter::callbacks::LoggingCallbacks;
use voxrouter::command::{Command, DetectorResult};
use voxrouter::config::RouterConfig;
use voxrouter::model::Source;
use voxrouter::router::Router;

#[derive(Parser)]
#[command(name = "voxrouterd", about = "Voice-session router daemon")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a JSON `RouterConfig`. Defaults to built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router, reading trigger simulation from stdin for local testing.
    Run,
    /// Validate a config file and print the resolved profiles.
    CheckConfig,
}

fn setup_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber")
}

fn load_config(path: Option<&PathBuf>) -> Result<RouterConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&text).context("parsing config file")
        }
        None => Ok(RouterConfig::default()),
    }
}

async fn run_router(config: RouterConfig) -> Result<()> {
    let (router, handle) = Router::new(config, Arc::new(LoggingCallbacks));

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let loop_handle = tokio::task::spawn_local(router.run());

            // Demo trigger: a single local-mic session begin, immediately.
            let _ = handle.send(Command::SessionBegin {
                source: Source::LocalMic,
                detector: DetectorResult::default(),
            });

            tokio::signal::ctrl_c().await.ok();
            let _ = handle.send(Command::Terminate { ack: None });
            let _ = loop_handle.await;
        })
        .await;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run => {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(run_router(config))
        }
    }
}
