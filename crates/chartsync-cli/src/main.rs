//! chartsync CLI - mirror Helm charts and their container images into a private registry

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::discover::DiscoverArgs;
use commands::prune::PruneArgs;
use commands::sync::SyncArgs;

/// Log filter directives, e.g. `CHARTSYNC_LOG=chartsync_engine=debug`
const LOG_ENV: &str = "CHARTSYNC_LOG";

#[derive(Parser)]
#[command(name = "chartsync")]
#[command(author = "chartsync contributors")]
#[command(version)]
#[command(about = "Mirror Helm charts and their container images into a private registry", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/chartsync/config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror every selected addon and its images into the target registry
    Sync(SyncArgs),

    /// List the addons found in a values document or catalog
    Discover(DiscoverArgs),

    /// Delete registry repositories created by earlier syncs
    Prune(PruneArgs),
}

fn init_logging(debug: bool) {
    let directives = if debug {
        "debug".to_string()
    } else {
        std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::builder().parse_lossy(directives))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.debug);

    let outcome = match cli.command {
        Commands::Sync(args) => commands::sync::run(args, cli.config.as_deref()).await,
        Commands::Discover(args) => commands::discover::run(&args),
        Commands::Prune(args) => commands::prune::run(&args).await,
    };

    match outcome {
        Ok(exit_codes::SUCCESS) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            std::process::exit(code)
        }
    }
}
