//! FCR CLI
//!
//! Run a gateway or provider node, or query the retrieval marketplace.

mod commands;
mod config;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fcr")]
#[command(version)]
#[command(about = "FCR - escrow-gated content retrieval", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: <config_dir>/fcr/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate keys and write a config file
    Init(commands::init::InitArgs),

    /// Print a fresh key, its node ID and wallet address
    Keygen,

    /// Run the request handler server
    Serve,

    /// Ask one gateway for offers
    FindOffers(commands::find_offers::FindOffersArgs),

    /// Ask a gateway to query the gateways closest to a CID
    FindOffersDht(commands::find_offers_dht::FindOffersDhtArgs),

    /// Discover and download content
    Retrieve(commands::retrieve::RetrieveArgs),
}

/// Logs go to stderr so stdout stays parseable.
fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    let config = cli.config.as_deref();

    let exit_code = match cli.command {
        Commands::Init(args) => commands::init::run(args, config),
        Commands::Keygen => commands::keygen::run(),
        Commands::Serve => commands::serve::run(config).await,
        Commands::FindOffers(args) => commands::find_offers::run(args, config).await,
        Commands::FindOffersDht(args) => commands::find_offers_dht::run(args, config).await,
        Commands::Retrieve(args) => commands::retrieve::run(args, config).await,
    };

    std::process::exit(exit_code);
}
