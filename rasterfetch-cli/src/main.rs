//! rasterfetch CLI - Command-line interface
//!
//! Streams image files through the rasterfetch materialization engine.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::convert::ConvertArgs;
use commands::probe::ProbeArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "rasterfetch")]
#[command(version, about = "Stream images tile by tile into a single pixel buffer")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize an image (optionally cropped and subsampled) and write it out
    Convert(ConvertArgs),
    /// Report an image's sample encoding without transferring its pixels
    Probe(ProbeArgs),
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "rasterfetch=debug" } else { "rasterfetch=warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Convert(args) => commands::convert::run(args),
        Commands::Probe(args) => commands::probe::run(args),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
