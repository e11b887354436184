//! CLI application for layout-based field extraction.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{assemble, extract, fetch, scan};

/// Layout-based field extraction - Pull named values out of fixed-layout reports
#[derive(Parser)]
#[command(name = "layscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from vector layout XML files
    Extract(extract::ExtractArgs),

    /// Recognize schema regions from scanned page images
    Scan(scan::ScanArgs),

    /// Assemble recognized records into CSV tables
    Assemble(assemble::AssembleArgs),

    /// Download source documents from a URL list
    Fetch(fetch::FetchArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Execute command
    match cli.command {
        Commands::Extract(args) => extract::run(args).await,
        Commands::Scan(args) => scan::run(args).await,
        Commands::Assemble(args) => assemble::run(args).await,
        Commands::Fetch(args) => fetch::run(args).await,
    }
}
