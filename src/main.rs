mod config;
mod error;
mod export;
mod fill;
mod models;
mod progress;
mod scrape;
mod transport;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::progress::{DONE_MARKER, ProgressSink};
use crate::scrape::{SiteScraper, TransfermarktScraper, TuttocampoScraper};
use crate::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "fmscout", about = "Football squad and staff scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Site to scrape
    #[arg(short, long, value_enum, default_value = "transfermarkt", global = true)]
    source: Source,

    /// Write results to this file (.csv or .json)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Transfermarkt,
    Tuttocampo,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every team of a division (players and staff)
    Division { url: String },

    /// Scrape one team's squad and staff
    Team { url: String },

    /// Scrape a single person page
    Person { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fmscout=info,warn",
        1 => "fmscout=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let transport = Arc::new(HttpTransport::new(&config.transport)?);

    let scraper: Box<dyn SiteScraper> = match cli.source {
        Source::Transfermarkt => Box::new(TransfermarktScraper::new(transport, &config)),
        Source::Tuttocampo => Box::new(TuttocampoScraper::new(transport, &config)),
    };

    let (sink, mut rx) = ProgressSink::channel(config.debug);
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
            if line == DONE_MARKER {
                break;
            }
        }
    });

    let table = {
        let _t = utils::Timer::start("scraping run");
        match cli.command {
            Command::Division { url } => scraper.extract_division(&url, &sink).await?,
            Command::Team { url } => scraper.extract_team(&url, &sink).await?,
            Command::Person { url } => scraper.extract_person(&url, &sink).await?,
        }
    };

    sink.complete();
    drop(sink);
    printer.await.ok();

    info!("{} rows, {} columns", table.len(), table.columns().len());

    if let Some(path) = &cli.out {
        export::export(&table, path)?;
        info!("results written to {}", path.display());
    }

    Ok(())
}
