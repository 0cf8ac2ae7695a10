use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cache-backed scraper and JSON API for movie, series and anime listings
#[derive(Parser)]
#[command(name = "flixcache")]
#[command(about = "Scrape, cache and serve movie/series/anime listings", long_about = None)]
pub struct Cli {
    /// TOML config file (defaults to ./flixcache.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on, overriding the config
        #[arg(short, long)]
        bind: Option<String>,
        /// Fetch code lists and refresh the movie and series catalogues before listening
        #[arg(long)]
        warm: bool,
    },
    /// Scrape one category's listing into its catalogue now
    Refresh {
        /// filmes, series or animes
        category: String,
        /// Write to this file instead of the category's catalogue
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Print a catalogue code list, fetching it when not cached
    Codes {
        /// filmes, series or animes (animes are read from CodeAnimes.json only)
        kind: String,
    },
    /// Add every listed code missing from the catalogue via IMDb/TMDb
    Backfill {
        /// filmes, series or animes
        kind: String,
    },
}
