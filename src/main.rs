mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use flixcache::codes::CodeKind;
use flixcache::config::Config;
use flixcache::types::{Category, Feed};
use flixcache::Flixcache;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flixcache=info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, warm } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let addr = config.bind.clone();
            let app = Arc::new(Flixcache::new(config)?);
            if warm {
                app.warm_up().await;
            }
            flixcache::api::serve(app, &addr).await?;
        }
        Commands::Refresh { category, cache } => {
            let category: Category = category.parse()?;
            let app = Flixcache::new(config)?;
            let feed = Feed::Catalog(category);
            let (items, report) = match cache {
                Some(path) => {
                    let url = app.config().base()?.join(category.listing_path())?;
                    app.refresh_into(url.as_str(), &path).await
                }
                None => app.refresh_now(feed).await?,
            };
            println!(
                "{}: {} listed, {} known, {} added, {} total{}",
                category,
                report.listed,
                report.already_known,
                report.added,
                items.len(),
                if report.added > 0 && !report.persisted { " (not saved)" } else { "" }
            );
        }
        Commands::Codes { kind } => {
            let kind: CodeKind = kind.parse()?;
            let list = Flixcache::new(config)?.codes(kind).await?;
            println!("{}", list.joined());
        }
        Commands::Backfill { kind } => {
            let kind: CodeKind = kind.parse()?;
            let (items, report) = Flixcache::new(config)?.backfill(kind).await?;
            println!(
                "{}: {} codes, {} known, {} added, {} not found, {} total",
                kind, report.listed, report.already_known, report.added, report.failed, items.len()
            );
        }
    }
    Ok(())
}
