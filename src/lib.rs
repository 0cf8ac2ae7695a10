pub mod api;
pub mod codes;
pub mod config;
pub mod dedup;
pub mod enrich;
pub mod error;
pub mod fetcher;
pub mod listing;
pub mod mapping;
pub mod metadata;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod worker;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::codes::{CodeKind, CodeList};
    pub use crate::config::Config;
    pub use crate::fetcher::{Fetch, HttpFetcher, Page};
    pub use crate::pipeline::UpdateReport;
    pub use crate::types::{CatalogPage, Category, Collection, Feed, Item, Snapshot};
    pub use crate::Flixcache;
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};
use url::Url;

use crate::codes::{fetch_codes, CodeKind, CodeList};
use crate::config::Config;
use crate::enrich::Enricher;
use crate::fetcher::{Fetch, HttpFetcher};
use crate::metadata::{ImdbSource, MetadataSource, TmdbSource};
use crate::pipeline::{Pipeline, UpdateReport};
use crate::store::{is_fresh, JsonStore};
use crate::types::{paginate, CatalogPage, Category, Collection, Feed, Item, Snapshot};
use crate::worker::RefreshPool;

/// Cache-backed catalogue: collection files under `data_dir`, refreshed by
/// scraping the configured site.
pub struct Flixcache {
    config: Config,
    base: Url,
    store: Arc<JsonStore>,
    fetcher: Arc<dyn Fetch>,
    pool: RefreshPool,
}

impl Flixcache {
    /// Build with the reqwest transport described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent, config.timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Build on a caller-supplied transport. Detail pages are restricted to the base host.
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetch>) -> Result<Self> {
        let base = config.base()?;
        let store = Arc::new(JsonStore::new(config.cache_format));
        let enricher = Enricher::new(fetcher.clone(), config.rate_limit(), base.host_str().map(str::to_string));
        let pipeline = Arc::new(Pipeline::new(store.clone(), fetcher.clone(), enricher, base.clone()));
        let pool = RefreshPool::new(pipeline, config.background_workers);
        Ok(Self { config, base, store, fetcher, pool })
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn path(&self, feed: Feed) -> PathBuf { self.config.data_file(feed.file_name()) }

    /// Current contents of a feed's file.
    pub async fn snapshot(&self, feed: Feed) -> Snapshot { self.store.load(&self.path(feed)).await }

    fn listing_url(&self, feed: Feed) -> Option<String> {
        let path = feed.listing_path()?;
        match self.base.join(path) {
            Ok(u) => Some(u.to_string()),
            Err(e) => {
                error!(%path, error = %e, "cannot build listing url");
                None
            }
        }
    }

    /// Refresh a feed. With `wait`, the run completes first and its result is
    /// returned; otherwise the current file is returned and the run continues
    /// in the background. A feed younger than the configured TTL is not refreshed.
    pub async fn refresh(&self, feed: Feed, wait: bool) -> Collection {
        let path = self.path(feed);
        let current = self.store.load(&path).await;
        let Some(url) = self.listing_url(feed) else { return current.items };
        if let Some(ttl) = self.config.ttl() {
            if is_fresh(&current, ttl) {
                info!(feed = feed.file_name(), "collection still fresh, skipping refresh");
                return current.items;
            }
        }

        let handle = self.pool.submit(url, path.clone());
        if !wait {
            return current.items;
        }
        match handle.join().await {
            Some((items, _)) => items,
            None => self.store.load(&path).await.items,
        }
    }

    /// Run a feed refresh in the foreground and report what changed. Ignores the TTL.
    pub async fn refresh_now(&self, feed: Feed) -> Result<(Collection, UpdateReport)> {
        let url = self.listing_url(feed).ok_or_else(|| anyhow!("{} has no upstream listing", feed.file_name()))?;
        Ok(self.refresh_into(&url, &self.path(feed)).await)
    }

    /// Scrape `url` into an arbitrary collection file.
    pub async fn refresh_into(&self, url: &str, cache_path: &Path) -> (Collection, UpdateReport) {
        self.pool.pipeline().update_with_report(url, cache_path).await
    }

    pub async fn page(&self, category: Category, pagina: usize) -> CatalogPage {
        let items = self.snapshot(Feed::Catalog(category)).await.items;
        paginate(&items, pagina, self.config.page_size)
    }

    /// Look up one record of a category's catalogue by id.
    pub async fn find(&self, category: Category, id: &str) -> Option<Item> {
        self.snapshot(Feed::Catalog(category)).await.items.into_iter().find(|i| i.id == id)
    }

    pub async fn codes(&self, kind: CodeKind) -> Result<CodeList> {
        fetch_codes(&self.store, self.fetcher.as_ref(), &self.base, &self.config.data_dir, kind).await
    }

    /// Add every listed code that the catalogue lacks, resolving movies on
    /// IMDb and series and animes on TMDb.
    pub async fn backfill(&self, kind: CodeKind) -> Result<(Collection, UpdateReport)> {
        let codes = self.codes(kind).await?;
        let source: Box<dyn MetadataSource> = match kind {
            CodeKind::Filmes => Box::new(ImdbSource::new(self.fetcher.clone())),
            CodeKind::Series | CodeKind::Animes => Box::new(self.tmdb(kind)?),
        };
        let category = match kind {
            CodeKind::Filmes => Category::Filmes,
            CodeKind::Series => Category::Series,
            CodeKind::Animes => Category::Animes,
        };
        let path = self.path(Feed::Catalog(category));
        Ok(self.pool.pipeline().backfill(&codes.codigos, &path, source.as_ref()).await)
    }

    fn tmdb(&self, kind: CodeKind) -> Result<TmdbSource> {
        let key = self
            .config
            .tmdb_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("tmdb_api_key is required to backfill {kind}"))?;
        Ok(TmdbSource::new(self.fetcher.clone(), key).with_api_base(&self.config.tmdb_api_base))
    }

    /// Populate the upstream code lists and the movie and series catalogues. Failures are logged, not returned.
    pub async fn warm_up(&self) {
        for kind in [CodeKind::Filmes, CodeKind::Series] {
            if let Err(e) = self.codes(kind).await {
                warn!(%kind, error = %e, "code list unavailable during warm-up");
            }
        }
        for category in [Category::Filmes, Category::Series] {
            let items = self.refresh(Feed::Catalog(category), true).await;
            info!(%category, records = items.len(), "catalogue warmed");
        }
    }
}
