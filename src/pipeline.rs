use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::dedup::IdIndex;
use crate::enrich::Enricher;
use crate::fetcher::Fetch;
use crate::listing::fetch_listing;
use crate::mapping::item_from_stub;
use crate::metadata::MetadataSource;
use crate::store::JsonStore;
use crate::types::{Collection, ItemStub};

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// Candidates seen upstream (stubs or ids).
    pub listed: usize,
    /// Candidates dropped because their id was already stored or repeated.
    pub already_known: usize,
    /// Candidates whose lookup produced nothing (id-driven runs only).
    pub failed: usize,
    pub added: usize,
    /// False when nothing was written, either because there was nothing new or the write failed.
    pub persisted: bool,
}

/// Listing → dedup → enrichment → append → save.
///
/// Each run holds the collection's rewrite lock from the initial load to the
/// final save, so overlapping runs on one file apply one after the other and
/// never drop each other's additions.
pub struct Pipeline {
    store: Arc<JsonStore>,
    fetcher: Arc<dyn Fetch>,
    enricher: Enricher,
    base: Url,
}

impl Pipeline {
    pub fn new(store: Arc<JsonStore>, fetcher: Arc<dyn Fetch>, enricher: Enricher, base: Url) -> Self {
        Self { store, fetcher, enricher, base }
    }

    /// Refresh the collection at `cache_path` from the listing at `url` and
    /// return the full collection, updated or not.
    pub async fn update(&self, url: &str, cache_path: &Path) -> Collection {
        self.update_with_report(url, cache_path).await.0
    }

    pub async fn update_with_report(&self, url: &str, cache_path: &Path) -> (Collection, UpdateReport) {
        let guard = self.store.lock(cache_path).await;
        let mut items = guard.load().await.items;

        let stubs = fetch_listing(self.fetcher.as_ref(), url, &self.base).await;
        let mut report = UpdateReport { listed: stubs.len(), ..UpdateReport::default() };
        if stubs.is_empty() {
            return (items, report);
        }

        let mut index = IdIndex::from_items(&items);
        let fresh: Vec<ItemStub> = stubs.into_iter().filter(|s| index.insert(&s.id)).collect();
        report.already_known = report.listed - fresh.len();
        if fresh.is_empty() {
            info!(%url, path = %cache_path.display(), "no new records");
            return (items, report);
        }

        let details = self.enricher.enrich_all(&fresh).await;
        report.added = fresh.len();
        items.extend(fresh.into_iter().zip(details).map(|(stub, d)| item_from_stub(stub, d)));

        report.persisted = guard.save(&items).await;
        if report.persisted {
            info!(%url, path = %cache_path.display(), added = report.added, total = items.len(), "collection updated");
        } else {
            warn!(path = %cache_path.display(), added = report.added, "new records kept in memory only; save failed");
        }
        (items, report)
    }

    /// Id-driven variant: look up every id not yet stored through `source`,
    /// paced like detail enrichment, and append the hits in id order.
    pub async fn backfill(&self, ids: &[String], cache_path: &Path, source: &dyn MetadataSource) -> (Collection, UpdateReport) {
        let guard = self.store.lock(cache_path).await;
        let mut items = guard.load().await.items;
        let mut report = UpdateReport { listed: ids.len(), ..UpdateReport::default() };

        let mut index = IdIndex::from_items(&items);
        let pending: Vec<&str> = ids.iter().map(|s| s.trim()).filter(|id| !id.is_empty() && index.insert(id)).collect();
        report.already_known = ids.len() - pending.len();
        if pending.is_empty() {
            info!(source = source.name(), path = %cache_path.display(), "nothing to backfill");
            return (items, report);
        }

        info!(source = source.name(), pending = pending.len(), "backfilling records");
        let found = join_all(pending.iter().map(|id| self.enricher.throttled(source.lookup(id)))).await;
        for (id, hit) in pending.iter().zip(found) {
            match hit {
                Some(mut item) => {
                    item.id = id.to_string();
                    items.push(item);
                    report.added += 1;
                }
                None => report.failed += 1,
            }
        }

        if report.added > 0 {
            report.persisted = guard.save(&items).await;
        }
        info!(source = source.name(), added = report.added, failed = report.failed, "backfill finished");
        (items, report)
    }
}
