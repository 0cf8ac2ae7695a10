use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use scraper::Html;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::fetcher::Fetch;
use crate::listing::{sel, text_of};
use crate::types::{DetailFields, ItemStub};

/// Concurrency and pacing policy for per-item upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_concurrent: usize,
    /// Window the permits are spread over; each call is paced by `period / max_concurrent`.
    pub period: Duration,
}

impl RateLimit {
    pub fn new(max_concurrent: usize, period: Duration) -> Self {
        Self { max_concurrent: max_concurrent.max(1), period }
    }

    pub fn pacing(&self) -> Duration {
        self.period / self.max_concurrent.max(1) as u32
    }
}

impl Default for RateLimit {
    fn default() -> Self { Self::new(5, Duration::from_secs(1)) }
}

/// Fetches detail pages under a fixed permit pool.
pub struct Enricher {
    fetcher: Arc<dyn Fetch>,
    permits: Arc<Semaphore>,
    /// Earliest instant the next call may start. Starts are `pacing` apart
    /// across all permits, so at most `max_concurrent` begin per `period`.
    next_start: Mutex<Option<Instant>>,
    pacing: Duration,
    allowed_host: Option<String>,
}

impl Enricher {
    /// `allowed_host`, when set, restricts detail fetches to that host.
    pub fn new(fetcher: Arc<dyn Fetch>, limit: RateLimit, allowed_host: Option<String>) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(limit.max_concurrent.max(1))),
            next_start: Mutex::new(None),
            pacing: limit.pacing(),
            allowed_host: allowed_host.map(|h| h.to_ascii_lowercase()),
        }
    }

    pub fn pacing(&self) -> Duration { self.pacing }

    /// Run `call` while holding a permit, no sooner than one pacing interval
    /// after the previous call started.
    pub(crate) async fn throttled<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire only fails if that changes.
        let _permit = self.permits.acquire().await.ok();
        let start = self.reserve_start().await;
        sleep_until(start).await;
        call.await
    }

    async fn reserve_start(&self) -> Instant {
        let mut next = self.next_start.lock().await;
        let now = Instant::now();
        let start = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(start + self.pacing);
        start
    }

    /// Detail fields for one stub; every failure resolves to the empty value.
    pub async fn enrich(&self, stub: &ItemStub) -> DetailFields {
        self.throttled(async {
            match self.fetch_details(&stub.detail_url).await {
                Ok(fields) => {
                    if fields.is_empty() {
                        warn!(id = %stub.id, url = %stub.detail_url, "detail page had none of the expected fields");
                    }
                    fields
                }
                Err(e) => {
                    warn!(id = %stub.id, error = %e, "detail enrichment failed");
                    DetailFields::default()
                }
            }
        })
        .await
    }

    /// Enrich a batch concurrently. The result is index-aligned with `stubs`.
    pub async fn enrich_all(&self, stubs: &[ItemStub]) -> Vec<DetailFields> {
        join_all(stubs.iter().map(|s| self.enrich(s))).await
    }

    async fn fetch_details(&self, url: &str) -> Result<DetailFields, FetchError> {
        self.check_host(url)?;
        let page = self.fetcher.get(url).await?;
        if !page.looks_like_html() {
            return Err(FetchError::NotHtml {
                url: url.to_string(),
                content_type: page.content_type.unwrap_or_default(),
            });
        }
        debug!(%url, bytes = page.body.len(), "parsing detail page");
        Ok(parse_details(&page.body))
    }

    fn check_host(&self, url: &str) -> Result<(), FetchError> {
        let Some(allowed) = &self.allowed_host else { return Ok(()) };
        let host = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        match host {
            Some(h) if &h == allowed => Ok(()),
            Some(h) => Err(FetchError::Refused { url: url.to_string(), reason: format!("host {h} is not {allowed}") }),
            None => Err(FetchError::Refused { url: url.to_string(), reason: "not an absolute url".into() }),
        }
    }
}

/// Best-effort extraction of the extended fields. Each field tries a primary
/// selector, then a fallback; anything not found stays empty.
pub fn parse_details(html: &str) -> DetailFields {
    let doc = Html::parse_document(html);
    let first_text = |candidates: &[&str]| -> Option<String> {
        candidates.iter().find_map(|css| {
            doc.select(&sel(css)).next().map(text_of).filter(|t| !t.is_empty())
        })
    };

    let titulo_original = first_text(&["span.original-title", "h2.original-title"]);
    let descricao = first_text(&["div.description", "p.synopsis"]).unwrap_or_default();

    let entry = sel("span, li");
    let generos = ["div.genres", "ul.genres-list"]
        .iter()
        .find_map(|css| doc.select(&sel(css)).next())
        .map(|container| {
            container
                .select(&entry)
                .map(text_of)
                .filter(|g| !g.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    DetailFields { titulo_original, descricao, generos }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::FakeFetch;

    const DETAIL: &str = r#"
        <html><body>
          <span class="original-title">The Original</span>
          <div class="description">Uma   descrição
             longa.</div>
          <div class="genres"><span>Ação</span><span>Drama</span><span> </span></div>
        </body></html>"#;

    fn stub(id: &str) -> ItemStub {
        ItemStub {
            id: id.into(),
            titulo: format!("T{id}"),
            qualidade: "HD".into(),
            capa: format!("https://superflix.example/{id}.jpg"),
            detail_url: format!("https://superflix.example/filme/{id}"),
        }
    }

    fn enricher(fake: Arc<FakeFetch>, limit: RateLimit) -> Enricher {
        Enricher::new(fake, limit, Some("superflix.example".into()))
    }

    #[test]
    fn parses_primary_selectors() {
        let d = parse_details(DETAIL);
        assert_eq!(d.titulo_original.as_deref(), Some("The Original"));
        assert_eq!(d.descricao, "Uma descrição longa.");
        assert_eq!(d.generos, vec!["Ação", "Drama"]);
    }

    #[test]
    fn falls_back_to_secondary_selectors() {
        let html = r#"<h2 class="original-title">Orig</h2><p class="synopsis">Sinopse</p>
                      <ul class="genres-list"><li>Comédia</li><li>Família</li></ul>"#;
        let d = parse_details(html);
        assert_eq!(d.titulo_original.as_deref(), Some("Orig"));
        assert_eq!(d.descricao, "Sinopse");
        assert_eq!(d.generos, vec!["Comédia", "Família"]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let d = parse_details("<html><body><p>nothing here</p></body></html>");
        assert_eq!(d, DetailFields::default());
        assert!(d.is_empty());
    }

    #[test]
    fn pacing_is_period_over_cap() {
        assert_eq!(RateLimit::default().pacing(), Duration::from_millis(200));
        assert_eq!(RateLimit::new(0, Duration::from_secs(1)).max_concurrent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_abort_the_batch() {
        let fake = Arc::new(FakeFetch::new());
        fake.html("https://superflix.example/filme/a", DETAIL);
        fake.status("https://superflix.example/filme/b", 500);
        fake.html("https://superflix.example/filme/c", DETAIL);

        let out = enricher(fake.clone(), RateLimit::default()).enrich_all(&[stub("a"), stub("b"), stub("c")]).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].titulo_original.as_deref(), Some("The Original"));
        assert_eq!(out[1], DetailFields::default());
        assert_eq!(out[2].generos.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn results_stay_aligned_when_fetches_finish_out_of_order() {
        let fake = Arc::new(FakeFetch::new());
        for (id, title) in [("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")] {
            fake.html(&format!("https://superflix.example/filme/{id}"), &format!(r#"<span class="original-title">{title}</span>"#));
        }
        let out = enricher(fake, RateLimit::new(3, Duration::from_millis(300)))
            .enrich_all(&[stub("c"), stub("a"), stub("b")])
            .await;
        let titles: Vec<_> = out.iter().map(|d| d.titulo_original.clone().unwrap_or_default()).collect();
        assert_eq!(titles, vec!["Gamma", "Alpha", "Beta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_rate_ceiling() {
        let fake = Arc::new(FakeFetch::new());
        let stubs: Vec<_> = (0..7).map(|i| stub(&i.to_string())).collect();
        for s in &stubs {
            fake.html(&s.detail_url, DETAIL);
        }
        let limit = RateLimit::new(3, Duration::from_millis(300));
        let e = enricher(fake, limit);

        let started = Instant::now();
        e.enrich_all(&stubs).await;
        let min = e.pacing() * 6; // seven starts, one pacing interval apart
        assert!(started.elapsed() >= min, "{:?} < {:?}", started.elapsed(), min);
    }

    #[tokio::test(start_paused = true)]
    async fn default_limit_allows_five_starts_per_second() {
        let fake = Arc::new(FakeFetch::new());
        let stubs: Vec<_> = (0..25).map(|i| stub(&format!("d{i}"))).collect();
        for s in &stubs {
            fake.html(&s.detail_url, DETAIL);
        }
        let e = enricher(fake.clone(), RateLimit::default());

        let started = Instant::now();
        e.enrich_all(&stubs).await;
        // 25 starts at 200ms spacing: the last one begins at 4.8s
        assert!(started.elapsed() >= Duration::from_millis(4800), "{:?}", started.elapsed());
        assert_eq!(fake.hits().len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_calls_are_spaced_too() {
        let fake = Arc::new(FakeFetch::new());
        fake.html("https://superflix.example/filme/a", DETAIL);
        let e = enricher(fake, RateLimit::new(5, Duration::from_secs(1)));

        let started = Instant::now();
        e.enrich(&stub("a")).await;
        e.enrich(&stub("a")).await;
        e.enrich(&stub("a")).await;
        assert!(started.elapsed() >= Duration::from_millis(400), "{:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_cap() {
        let fake = Arc::new(FakeFetch::with_delay(Duration::from_millis(50)));
        let stubs: Vec<_> = (0..6).map(|i| stub(&format!("s{i}"))).collect();
        for s in &stubs {
            fake.html(&s.detail_url, DETAIL);
        }
        enricher(fake.clone(), RateLimit::new(2, Duration::from_millis(100))).enrich_all(&stubs).await;
        assert!(fake.peak_concurrency() <= 2);
        assert_eq!(fake.hits().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_host_is_refused_without_request() {
        let fake = Arc::new(FakeFetch::new());
        let mut s = stub("x");
        s.detail_url = "https://evil.example/filme/x".into();
        let d = enricher(fake.clone(), RateLimit::default()).enrich(&s).await;
        assert_eq!(d, DetailFields::default());
        assert!(fake.hits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_html_response_is_ignored() {
        let fake = Arc::new(FakeFetch::new());
        fake.typed("https://superflix.example/filme/j", "application/json", r#"{"description":"x"}"#);
        let d = enricher(fake, RateLimit::default()).enrich(&stub("j")).await;
        assert_eq!(d, DetailFields::default());
    }
}
