//! Catalogue listing pages: repeated `div.poster` blocks, one per title.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::fetcher::Fetch;
use crate::types::ItemStub;

struct ListingSelectors {
    poster: Selector,
    title: Selector,
    quality: Selector,
    image: Selector,
    link: Selector,
}

impl ListingSelectors {
    fn new() -> Self {
        Self {
            poster: sel("div.poster"),
            title: sel("span.title"),
            quality: sel("span.year"),
            image: sel("img"),
            link: sel("a.btn"),
        }
    }
}

// Static selector strings; a parse failure here is a programming error caught by the tests.
pub(crate) fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector `{css}`: {e}"))
}

pub(crate) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `href` against `base` the way a browser would.
pub(crate) fn absolutize(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(String::from)
}

/// Last non-empty path segment of a link, ignoring query and fragment.
pub fn id_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or("");
    path.rsplit('/').find(|s| !s.trim().is_empty()).map(|s| s.trim().to_string())
}

/// Extract stubs from a listing page. Blocks missing any of title, quality,
/// image or link are dropped. A page that matches nothing yields an empty vector.
pub fn parse_listing(html: &str, base: &Url) -> Vec<ItemStub> {
    let doc = Html::parse_document(html);
    let s = ListingSelectors::new();
    let mut out = Vec::new();
    let mut skipped = 0usize;

    for poster in doc.select(&s.poster) {
        match parse_poster(poster, &s, base) {
            Some(stub) => out.push(stub),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, kept = out.len(), "dropped incomplete poster blocks");
    }
    out
}

fn parse_poster(poster: ElementRef<'_>, s: &ListingSelectors, base: &Url) -> Option<ItemStub> {
    let titulo = poster.select(&s.title).next().map(text_of).filter(|t| !t.is_empty())?;
    let qualidade = poster.select(&s.quality).next().map(text_of).filter(|t| !t.is_empty())?;
    let src = poster.select(&s.image).next()?.value().attr("src")?;
    let href = poster.select(&s.link).next()?.value().attr("href")?;

    let id = id_from_href(href)?;
    let capa = absolutize(base, src)?;
    let detail_url = absolutize(base, href)?;
    Some(ItemStub { id, titulo, qualidade, capa, detail_url })
}

/// GET a listing page and parse it. Any upstream failure is logged and yields no stubs.
pub async fn fetch_listing(fetcher: &dyn Fetch, url: &str, base: &Url) -> Vec<ItemStub> {
    let page = match fetcher.get(url).await {
        Ok(p) => p,
        Err(e) if e.is_timeout() => {
            error!(%url, "timed out fetching listing");
            return Vec::new();
        }
        Err(e) => {
            error!(%url, error = %e, "failed to fetch listing");
            return Vec::new();
        }
    };
    let stubs = parse_listing(&page.body, base);
    if stubs.is_empty() {
        warn!(%url, "listing page produced no items; page layout may have changed");
    } else {
        info!(%url, count = stubs.len(), "parsed listing");
    }
    stubs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::FakeFetch;

    fn base() -> Url { Url::parse("https://superflix.example/filmes").unwrap() }

    fn poster(title: &str, year: &str, img: &str, href: &str) -> String {
        format!(
            r#"<div class="poster">
                 <span class="title">{title}</span>
                 <span class="year">{year}</span>
                 <img src="{img}">
                 <a class="btn" href="{href}">Ver</a>
               </div>"#
        )
    }

    #[test]
    fn parses_complete_blocks_and_resolves_urls() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            poster("Filme A", "HD", "/img/a.jpg", "/filme/tt001"),
            poster("Filme  B", "4K", "https://cdn.example/b.jpg", "https://superflix.example/filme/tt002/")
        );
        let stubs = parse_listing(&html, &base());
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].id, "tt001");
        assert_eq!(stubs[0].capa, "https://superflix.example/img/a.jpg");
        assert_eq!(stubs[0].detail_url, "https://superflix.example/filme/tt001");
        assert_eq!(stubs[1].id, "tt002");
        assert_eq!(stubs[1].titulo, "Filme B");
        assert_eq!(stubs[1].qualidade, "4K");
        assert_eq!(stubs[1].capa, "https://cdn.example/b.jpg");
    }

    #[test]
    fn any_missing_field_drops_the_block() {
        let missing_title = r#"<div class="poster"><span class="year">HD</span><img src="a.jpg"><a class="btn" href="/f/1">x</a></div>"#;
        let missing_quality = r#"<div class="poster"><span class="title">T</span><img src="a.jpg"><a class="btn" href="/f/2">x</a></div>"#;
        let missing_image = r#"<div class="poster"><span class="title">T</span><span class="year">HD</span><a class="btn" href="/f/3">x</a></div>"#;
        let missing_src = r#"<div class="poster"><span class="title">T</span><span class="year">HD</span><img><a class="btn" href="/f/4">x</a></div>"#;
        let missing_link = r#"<div class="poster"><span class="title">T</span><span class="year">HD</span><img src="a.jpg"></div>"#;
        let blank_title = r#"<div class="poster"><span class="title">  </span><span class="year">HD</span><img src="a.jpg"><a class="btn" href="/f/5">x</a></div>"#;
        for block in [missing_title, missing_quality, missing_image, missing_src, missing_link, blank_title] {
            assert!(parse_listing(block, &base()).is_empty(), "{block}");
        }
        let good = poster("T", "HD", "a.jpg", "/f/6");
        let mixed = format!("{missing_link}{good}{missing_title}");
        let stubs = parse_listing(&mixed, &base());
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].id, "6");
    }

    #[test]
    fn changed_layout_degrades_to_empty() {
        let html = r#"<div class="card"><h3>Filme</h3><img src="x.jpg"><a href="/f/1">x</a></div>"#;
        assert!(parse_listing(html, &base()).is_empty());
        assert!(parse_listing("", &base()).is_empty());
        assert!(parse_listing("not html at all {{", &base()).is_empty());
    }

    #[test]
    fn id_from_href_handles_trailing_slash_and_query() {
        assert_eq!(id_from_href("/filme/tt123/").as_deref(), Some("tt123"));
        assert_eq!(id_from_href("https://x/serie/99?x=1#top").as_deref(), Some("99"));
        assert_eq!(id_from_href("/"), None);
    }

    #[tokio::test]
    async fn fetch_failure_yields_no_stubs() {
        let fake = FakeFetch::new();
        fake.status("https://superflix.example/filmes", 503);
        let stubs = fetch_listing(&fake, "https://superflix.example/filmes", &base()).await;
        assert!(stubs.is_empty());
    }

    #[tokio::test]
    async fn fetch_parses_served_page() {
        let fake = FakeFetch::new();
        fake.html("https://superflix.example/filmes", &poster("A", "HD", "a.jpg", "/filme/tt9"));
        let stubs = fetch_listing(&fake, "https://superflix.example/filmes", &base()).await;
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].capa, "https://superflix.example/a.jpg");
    }
}
