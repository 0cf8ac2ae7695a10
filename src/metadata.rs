//! Id-driven metadata lookups: TMDb's JSON API for series/animes and IMDb
//! title pages for movies.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::fetcher::Fetch;
use crate::listing::{sel, text_of};
use crate::mapping::{item_from_imdb, item_from_tmdb};
use crate::types::Item;

/// Resolves an external catalogue id to a full record.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &'static str;
    /// `None` when the id is invalid, unknown upstream, or the lookup failed.
    async fn lookup(&self, id: &str) -> Option<Item>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbGenre {
    pub name: String,
}

/// Subset of TMDb's `/tv/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbShow {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<TmdbGenre>,
}

pub struct TmdbSource {
    fetcher: Arc<dyn Fetch>,
    api_key: String,
    api_base: String,
    language: String,
}

impl TmdbSource {
    pub fn new(fetcher: Arc<dyn Fetch>, api_key: &str) -> Self {
        Self {
            fetcher,
            api_key: api_key.to_string(),
            api_base: "https://api.themoviedb.org/3".to_string(),
            language: "pt-BR".to_string(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn show_url(&self, id: &str) -> String {
        format!("{}/tv/{}?api_key={}&language={}", self.api_base, id, self.api_key, self.language)
    }
}

#[async_trait]
impl MetadataSource for TmdbSource {
    fn name(&self) -> &'static str { "tmdb" }

    async fn lookup(&self, id: &str) -> Option<Item> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            warn!(%id, "not a tmdb id");
            return None;
        }
        let page = match self.fetcher.get(&self.show_url(id)).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%id, error = %e, "tmdb lookup failed");
                return None;
            }
        };
        let show: TmdbShow = match serde_json::from_str(&page.body) {
            Ok(s) => s,
            Err(e) => {
                warn!(%id, error = %e, "unexpected tmdb payload");
                return None;
            }
        };
        let item = item_from_tmdb(id, show);
        if item.is_none() {
            warn!(%id, "tmdb record has no name");
        }
        item
    }
}

/// Fields scraped from an IMDb title page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImdbTitle {
    pub titulo: String,
    pub titulo_original: Option<String>,
    pub capa: Option<String>,
    pub qualidade: Option<String>,
    pub descricao: String,
    pub generos: Vec<String>,
}

pub struct ImdbSource {
    fetcher: Arc<dyn Fetch>,
    title_base: String,
}

impl ImdbSource {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher, title_base: "https://www.imdb.com/pt/title".to_string() }
    }
}

/// IMDb ids look like `tt` followed by at least seven digits.
pub fn is_imdb_id(id: &str) -> bool {
    id.len() >= 9 && id.starts_with("tt") && id[2..].chars().all(|c| c.is_ascii_digit())
}

/// Parse an IMDb title page. Returns `None` when the primary title is missing.
pub fn parse_imdb_title(html: &str) -> Option<ImdbTitle> {
    let doc = Html::parse_document(html);
    let titulo = doc.select(&sel("span.hero__primary-text")).next().map(text_of).filter(|t| !t.is_empty())?;

    let titulo_original = doc
        .select(&sel(r#"[data-testid="hero-title-block__original-title"]"#))
        .next()
        .map(text_of)
        .map(|t| t.trim_start_matches("Título original:").trim_start_matches("Original title:").trim().to_string())
        .filter(|t| !t.is_empty());
    let capa = doc
        .select(&sel(r#"meta[property="og:image"]"#))
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(str::to_string);
    let descricao = doc
        .select(&sel(r#"span[data-testid="plot-l"]"#))
        .next()
        .map(text_of)
        .unwrap_or_default();
    let generos = doc
        .select(&sel("span.ipc-chip__text"))
        .map(text_of)
        .filter(|g| !g.is_empty())
        .collect();

    let qualidade = ["4K", "HD", "SD"].iter().find(|q| html.contains(*q)).map(|q| q.to_string());

    Some(ImdbTitle { titulo, titulo_original, capa, qualidade, descricao, generos })
}

#[async_trait]
impl MetadataSource for ImdbSource {
    fn name(&self) -> &'static str { "imdb" }

    async fn lookup(&self, id: &str) -> Option<Item> {
        if !is_imdb_id(id) {
            warn!(%id, "not an imdb id");
            return None;
        }
        let url = format!("{}/{}/", self.title_base, id);
        let page = match self.fetcher.get(&url).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%id, error = %e, "imdb request failed");
                return None;
            }
        };
        debug!(%id, bytes = page.body.len(), "parsing imdb title page");
        match parse_imdb_title(&page.body) {
            Some(title) => Some(item_from_imdb(id, title)),
            None => {
                warn!(%id, "imdb page has no title");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::FakeFetch;

    const IMDB_PAGE: &str = r#"<html><head><meta property="og:image" content="https://m.media-amazon.com/p.jpg"></head>
        <body><h1><span class="hero__primary-text">O Poderoso Chefão</span></h1>
        <div data-testid="hero-title-block__original-title">Título original: The Godfather</div>
        <span data-testid="plot-l">Uma família mafiosa.</span>
        <span class="ipc-chip__text">Crime</span><span class="ipc-chip__text">Drama</span><span class="ipc-chip__text">Épico</span>
        <p>Disponível em HD</p></body></html>"#;

    #[test]
    fn imdb_id_validation() {
        assert!(is_imdb_id("tt0068646"));
        assert!(!is_imdb_id("tt123"));
        assert!(!is_imdb_id("nm0000001"));
        assert!(!is_imdb_id("ttabcdefg"));
    }

    #[test]
    fn parses_imdb_title_page() {
        let t = parse_imdb_title(IMDB_PAGE).unwrap();
        assert_eq!(t.titulo, "O Poderoso Chefão");
        assert_eq!(t.titulo_original.as_deref(), Some("The Godfather"));
        assert_eq!(t.capa.as_deref(), Some("https://m.media-amazon.com/p.jpg"));
        assert_eq!(t.qualidade.as_deref(), Some("HD"));
        assert_eq!(t.descricao, "Uma família mafiosa.");
        assert_eq!(t.generos.len(), 3);
    }

    #[test]
    fn imdb_page_without_title_is_rejected() {
        assert!(parse_imdb_title("<html><body><p>captcha</p></body></html>").is_none());
    }

    #[tokio::test]
    async fn imdb_lookup_maps_to_item_and_caps_genres() {
        let fake = Arc::new(FakeFetch::new());
        fake.html("https://www.imdb.com/pt/title/tt0068646/", IMDB_PAGE);
        let item = ImdbSource::new(fake).lookup("tt0068646").await.unwrap();
        assert_eq!(item.id, "tt0068646");
        assert_eq!(item.generos, vec!["Crime", "Drama"]);
    }

    #[tokio::test]
    async fn imdb_lookup_rejects_bad_id_without_request() {
        let fake = Arc::new(FakeFetch::new());
        assert!(ImdbSource::new(fake.clone()).lookup("tt1").await.is_none());
        assert!(fake.hits().is_empty());
    }

    const SHOW_URL: &str = "http://tmdb.test/3/tv/1399?api_key=k&language=pt-BR";

    fn tmdb(fake: &Arc<FakeFetch>) -> TmdbSource {
        TmdbSource::new(fake.clone(), "k").with_api_base("http://tmdb.test/3/")
    }

    #[tokio::test]
    async fn tmdb_lookup_maps_show_to_item() {
        let fake = Arc::new(FakeFetch::new());
        fake.typed(
            SHOW_URL,
            "application/json",
            r#"{"name":"A Guerra dos Tronos","original_name":"Game of Thrones","poster_path":"/p.jpg",
                "overview":"Sete reinos.","genres":[{"id":1,"name":"Drama"},{"id":2,"name":"Aventura"},{"id":3,"name":"Ação"}]}"#,
        );
        let item = tmdb(&fake).lookup("1399").await.unwrap();
        assert_eq!(item.id, "1399");
        assert_eq!(item.titulo, "A Guerra dos Tronos");
        assert_eq!(item.titulo_original.as_deref(), Some("Game of Thrones"));
        assert_eq!(item.descricao, "Sete reinos.");
        assert_eq!(fake.hits(), vec![SHOW_URL]);
    }

    #[tokio::test]
    async fn tmdb_error_status_is_not_found() {
        let fake = Arc::new(FakeFetch::new());
        fake.status(SHOW_URL, 401);
        assert!(tmdb(&fake).lookup("1399").await.is_none());
        assert_eq!(fake.hit_count(SHOW_URL), 1);
    }

    #[tokio::test]
    async fn tmdb_show_without_name_is_dropped() {
        let fake = Arc::new(FakeFetch::new());
        fake.typed(SHOW_URL, "application/json", r#"{"name":null,"overview":"x","genres":[]}"#);
        assert!(tmdb(&fake).lookup("1399").await.is_none());
    }

    #[tokio::test]
    async fn tmdb_garbage_body_is_dropped() {
        let fake = Arc::new(FakeFetch::new());
        fake.html(SHOW_URL, "<html>rate limited</html>");
        assert!(tmdb(&fake).lookup("1399").await.is_none());
    }

    #[tokio::test]
    async fn tmdb_rejects_non_numeric_id_without_request() {
        let fake = Arc::new(FakeFetch::new());
        let source = tmdb(&fake);
        assert!(source.lookup("tt0068646").await.is_none());
        assert!(source.lookup("").await.is_none());
        assert!(fake.hits().is_empty());
    }

    #[test]
    fn tmdb_payload_tolerates_nulls() {
        let raw = r#"{"name":"X","original_name":null,"poster_path":null,"overview":"o","genres":[{"id":1,"name":"Drama"}]}"#;
        let show: TmdbShow = serde_json::from_str(raw).unwrap();
        assert_eq!(show.genres[0].name, "Drama");
        assert!(show.poster_path.is_none());
    }
}
