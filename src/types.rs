use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One movie/series/anime entry as persisted in a collection file.
///
/// Field names follow the cache files the frontend already consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub titulo: String,
    #[serde(default)]
    pub titulo_original: Option<String>,
    #[serde(default)]
    pub capa: Option<String>,
    #[serde(default = "unknown_quality")]
    pub qualidade: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub descricao: String,
    #[serde(default, deserialize_with = "genres_lenient")]
    pub generos: Vec<String>,
}

pub const UNKNOWN_QUALITY: &str = "unknown";

fn unknown_quality() -> String {
    UNKNOWN_QUALITY.to_string()
}

fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

// Older caches stored genres as a single comma separated string.
fn genres_lenient<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Genres {
        List(Vec<String>),
        Text(String),
    }
    Ok(match Option::<Genres>::deserialize(de)? {
        Some(Genres::List(v)) => v,
        Some(Genres::Text(s)) => s
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
        None => Vec::new(),
    })
}

/// Partially populated record scraped from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStub {
    pub id: String,
    pub titulo: String,
    pub qualidade: String,
    pub capa: String,
    pub detail_url: String,
}

/// Extended fields pulled from a detail page. `Default` is the "nothing found" value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailFields {
    pub titulo_original: Option<String>,
    pub descricao: String,
    pub generos: Vec<String>,
}

impl DetailFields {
    pub fn is_empty(&self) -> bool {
        self.titulo_original.is_none() && self.descricao.is_empty() && self.generos.is_empty()
    }
}

pub type Collection = Vec<Item>;

/// A loaded collection plus the time it was last written, when the file recorded one.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub items: Collection,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// On-disk shape of a collection file.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum CacheFile {
    Stamped {
        data: Vec<serde_json::Value>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Bare(Vec<serde_json::Value>),
}

/// Accepts RFC 3339 as well as the naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form
/// older writers produced; naive values are read as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Serialize)]
pub(crate) struct StampedRef<'a> {
    pub data: &'a [Item],
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Filmes,
    Series,
    Animes,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Filmes => "filmes",
            Category::Series => "series",
            Category::Animes => "animes",
        }
    }

    /// Path of the upstream listing page, relative to the configured base.
    pub fn listing_path(&self) -> &'static str {
        match self {
            Category::Filmes => "/filmes",
            Category::Series => "/series",
            Category::Animes => "/animes",
        }
    }

    /// File holding the paginated catalogue for this category.
    pub fn catalog_file(&self) -> &'static str {
        match self {
            Category::Filmes => "CodeFilmesNomes.json",
            Category::Series => "CodeSeriesNomes.json",
            Category::Animes => "CodeAnimesNomes.json",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filmes" | "filme" | "movies" => Ok(Category::Filmes),
            "series" | "serie" | "tv" => Ok(Category::Series),
            "animes" | "anime" => Ok(Category::Animes),
            other => Err(anyhow::anyhow!(
                "unknown category `{}` (expected filmes, series, animes)",
                other
            )),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection file served by the API, with the listing it is scraped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    /// Curated home rail. Read-only; nothing scrapes into it.
    Home,
    /// Latest movies, refreshed from the movies listing.
    NewMovies,
    /// Series rail, refreshed from the series listing.
    Series,
    /// Paginated catalogue of one category.
    Catalog(Category),
}

impl Feed {
    pub fn file_name(&self) -> &'static str {
        match self {
            Feed::Home => "Filmes.json",
            Feed::NewMovies => "Novosfilmes.json",
            Feed::Series => "series.json",
            Feed::Catalog(c) => c.catalog_file(),
        }
    }

    /// Upstream listing path, `None` for feeds that are never scraped.
    pub fn listing_path(&self) -> Option<&'static str> {
        match self {
            Feed::Home => None,
            Feed::NewMovies => Some(Category::Filmes.listing_path()),
            Feed::Series => Some(Category::Series.listing_path()),
            Feed::Catalog(c) => Some(c.listing_path()),
        }
    }
}

/// One page of a catalogue plus totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPage {
    pub items: Vec<Item>,
    pub total_itens: usize,
    pub total_paginas: usize,
    pub pagina_atual: usize,
}

/// Slice `items` into 1-based pages of `size`. Page numbers below 1 read as 1;
/// pages past the end are empty but keep the totals.
pub fn paginate(items: &[Item], page: usize, size: usize) -> CatalogPage {
    let size = size.max(1);
    let page = page.max(1);
    let start = (page - 1).saturating_mul(size).min(items.len());
    let end = start.saturating_add(size).min(items.len());
    CatalogPage {
        items: items[start..end].to_vec(),
        total_itens: items.len(),
        total_paginas: items.len().div_ceil(size),
        pagina_atual: page,
    }
}
