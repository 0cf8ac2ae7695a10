//! Upstream catalogue code lists: every IMDb id the site carries for movies,
//! every TMDb id for series. Cached as `{ "codigos": [...] }`. Anime ids are
//! TMDb ids too but have no upstream list; their file is maintained by hand.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::fetcher::Fetch;
use crate::store::JsonStore;

lazy_static! {
    static ref IMDB_CODE: Regex = Regex::new(r"tt\d+").unwrap();
    static ref LINE_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Filmes,
    Series,
    Animes,
}

impl CodeKind {
    /// Upstream page listing the codes; `None` for lists kept only locally.
    pub fn list_path(&self) -> Option<&'static str> {
        match self {
            CodeKind::Filmes => Some("/filmes/lista/"),
            CodeKind::Series => Some("/series/lista/"),
            CodeKind::Animes => None,
        }
    }

    pub fn cache_file(&self) -> &'static str {
        match self {
            CodeKind::Filmes => "CodeFilmes.json",
            CodeKind::Series => "CodeSeries.json",
            CodeKind::Animes => "CodeAnimes.json",
        }
    }

    pub fn parse(&self, html: &str) -> Vec<String> {
        match self {
            CodeKind::Filmes => parse_movie_codes(html),
            CodeKind::Series | CodeKind::Animes => parse_series_codes(html),
        }
    }
}

impl FromStr for CodeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filmes" | "filme" | "movies" => Ok(CodeKind::Filmes),
            "series" | "serie" | "séries" => Ok(CodeKind::Series),
            "animes" | "anime" => Ok(CodeKind::Animes),
            other => Err(anyhow!("unknown code list `{other}` (expected filmes, series or animes)")),
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodeKind::Filmes => "filmes",
            CodeKind::Series => "series",
            CodeKind::Animes => "animes",
        })
    }
}

/// On-disk and wire shape of a cached code list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeList {
    #[serde(default)]
    pub codigos: Vec<String>,
}

impl CodeList {
    /// Comma separated form served by the HTTP surface.
    pub fn joined(&self) -> String { self.codigos.join(", ") }
}

/// All `tt` ids appearing in the page's text, in page order.
pub fn parse_movie_codes(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    IMDB_CODE.find_iter(&text).map(|m| m.as_str().to_string()).collect()
}

/// Digit-only entries of a `<br>` separated list.
pub fn parse_series_codes(html: &str) -> Vec<String> {
    LINE_BREAK
        .split(html)
        .map(|chunk| TAG.replace_all(chunk, "").trim().to_string())
        .filter(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
        .collect()
}

/// Cached code list for `kind`, scraping and caching it when the cache is
/// missing or empty. Upstream failure is an error; there is nothing to fall back to.
/// A kind without an upstream list must already have a non-empty file.
pub async fn fetch_codes(
    store: &JsonStore,
    fetcher: &dyn Fetch,
    base: &Url,
    data_dir: &Path,
    kind: CodeKind,
) -> Result<CodeList> {
    let path = data_dir.join(kind.cache_file());
    if let Some(cached) = store.load_json::<CodeList>(&path).await {
        if !cached.codigos.is_empty() {
            debug!(%kind, count = cached.codigos.len(), "serving cached code list");
            return Ok(cached);
        }
    }

    let Some(list_path) = kind.list_path() else {
        return Err(anyhow!("no {kind} codes: {} is missing or empty and there is no upstream list", path.display()));
    };
    let url = base.join(list_path).context("building code list url")?;
    let page = fetcher
        .get(url.as_str())
        .await
        .with_context(|| format!("could not load the {kind} code list"))?;
    let list = CodeList { codigos: kind.parse(&page.body) };
    store.save_json(&path, &list).await;
    info!(%kind, count = list.codigos.len(), "code list updated");
    Ok(list)
}
