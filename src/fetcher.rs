use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

/// A fetched page body.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl Page {
    /// False only when the server declared a non-HTML content type.
    pub fn looks_like_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
            None => true,
        }
    }
}

/// Upstream transport. The scrape path depends on this rather than on reqwest
/// so tests can serve canned pages.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<Page, FetchError>;
}

/// reqwest-backed transport carrying the configured user agent and timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, user_agent: user_agent.to_string() })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|source| FetchError::Http { url: url.to_string(), source })?;
        let status = resp.status();
        debug!(%url, status = status.as_u16(), "upstream response");
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status: status.as_u16() });
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|source| FetchError::Http { url: url.to_string(), source })?;
        Ok(Page { url: url.to_string(), content_type, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_detection() {
        let mut page = Page { url: "u".into(), content_type: None, body: String::new() };
        assert!(page.looks_like_html());
        page.content_type = Some("Text/HTML; charset=UTF-8".into());
        assert!(page.looks_like_html());
        page.content_type = Some("application/json".into());
        assert!(!page.looks_like_html());
    }
}
