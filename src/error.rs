use thiserror::Error;

/// Failure of a single upstream request.
///
/// Callers in the scrape path never surface these; they log and degrade to an
/// empty result.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("{url} did not return html (content-type: {content_type})")]
    NotHtml { url: String, content_type: String },
    #[error("refusing to fetch {url}: {reason}")]
    Refused { url: String, reason: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Http { source, .. } if source.is_timeout())
    }
}
