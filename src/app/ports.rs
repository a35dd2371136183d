use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One ranked result from an external release search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    /// Stable external identifier of the release
    pub id: String,
    /// Usually "Artist - Title"
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub country: Option<String>,
    pub formats: Vec<String>,
    pub labels: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("lookup timed out")]
    Timeout,

    #[error("rate limited by metadata service")]
    RateLimited,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("metadata service unavailable: {0}")]
    Unavailable(String),
}

impl LookupError {
    /// Short label used for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::Timeout => "timeout",
            LookupError::RateLimited => "rate_limited",
            LookupError::Http(_) => "http",
            LookupError::Decode(_) => "decode",
            LookupError::Unavailable(_) => "unavailable",
        }
    }
}

// Enrich-side port
#[async_trait]
pub trait MetadataLookupPort: Send + Sync {
    /// Search releases for `artist` / `title`, best-ranked first.
    async fn search_releases(
        &self,
        artist: &str,
        title: &str,
        limit: usize,
    ) -> Result<Vec<ReleaseCandidate>, LookupError>;
}
