use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::app::ports::{LookupError, MetadataLookupPort, ReleaseCandidate};
use crate::config::DiscogsConfig;
use crate::error::{CatalogError, Result};

/// Discogs database search over HTTP.
pub struct DiscogsClient {
    client: reqwest::Client,
    search_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default, deserialize_with = "lenient_year")]
    year: Option<i32>,
    #[serde(default)]
    genre: Vec<String>,
    #[serde(default)]
    style: Vec<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    format: Vec<String>,
    #[serde(default)]
    label: Vec<String>,
}

/// Discogs sends the year as a string, a number, or not at all.
fn lenient_year<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|y| *y > 0))
}

impl From<SearchResult> for ReleaseCandidate {
    fn from(result: SearchResult) -> Self {
        Self {
            id: result.id.to_string(),
            title: result.title,
            year: result.year,
            genres: result.genre,
            styles: result.style,
            country: result.country,
            formats: result.format,
            labels: result.label,
        }
    }
}

impl DiscogsClient {
    pub fn new(config: &DiscogsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        match config.token.as_deref() {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Discogs token={}", token))
                    .map_err(|e| CatalogError::Config(format!("Invalid Discogs token: {}", e)))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => warn!("DISCOGS_TOKEN not set; API requests may be rate-limited"),
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            search_url: format!("{}/database/search", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MetadataLookupPort for DiscogsClient {
    async fn search_releases(
        &self,
        artist: &str,
        title: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ReleaseCandidate>, LookupError> {
        let query = format!("{} {}", artist, title);
        info!("Searching Discogs: {}", query);

        let per_page = limit.max(1).to_string();
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", query.as_str()),
                ("type", "release"),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(LookupError::RateLimited),
            status if !status.is_success() => {
                return Err(LookupError::Http(format!("status {}", status)))
            }
            _ => {}
        }

        let body: SearchResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else {
                LookupError::Decode(e.to_string())
            }
        })?;

        let candidates: Vec<ReleaseCandidate> = body
            .results
            .into_iter()
            .take(limit)
            .map(ReleaseCandidate::from)
            .collect();
        info!("Found {} releases", candidates.len());
        Ok(candidates)
    }
}

fn map_transport_error(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else if e.is_connect() {
        LookupError::Unavailable(e.to_string())
    } else {
        LookupError::Http(e.to_string())
    }
}
