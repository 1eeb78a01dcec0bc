use reqwest::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use std::time::Duration;

use super::parser::{parse_feed_bytes, FeedParseError};
use super::types::ParsedFeed;

/// Raw feed payload plus the cache tokens the server handed back.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched(FetchedFeed),
    NotModified,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    Http(u16),
    #[error("feed parse error: {0}")]
    Parse(#[from] FeedParseError),
}

pub fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

/// Conditional GET. A 304 short-circuits before any body read, so the
/// parser is never invoked for an unchanged feed.
pub async fn fetch_feed_conditional(
    client: &reqwest::Client,
    url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Result<FetchOutcome, FetchError> {
    let mut request = client.get(url);
    if let Some(value) = etag {
        request = request.header(IF_NONE_MATCH, value);
    }
    if let Some(value) = last_modified {
        request = request.header(IF_MODIFIED_SINCE, value);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.as_u16() == 304 {
        return Ok(FetchOutcome::NotModified);
    }
    if !status.is_success() {
        return Err(FetchError::Http(status.as_u16()));
    }

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response.bytes().await?.to_vec();

    Ok(FetchOutcome::Fetched(FetchedFeed {
        body,
        content_type,
        etag,
        last_modified,
    }))
}

/// Unconditional fetch-and-parse, used when subscribing to a new feed.
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<ParsedFeed, FetchError> {
    match fetch_feed_conditional(client, url, None, None).await? {
        FetchOutcome::Fetched(payload) => Ok(parse_feed_bytes(&payload.body)?),
        // No cache tokens were sent, so a 304 here is a server bug; treat
        // it as a protocol-level failure rather than silently succeeding.
        FetchOutcome::NotModified => Err(FetchError::Http(304)),
    }
}
