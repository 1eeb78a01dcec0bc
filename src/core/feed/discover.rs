use scraper::{Html, Selector};

use super::fetcher::FetchError;
use super::types::DiscoveredFeed;

const FEED_MIME_TYPES: [&str; 4] = [
    "application/rss+xml",
    "application/atom+xml",
    "application/feed+json",
    "application/json",
];

/// Fetches an HTML page and scans it for `<link rel="alternate">` feed
/// declarations. Pages without any yield an empty list, not an error.
pub async fn discover_feeds(
    client: &reqwest::Client,
    site_url: &str,
) -> Result<Vec<DiscoveredFeed>, FetchError> {
    let response = client.get(site_url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http(status.as_u16()));
    }
    let html = response.text().await?;
    Ok(scan_alternate_links(&html, site_url))
}

fn scan_alternate_links(html: &str, base_url: &str) -> Vec<DiscoveredFeed> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"link[rel="alternate"]"#)
        .expect("static selector must parse");
    let base = url::Url::parse(base_url).ok();

    let mut found = Vec::new();
    for element in document.select(&selector) {
        let mime = element.value().attr("type").unwrap_or_default();
        if !FEED_MIME_TYPES.iter().any(|known| mime.eq_ignore_ascii_case(known)) {
            continue;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => base
                .join(href)
                .map(|joined| joined.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };
        found.push(DiscoveredFeed {
            url: resolved,
            title: element.value().attr("title").map(ToString::to_string),
        });
    }
    found
}
