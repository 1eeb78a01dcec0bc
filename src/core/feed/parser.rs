use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;

use super::types::{FeedFormat, ParsedEntry, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    title: Option<String>,
    home_page_url: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
    date_published: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub fn parse_feed_bytes(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let trimmed = trim_leading_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    if trimmed[0] == b'{' {
        return parse_json_feed(trimmed);
    }
    parse_xml_feed(trimmed)
}

/// Duplicate-detection key within a feed: the item GUID when the feed
/// provides one, else a normalized form of the item URL.
pub fn identity_key(entry: &ParsedEntry) -> String {
    let id = entry.id.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    let link = entry.link.trim();
    if !link.is_empty() {
        return normalize_link(link);
    }
    format!(
        "{}::{}",
        entry.title.trim(),
        entry
            .published_at
            .map(|timestamp| timestamp.to_rfc3339())
            .unwrap_or_default()
    )
}

/// Lowercases scheme and host, drops the fragment and any trailing slash,
/// so trivially different spellings of the same URL dedup together.
pub fn normalize_link(link: &str) -> String {
    match url::Url::parse(link.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut text = parsed.to_string();
            while text.ends_with('/') {
                text.pop();
            }
            text
        }
        Err(_) => link.trim().trim_end_matches('/').to_string(),
    }
}

fn parse_xml_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed = feed_rs::parser::parse(raw)?;
    let title = feed
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let site_url = feed.links.first().map(|link| link.href.clone());
    let entries = feed.entries.iter().map(entry_from_xml).collect();

    Ok(ParsedFeed {
        format: FeedFormat::XmlFeed,
        title,
        site_url,
        entries,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    let title = feed.title.unwrap_or_else(|| "Untitled Feed".to_string());
    let entries = feed
        .items
        .into_iter()
        .map(|item| ParsedEntry {
            id: item.id.clone().unwrap_or_default(),
            title: item.title.unwrap_or_else(|| "Untitled Entry".to_string()),
            link: item.url.unwrap_or_default(),
            summary: item.summary,
            content: item.content_html.or(item.content_text),
            tags: item.tags,
            published_at: item
                .date_published
                .as_deref()
                .and_then(parse_json_timestamp),
        })
        .collect();

    Ok(ParsedFeed {
        format: FeedFormat::JsonFeed,
        title,
        site_url: feed.home_page_url,
        entries,
    })
}

fn parse_json_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn entry_from_xml(entry: &Entry) -> ParsedEntry {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Entry".to_string());
    let link = entry
        .links
        .first()
        .map(|entry_link| entry_link.href.clone())
        .unwrap_or_default();
    let summary = entry.summary.as_ref().map(|text| text.content.clone());
    let content = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone());
    let tags = entry
        .categories
        .iter()
        .map(|category| {
            category
                .label
                .clone()
                .unwrap_or_else(|| category.term.clone())
        })
        .collect();
    let published_at = entry.published.or(entry.updated);

    ParsedEntry {
        id: entry.id.clone(),
        title,
        link,
        summary,
        content,
        tags,
        published_at,
    }
}

fn trim_leading_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let mut index = 0;
    while index < raw.len() && raw[index].is_ascii_whitespace() {
        index += 1;
    }
    &raw[index..]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Sample Feed</title>
    <link>https://sample.example.com</link>
    <item>
      <guid>sample-1</guid>
      <title>Hello world</title>
      <link>https://sample.example.com/posts/1</link>
      <category>rust</category>
      <pubDate>Tue, 24 Feb 2026 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const SAMPLE_JSON: &str = r#"{
  "version": "https://jsonfeed.org/version/1.1",
  "title": "Sample JSON Feed",
  "home_page_url": "https://sample.example.com",
  "items": [
    {"id": "json-1", "title": "First entry", "url": "https://sample.example.com/a",
     "date_published": "2026-02-24T00:00:00Z", "tags": ["news"]},
    {"title": "Second entry", "url": "https://sample.example.com/b/"}
  ]
}"#;

    #[test]
    fn parses_xml_feed_with_tags() {
        let parsed = parse_feed_bytes(SAMPLE_RSS.as_bytes()).expect("xml must parse");
        assert_eq!(parsed.format, FeedFormat::XmlFeed);
        assert_eq!(parsed.title, "Sample Feed");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].tags, vec!["rust".to_string()]);
        assert!(parsed.entries[0].published_at.is_some());
    }

    #[test]
    fn parses_json_feed() {
        let parsed = parse_feed_bytes(SAMPLE_JSON.as_bytes()).expect("json must parse");
        assert_eq!(parsed.format, FeedFormat::JsonFeed);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].title, "First entry");
        assert_eq!(parsed.entries[0].tags, vec!["news".to_string()]);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(
            parse_feed_bytes(b"   \n"),
            Err(FeedParseError::EmptyPayload)
        ));
    }

    #[test]
    fn identity_key_prefers_guid() {
        let parsed = parse_feed_bytes(SAMPLE_RSS.as_bytes()).expect("xml must parse");
        assert_eq!(identity_key(&parsed.entries[0]), "sample-1");
    }

    #[test]
    fn identity_key_falls_back_to_normalized_link() {
        let parsed = parse_feed_bytes(SAMPLE_JSON.as_bytes()).expect("json must parse");
        let second = &parsed.entries[1];
        assert!(second.id.is_empty());
        assert_eq!(identity_key(second), "https://sample.example.com/b");
    }

    #[test]
    fn normalize_link_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_link("HTTPS://Example.COM/Posts/1/#comments"),
            "https://example.com/Posts/1"
        );
    }
}
