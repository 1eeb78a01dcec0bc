use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub refresh_interval_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedRecord {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub site_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub refresh_interval_secs: i64,
    pub failure_count: i64,
    pub last_error: Option<String>,
    pub last_synced_at: Option<String>,
    pub next_run_at: Option<i64>,
    pub position: i64,
    pub is_active: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub feed_id: i64,
    pub identity_key: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    /// Stored as a JSON array string.
    pub tags: Vec<String>,
    pub published_at: Option<String>,
    pub reading_time_mins: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArticleRecord {
    pub id: i64,
    pub feed_id: i64,
    pub identity_key: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub extracted_content: Option<String>,
    pub tags: Option<String>,
    pub published_at: Option<String>,
    pub is_read: i64,
    pub is_hidden: i64,
    pub is_starred: i64,
    pub reading_time_mins: i64,
    pub extraction_status: String,
    pub embedding_status: String,
    pub embedding: Option<String>,
    pub created_at: String,
}

impl ArticleRecord {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Extraction,
    Embedding,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Extraction => "extraction",
            JobKind::Embedding => "embedding",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "extraction" => Some(JobKind::Extraction),
            "embedding" => Some(JobKind::Embedding),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub article_id: i64,
    pub kind: String,
    pub status: String,
    pub attempts: i64,
    pub next_run_at: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    pub fn job_kind(&self) -> Option<JobKind> {
        JobKind::parse(&self.kind)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FilterRuleRecord {
    pub id: i64,
    pub name: String,
    pub expression: String,
    pub enabled: i64,
    pub created_at: String,
}
