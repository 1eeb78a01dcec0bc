//! Refresh orchestrator: drives fetch -> dedup -> filter -> persist ->
//! enqueue enrichment -> publish for one feed or a bounded-concurrency
//! batch. One feed's failure is recorded in its own result bucket and
//! never aborts the others.

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::events::{EventBus, HubEvent};
use crate::core::feed::fetcher::{fetch_feed_conditional, FetchError, FetchOutcome};
use crate::core::feed::parser::{identity_key, parse_feed_bytes};
use crate::core::feed::types::ParsedEntry;
use crate::core::filter::{self, ArticleView};
use crate::core::jobs::JobManager;
use crate::core::storage::models::{FeedRecord, JobKind, NewArticle};
use crate::core::storage::repository::{Repository, StorageError};

const READING_WORDS_PER_MINUTE: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("feed {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Set on first subscription so the historical backlog is ingested
    /// regardless of the age threshold.
    pub skip_age_filter: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedRefreshReport {
    pub feed_id: i64,
    pub added: usize,
    pub hidden: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub total_added: usize,
    pub failed: usize,
    pub results: Vec<FeedRefreshReport>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_refresh_interval_secs: i64,
    pub max_concurrent_fetches: usize,
    pub fetch_pause: Duration,
    pub article_max_age_days: i64,
}

#[derive(Clone)]
pub struct RefreshOrchestrator {
    repository: Repository,
    client: reqwest::Client,
    bus: EventBus,
    jobs: JobManager,
    config: OrchestratorConfig,
}

impl RefreshOrchestrator {
    pub fn new(
        repository: Repository,
        client: reqwest::Client,
        bus: EventBus,
        jobs: JobManager,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            repository,
            client,
            bus,
            jobs,
            config,
        }
    }

    /// Refreshes a single feed. Fetch and parse failures are recorded on
    /// the feed's health state and returned inside the report, not as Err;
    /// Err is reserved for unknown feeds and storage faults.
    pub async fn refresh_feed(
        &self,
        feed_id: i64,
        options: RefreshOptions,
    ) -> Result<FeedRefreshReport, RefreshError> {
        let feed = self
            .repository
            .get_feed(feed_id)
            .await?
            .ok_or(RefreshError::NotFound(feed_id))?;

        let fetched = fetch_feed_conditional(
            &self.client,
            &feed.url,
            feed.etag.as_deref(),
            feed.last_modified.as_deref(),
        )
        .await;

        match fetched {
            Ok(FetchOutcome::NotModified) => {
                debug!(feed_id, "feed not modified");
                self.record_success(&feed, feed.etag.as_deref(), feed.last_modified.as_deref())
                    .await?;
                Ok(FeedRefreshReport {
                    feed_id,
                    added: 0,
                    hidden: 0,
                    error: None,
                })
            }
            Ok(FetchOutcome::Fetched(payload)) => {
                let parsed = match parse_feed_bytes(&payload.body) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        return self
                            .record_failure(&feed, &FetchError::Parse(error).to_string())
                            .await;
                    }
                };

                let rules = filter::load_enabled_rules(&self.repository).await?;
                let mut added = 0_usize;
                let mut hidden = 0_usize;
                // Parser order is preserved within one feed.
                for entry in &parsed.entries {
                    if !options.skip_age_filter && self.too_old(entry) {
                        continue;
                    }
                    let candidate = self.build_article(&feed, entry);
                    let Some(stored) = self.repository.insert_article_if_new(&candidate).await?
                    else {
                        continue;
                    };
                    added += 1;

                    let view = ArticleView::from_record(&stored, &feed.title);
                    if rules.iter().any(|(_, expr)| filter::evaluate(expr, &view)) {
                        self.repository.hide_article(stored.id).await?;
                        hidden += 1;
                        continue;
                    }
                    self.enqueue_enrichment(stored.id).await;
                }

                self.record_success(
                    &feed,
                    payload.etag.as_deref(),
                    payload.last_modified.as_deref(),
                )
                .await?;
                if added > 0 {
                    self.bus.publish(HubEvent::ArticlesUpdated {
                        feed_id,
                        count: added,
                    });
                }
                info!(feed_id, added, hidden, "feed refreshed");
                Ok(FeedRefreshReport {
                    feed_id,
                    added,
                    hidden,
                    error: None,
                })
            }
            Err(error) => self.record_failure(&feed, &error.to_string()).await,
        }
    }

    /// Refreshes the given feeds (or all active ones) with a bounded
    /// number of in-flight fetches and a short pause between completions.
    pub async fn refresh_all(
        &self,
        feed_ids: Option<&[i64]>,
        options: RefreshOptions,
    ) -> Result<RefreshSummary, RefreshError> {
        let feeds = match feed_ids {
            Some(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for &id in ids {
                    selected.push(
                        self.repository
                            .get_feed(id)
                            .await?
                            .ok_or(RefreshError::NotFound(id))?,
                    );
                }
                selected
            }
            None => self.repository.list_feeds().await?,
        };

        let mut results = Vec::with_capacity(feeds.len());
        let mut refreshes = stream::iter(feeds)
            .map(|feed| {
                let orchestrator = self.clone();
                async move {
                    let feed_id = feed.id;
                    let result = orchestrator.refresh_feed(feed_id, options).await;
                    (feed_id, result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1));

        while let Some((feed_id, result)) = refreshes.next().await {
            match result {
                Ok(report) => results.push(report),
                // Storage faults are isolated per feed too.
                Err(error) => results.push(FeedRefreshReport {
                    feed_id,
                    added: 0,
                    hidden: 0,
                    error: Some(error.to_string()),
                }),
            }
            if !self.config.fetch_pause.is_zero() {
                tokio::time::sleep(self.config.fetch_pause).await;
            }
        }

        let total_added = results.iter().map(|report| report.added).sum();
        let failed = results
            .iter()
            .filter(|report| report.error.is_some())
            .count();
        self.bus.publish(HubEvent::FeedsRefreshed { total_added, failed });
        Ok(RefreshSummary {
            total_added,
            failed,
            results,
        })
    }

    fn too_old(&self, entry: &ParsedEntry) -> bool {
        let Some(published) = entry.published_at else {
            // Undated items are kept; the dedup key still protects reruns.
            return false;
        };
        let cutoff = Utc::now() - chrono::Duration::days(self.config.article_max_age_days);
        published < cutoff
    }

    fn build_article(&self, feed: &FeedRecord, entry: &ParsedEntry) -> NewArticle {
        NewArticle {
            feed_id: feed.id,
            identity_key: identity_key(entry),
            title: entry.title.clone(),
            link: entry.link.clone(),
            summary: entry.summary.clone(),
            content: entry.content.clone(),
            tags: entry.tags.clone(),
            published_at: entry.published_at.map(|timestamp| timestamp.to_rfc3339()),
            reading_time_mins: reading_time_mins(entry),
        }
    }

    /// Enrichment is best-effort: enqueue failures are logged and the
    /// refresh continues.
    async fn enqueue_enrichment(&self, article_id: i64) {
        if let Err(error) = self.jobs.enqueue(article_id, JobKind::Extraction).await {
            warn!(article_id, %error, "failed to enqueue extraction job");
        }
        if self.jobs.supports_embeddings() {
            if let Err(error) = self.jobs.enqueue(article_id, JobKind::Embedding).await {
                warn!(article_id, %error, "failed to enqueue embedding job");
            }
        }
    }

    async fn record_success(
        &self,
        feed: &FeedRecord,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<(), StorageError> {
        let next_run_at = Utc::now().timestamp() + feed.refresh_interval_secs;
        self.repository
            .record_refresh_success(feed.id, etag, last_modified, next_run_at)
            .await
    }

    async fn record_failure(
        &self,
        feed: &FeedRecord,
        error: &str,
    ) -> Result<FeedRefreshReport, RefreshError> {
        let failures = feed.failure_count + 1;
        let interval = effective_interval_secs(
            feed.refresh_interval_secs,
            failures,
            self.config.max_refresh_interval_secs,
        );
        let next_run_at = Utc::now().timestamp() + interval;
        warn!(feed_id = feed.id, failures, error, "feed refresh failed");
        self.repository
            .record_refresh_failure(feed.id, error, next_run_at)
            .await?;
        Ok(FeedRefreshReport {
            feed_id: feed.id,
            added: 0,
            hidden: 0,
            error: Some(error.to_string()),
        })
    }
}

/// Geometric backoff on consecutive failures, capped at the configured
/// maximum interval. Zero failures yields the configured interval.
pub fn effective_interval_secs(base_secs: i64, failure_count: i64, max_secs: i64) -> i64 {
    let exponent = failure_count.clamp(0, 16) as u32;
    base_secs
        .saturating_mul(1_i64 << exponent)
        .min(max_secs)
        .max(base_secs.min(max_secs))
}

fn reading_time_mins(entry: &ParsedEntry) -> i64 {
    let words = [
        Some(entry.title.as_str()),
        entry.summary.as_deref(),
        entry.content.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(|text| text.split_whitespace().count() as i64)
    .sum::<i64>();
    (words / READING_WORDS_PER_MINUTE).max(1)
}
