use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, AppContext};
use crate::core::feed::discover::discover_feeds;
use crate::core::feed::fetcher::fetch_feed;
use crate::core::feed::types::ParsedFeed;
use crate::core::filter;
use crate::core::refresh::{FeedRefreshReport, RefreshOptions, RefreshSummary};
use crate::core::storage::models::{
    ArticleRecord, FeedRecord, FilterRuleRecord, JobKind, JobRecord, NewFeed,
};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub feed: FeedRecord,
    pub initial_refresh: FeedRefreshReport,
}

/// Subscribe to a feed URL. When the URL is a plain website rather than a
/// feed document, alternate-feed discovery picks the first advertised
/// feed. The initial refresh ingests the backlog regardless of age.
pub async fn subscribe_feed(
    State(context): State<AppContext>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let url = request.url.trim().to_string();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".to_string()));
    }

    let (feed_url, parsed) = resolve_feed(&context, &url).await?;
    let title = request
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| parsed.title.clone());

    let feed = context
        .repository
        .upsert_feed(&NewFeed {
            url: feed_url,
            title,
            site_url: parsed.site_url.clone(),
            refresh_interval_secs: context.config.refresh_interval_secs as i64,
        })
        .await?;
    info!(feed_id = feed.id, url = %feed.url, "subscribed to feed");

    let initial_refresh = context
        .orchestrator
        .refresh_feed(feed.id, RefreshOptions { skip_age_filter: true })
        .await?;

    Ok(Json(SubscribeResponse {
        feed,
        initial_refresh,
    }))
}

async fn resolve_feed(
    context: &AppContext,
    url: &str,
) -> Result<(String, ParsedFeed), ApiError> {
    match fetch_feed(&context.client, url).await {
        Ok(parsed) => Ok((url.to_string(), parsed)),
        Err(feed_error) => {
            // Not a feed document; maybe a site that advertises one.
            let discovered = discover_feeds(&context.client, url)
                .await
                .map_err(|_| bad_subscription(url, &feed_error))?;
            let first = discovered
                .into_iter()
                .next()
                .ok_or_else(|| bad_subscription(url, &feed_error))?;
            let parsed = fetch_feed(&context.client, &first.url)
                .await
                .map_err(|error| bad_subscription(&first.url, &error))?;
            Ok((first.url, parsed))
        }
    }
}

fn bad_subscription(url: &str, error: &dyn std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("no usable feed at {url}: {error}"))
}

pub async fn list_feeds(
    State(context): State<AppContext>,
) -> Result<Json<Vec<FeedRecord>>, ApiError> {
    Ok(Json(context.repository.list_feeds().await?))
}

pub async fn remove_feed(
    State(context): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = context.repository.deactivate_feed(id).await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!("feed {id} not found")));
    }
    Ok(Json(serde_json::json!({ "removed": id })))
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    pub feed_ids: Option<Vec<i64>>,
}

/// Always 200: per-feed outcomes live in the structured summary.
pub async fn trigger_refresh(
    State(context): State<AppContext>,
    request: Option<Json<RefreshRequest>>,
) -> Result<Json<RefreshSummary>, ApiError> {
    let feed_ids = request.and_then(|Json(body)| body.feed_ids);
    let summary = context
        .orchestrator
        .refresh_all(feed_ids.as_deref(), RefreshOptions::default())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListArticlesQuery {
    pub feed_id: Option<i64>,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

pub async fn list_articles(
    State(context): State<AppContext>,
    Query(query): Query<ListArticlesQuery>,
) -> Result<Json<Vec<ArticleRecord>>, ApiError> {
    let rows = context
        .repository
        .list_articles(query.feed_id, query.unread_only, query.limit.unwrap_or(300))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ReadToggleRequest {
    pub is_read: bool,
}

pub async fn mark_read(
    State(context): State<AppContext>,
    Path(id): Path<i64>,
    Json(request): Json<ReadToggleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = context
        .repository
        .mark_article_read(id, request.is_read)
        .await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!("article {id} not found")));
    }
    Ok(Json(serde_json::json!({ "id": id, "is_read": request.is_read })))
}

#[derive(Debug, Deserialize)]
pub struct StarToggleRequest {
    pub is_starred: bool,
}

pub async fn mark_starred(
    State(context): State<AppContext>,
    Path(id): Path<i64>,
    Json(request): Json<StarToggleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let affected = context
        .repository
        .mark_article_starred(id, request.is_starred)
        .await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!("article {id} not found")));
    }
    Ok(Json(
        serde_json::json!({ "id": id, "is_starred": request.is_starred }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub article_id: i64,
    pub kind: String,
}

pub async fn enqueue_job(
    State(context): State<AppContext>,
    Json(request): Json<EnqueueJobRequest>,
) -> Result<Json<JobRecord>, ApiError> {
    let kind = JobKind::parse(&request.kind).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown job kind `{}`, expected extraction or embedding",
            request.kind
        ))
    })?;
    context
        .repository
        .get_article(request.article_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("article {} not found", request.article_id)))?;
    let job = context.jobs.enqueue(request.article_id, kind).await?;
    Ok(Json(job))
}

pub async fn retry_job(
    State(context): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<JobRecord>, ApiError> {
    context
        .repository
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let affected = context
        .repository
        .reenqueue_job(id, chrono::Utc::now().timestamp())
        .await?;
    if affected == 0 {
        return Err(ApiError::BadRequest(format!(
            "job {id} is not in a terminal state"
        )));
    }
    let job = context
        .repository
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job))
}

pub async fn job_stats(
    State(context): State<AppContext>,
) -> Result<Json<crate::core::jobs::JobStatsSnapshot>, ApiError> {
    Ok(Json(context.jobs.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub expression: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Rejects malformed expressions before anything is persisted.
pub async fn create_rule(
    State(context): State<AppContext>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<FilterRuleRecord>, ApiError> {
    filter::parse_rule(&request.expression)
        .map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let rule = context
        .repository
        .create_rule(&request.name, &request.expression, request.enabled)
        .await?;
    Ok(Json(rule))
}

pub async fn list_rules(
    State(context): State<AppContext>,
) -> Result<Json<Vec<FilterRuleRecord>>, ApiError> {
    Ok(Json(context.repository.list_rules(false).await?))
}

#[derive(Debug, Deserialize)]
pub struct PreviewRuleRequest {
    pub expression: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PreviewRuleResponse {
    pub matching: usize,
    pub recent: Vec<ArticleRecord>,
}

/// Dry-run a rule against the stored corpus before activating it.
pub async fn preview_rule(
    State(context): State<AppContext>,
    Json(request): Json<PreviewRuleRequest>,
) -> Result<Json<PreviewRuleResponse>, ApiError> {
    let expr = filter::parse_rule(&request.expression)
        .map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let matching = filter::count_matching(&context.repository, &expr, 1000).await?;
    let recent =
        filter::recent_matching(&context.repository, &expr, request.limit.unwrap_or(10)).await?;
    Ok(Json(PreviewRuleResponse { matching, recent }))
}
