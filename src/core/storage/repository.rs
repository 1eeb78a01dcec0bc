use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use super::models::{
    ArticleRecord, FeedRecord, FilterRuleRecord, JobKind, JobRecord, JobStats, NewArticle,
    NewFeed,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

const FEED_COLUMNS: &str = "id, url, title, site_url, etag, last_modified, refresh_interval_secs, \
     failure_count, last_error, last_synced_at, next_run_at, position, is_active, created_at, updated_at";

const ARTICLE_COLUMNS: &str = "id, feed_id, identity_key, title, link, summary, content, \
     extracted_content, tags, published_at, is_read, is_hidden, is_starred, reading_time_mins, \
     extraction_status, embedding_status, embedding, created_at";

const JOB_COLUMNS: &str =
    "id, article_id, kind, status, attempts, next_run_at, last_error, created_at, updated_at";

/// Persistence gateway over SQLite. The single connection serializes all
/// writes, which together with the unique constraints below makes article
/// insert and job claim atomic mutual-exclusion points.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    // ---- feeds ----

    pub async fn upsert_feed(&self, feed: &NewFeed) -> Result<FeedRecord, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, title, site_url, refresh_interval_secs)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(url) DO UPDATE SET
              title = excluded.title,
              site_url = excluded.site_url,
              is_active = 1,
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.site_url)
        .bind(feed.refresh_interval_secs)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?1"
        ))
        .bind(&feed.url)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE is_active = 1 ORDER BY position, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<FeedRecord>, StorageError> {
        let row = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Soft removal: articles keep referencing the feed row.
    pub async fn deactivate_feed(&self, id: i64) -> Result<u64, StorageError> {
        let affected = sqlx::query(
            "UPDATE feeds SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Feeds whose persisted next-run timestamp has elapsed. A NULL
    /// timestamp means the feed has never been scheduled and is due now.
    pub async fn due_feeds(&self, now: i64) -> Result<Vec<FeedRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FeedRecord>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE is_active = 1 AND (next_run_at IS NULL OR next_run_at <= ?1) \
             ORDER BY position, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn record_refresh_success(
        &self,
        feed_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
        next_run_at: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET etag = ?1,
                last_modified = ?2,
                last_synced_at = CURRENT_TIMESTAMP,
                failure_count = 0,
                last_error = NULL,
                next_run_at = ?3,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?4
            "#,
        )
        .bind(etag)
        .bind(last_modified)
        .bind(next_run_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_refresh_failure(
        &self,
        feed_id: i64,
        error: &str,
        next_run_at: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds
            SET failure_count = failure_count + 1,
                last_error = ?1,
                next_run_at = ?2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?3
            "#,
        )
        .bind(error)
        .bind(next_run_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- articles ----

    /// Atomic insert-if-absent on (feed_id, identity_key). Returns the
    /// stored row for a fresh insert and None when the article already
    /// existed; an existing row is never overwritten.
    pub async fn insert_article_if_new(
        &self,
        article: &NewArticle,
    ) -> Result<Option<ArticleRecord>, StorageError> {
        let tags = serde_json::to_string(&article.tags).unwrap_or_else(|_| "[]".to_string());
        let inserted = sqlx::query(
            r#"
            INSERT INTO articles
              (feed_id, identity_key, title, link, summary, content, tags, published_at, reading_time_mins)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(feed_id, identity_key) DO NOTHING
            "#,
        )
        .bind(article.feed_id)
        .bind(&article.identity_key)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.summary)
        .bind(&article.content)
        .bind(tags)
        .bind(&article.published_at)
        .bind(article.reading_time_mins)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, ArticleRecord>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE feed_id = ?1 AND identity_key = ?2"
        ))
        .bind(article.feed_id)
        .bind(&article.identity_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(row))
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<ArticleRecord>, StorageError> {
        let row = sqlx::query_as::<_, ArticleRecord>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_articles(
        &self,
        feed_id: Option<i64>,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<ArticleRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ArticleRecord>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS} FROM articles
            WHERE (?1 IS NULL OR feed_id = ?1)
              AND (?2 = 0 OR is_read = 0)
              AND is_hidden = 0
            ORDER BY COALESCE(published_at, created_at) DESC
            LIMIT ?3
            "#
        ))
        .bind(feed_id)
        .bind(i64::from(unread_only))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent articles regardless of read/hidden state, for filter
    /// rule previews over the existing corpus.
    pub async fn recent_articles(&self, limit: i64) -> Result<Vec<ArticleRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ArticleRecord>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn mark_article_read(
        &self,
        article_id: i64,
        is_read: bool,
    ) -> Result<u64, StorageError> {
        let affected = sqlx::query("UPDATE articles SET is_read = ?1 WHERE id = ?2")
            .bind(i64::from(is_read))
            .bind(article_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    pub async fn mark_article_starred(
        &self,
        article_id: i64,
        is_starred: bool,
    ) -> Result<u64, StorageError> {
        let affected = sqlx::query("UPDATE articles SET is_starred = ?1 WHERE id = ?2")
            .bind(i64::from(is_starred))
            .bind(article_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    /// Filter-rule outcome: the article stays stored but is pre-read and
    /// hidden from listings. Filters never delete data.
    pub async fn hide_article(&self, article_id: i64) -> Result<u64, StorageError> {
        let affected =
            sqlx::query("UPDATE articles SET is_read = 1, is_hidden = 1 WHERE id = ?1")
                .bind(article_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected)
    }

    pub async fn set_extraction_result(
        &self,
        article_id: i64,
        extracted: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE articles SET extracted_content = ?1, extraction_status = 'done' WHERE id = ?2",
        )
        .bind(extracted)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_extraction_status(
        &self,
        article_id: i64,
        status: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE articles SET extraction_status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_embedding_result(
        &self,
        article_id: i64,
        embedding_json: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE articles SET embedding = ?1, embedding_status = 'done' WHERE id = ?2",
        )
        .bind(embedding_json)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_embedding_status(
        &self,
        article_id: i64,
        status: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE articles SET embedding_status = ?1 WHERE id = ?2")
            .bind(status)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- jobs ----

    /// Idempotent enqueue: an existing pending/running job for the same
    /// (article, kind) is returned as-is. Terminal jobs do not block a
    /// fresh enqueue. The partial unique index on active jobs makes the
    /// insert the mutual-exclusion point, so concurrent enqueues for the
    /// same work collapse into one row.
    pub async fn enqueue_job(
        &self,
        article_id: i64,
        kind: JobKind,
        now: i64,
    ) -> Result<JobRecord, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (article_id, kind, status, attempts, next_run_at)
            VALUES (?1, ?2, 'pending', 0, ?3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(article_id)
        .bind(kind.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = self
            .active_job(article_id, kind)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(record)
    }

    async fn active_job(
        &self,
        article_id: i64,
        kind: JobKind,
    ) -> Result<Option<JobRecord>, StorageError> {
        let row = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE article_id = ?1 AND kind = ?2 AND status IN ('pending', 'running') \
             ORDER BY id LIMIT 1"
        ))
        .bind(article_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<JobRecord>, StorageError> {
        let row = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Explicit re-enqueue of a terminal job: resets the attempt count and
    /// returns the job to pending.
    pub async fn reenqueue_job(&self, job_id: i64, now: i64) -> Result<u64, StorageError> {
        let affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = 0, next_run_at = ?1, last_error = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2 AND status IN ('done', 'failed')
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Atomic pending→running transition for all due jobs, bounded by
    /// `limit`. Two concurrent claim calls can never return the same job.
    pub async fn claim_due_jobs(
        &self,
        now: i64,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StorageError> {
        let rows = sqlx::query_as::<_, JobRecord>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = CURRENT_TIMESTAMP
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending' AND next_run_at <= ?1
                ORDER BY next_run_at, id
                LIMIT ?2
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn complete_job(&self, job_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE jobs SET status = 'done', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn retry_job(
        &self,
        job_id: i64,
        attempts: i64,
        next_run_at: i64,
        error: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = ?1, next_run_at = ?2, last_error = ?3,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?4
            "#,
        )
        .bind(attempts)
        .bind(next_run_at)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_job(
        &self,
        job_id: i64,
        attempts: i64,
        error: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', attempts = ?1, last_error = ?2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?3
            "#,
        )
        .bind(attempts)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Point-in-time snapshot from one aggregate query; never locks the
    /// job table against the worker loop.
    pub async fn job_stats(&self) -> Result<JobStats, StorageError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = JobStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => stats.pending = count,
                "running" => stats.running = count,
                "done" => stats.done = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Feed display titles keyed by id, inactive feeds included; used to
    /// evaluate `feed` predicates over the stored corpus.
    pub async fn feed_titles(&self) -> Result<std::collections::HashMap<i64, String>, StorageError> {
        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, title FROM feeds")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    // ---- filter rules ----

    pub async fn create_rule(
        &self,
        name: &str,
        expression: &str,
        enabled: bool,
    ) -> Result<FilterRuleRecord, StorageError> {
        let id = sqlx::query("INSERT INTO filter_rules (name, expression, enabled) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(expression)
            .bind(i64::from(enabled))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        let row = sqlx::query_as::<_, FilterRuleRecord>(
            "SELECT id, name, expression, enabled, created_at FROM filter_rules WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_rules(&self, enabled_only: bool) -> Result<Vec<FilterRuleRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FilterRuleRecord>(
            r#"
            SELECT id, name, expression, enabled, created_at
            FROM filter_rules
            WHERE (?1 = 0 OR enabled = 1)
            ORDER BY id
            "#,
        )
        .bind(i64::from(enabled_only))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_repository() -> Repository {
        Repository::connect("sqlite::memory:")
            .await
            .expect("connect must succeed")
    }

    fn make_feed(url: &str) -> NewFeed {
        NewFeed {
            url: url.to_string(),
            title: "Test Feed".to_string(),
            site_url: Some("https://example.com".to_string()),
            refresh_interval_secs: 1800,
        }
    }

    fn make_article(feed_id: i64, key: &str) -> NewArticle {
        NewArticle {
            feed_id,
            identity_key: key.to_string(),
            title: format!("Article {key}"),
            link: format!("https://example.com/posts/{key}"),
            summary: Some("summary".to_string()),
            content: Some("content".to_string()),
            tags: vec!["tech".to_string()],
            published_at: Some("2026-02-24T00:00:00+00:00".to_string()),
            reading_time_mins: 1,
        }
    }

    #[tokio::test]
    async fn upsert_feed_is_idempotent_for_same_url() {
        let repository = memory_repository().await;
        let first = repository
            .upsert_feed(&make_feed("https://a.example.com/feed.xml"))
            .await
            .expect("first upsert must succeed");
        let second = repository
            .upsert_feed(&make_feed("https://a.example.com/feed.xml"))
            .await
            .expect("second upsert must succeed");
        let all = repository.list_feeds().await.expect("list must succeed");

        assert_eq!(first.id, second.id);
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn article_insert_skips_duplicates_and_freezes_first_version() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://b.example.com/feed.xml"))
            .await
            .expect("feed must insert");

        let inserted = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed");
        assert!(inserted.is_some());

        let mut republished = make_article(feed.id, "guid-1");
        republished.title = "Edited title".to_string();
        let duplicate = repository
            .insert_article_if_new(&republished)
            .await
            .expect("duplicate insert must not error");
        assert!(duplicate.is_none());

        let stored = repository
            .list_articles(Some(feed.id), false, 10)
            .await
            .expect("list must succeed");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Article guid-1");
        assert_eq!(stored[0].tag_list(), vec!["tech".to_string()]);
    }

    #[tokio::test]
    async fn hidden_articles_are_excluded_from_listing() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://c.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed")
            .expect("article must be new");

        repository
            .hide_article(article.id)
            .await
            .expect("hide must succeed");
        let visible = repository
            .list_articles(Some(feed.id), false, 10)
            .await
            .expect("list must succeed");
        let scanned = repository
            .recent_articles(10)
            .await
            .expect("scan must succeed");

        assert!(visible.is_empty());
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].is_read, 1);
        assert_eq!(scanned[0].is_hidden, 1);
    }

    #[tokio::test]
    async fn enqueue_job_returns_existing_non_terminal_job() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://d.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed")
            .expect("article must be new");

        let first = repository
            .enqueue_job(article.id, JobKind::Extraction, 100)
            .await
            .expect("first enqueue must succeed");
        let second = repository
            .enqueue_job(article.id, JobKind::Extraction, 200)
            .await
            .expect("second enqueue must succeed");
        let other_kind = repository
            .enqueue_job(article.id, JobKind::Embedding, 100)
            .await
            .expect("other kind must enqueue");

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other_kind.id);
        let stats = repository.job_stats().await.expect("stats must succeed");
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test]
    async fn concurrent_enqueues_collapse_into_one_job() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://j.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed")
            .expect("article must be new");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let repository = repository.clone();
            let article_id = article.id;
            tasks.push(tokio::spawn(async move {
                repository
                    .enqueue_job(article_id, JobKind::Extraction, 0)
                    .await
            }));
        }
        let mut job_ids = Vec::new();
        for task in tasks {
            let job = task
                .await
                .expect("task must not panic")
                .expect("enqueue must succeed");
            job_ids.push(job.id);
        }

        assert!(job_ids.iter().all(|&id| id == job_ids[0]));
        let stats = repository.job_stats().await.expect("stats must succeed");
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn claim_due_jobs_is_bounded_and_exclusive() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://e.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        for index in 0..3 {
            let article = repository
                .insert_article_if_new(&make_article(feed.id, &format!("guid-{index}")))
                .await
                .expect("insert must succeed")
                .expect("article must be new");
            repository
                .enqueue_job(article.id, JobKind::Extraction, 0)
                .await
                .expect("enqueue must succeed");
        }

        let first_claim = repository
            .claim_due_jobs(100, 2)
            .await
            .expect("claim must succeed");
        let second_claim = repository
            .claim_due_jobs(100, 2)
            .await
            .expect("claim must succeed");

        assert_eq!(first_claim.len(), 2);
        assert_eq!(second_claim.len(), 1);
        let first_ids: Vec<i64> = first_claim.iter().map(|job| job.id).collect();
        assert!(second_claim.iter().all(|job| !first_ids.contains(&job.id)));
    }

    #[tokio::test]
    async fn future_jobs_are_not_claimed_until_due() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://f.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed")
            .expect("article must be new");
        let job = repository
            .enqueue_job(article.id, JobKind::Embedding, 0)
            .await
            .expect("enqueue must succeed");
        repository
            .retry_job(job.id, 1, 1000, "provider timeout")
            .await
            .expect("retry must succeed");

        let before_due = repository
            .claim_due_jobs(999, 10)
            .await
            .expect("claim must succeed");
        let at_due = repository
            .claim_due_jobs(1000, 10)
            .await
            .expect("claim must succeed");

        assert!(before_due.is_empty());
        assert_eq!(at_due.len(), 1);
        assert_eq!(at_due[0].attempts, 1);
    }

    #[tokio::test]
    async fn reenqueue_resets_terminal_job() {
        let repository = memory_repository().await;
        let feed = repository
            .upsert_feed(&make_feed("https://g.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&make_article(feed.id, "guid-1"))
            .await
            .expect("insert must succeed")
            .expect("article must be new");
        let job = repository
            .enqueue_job(article.id, JobKind::Extraction, 0)
            .await
            .expect("enqueue must succeed");
        repository
            .fail_job(job.id, 3, "gave up")
            .await
            .expect("fail must succeed");

        let pending_again = repository
            .reenqueue_job(job.id, 500)
            .await
            .expect("reenqueue must succeed");
        let reloaded = repository
            .get_job(job.id)
            .await
            .expect("get must succeed")
            .expect("job must exist");

        assert_eq!(pending_again, 1);
        assert_eq!(reloaded.status, "pending");
        assert_eq!(reloaded.attempts, 0);
        assert_eq!(reloaded.next_run_at, 500);
    }

    #[tokio::test]
    async fn due_feeds_honors_persisted_next_run() {
        let repository = memory_repository().await;
        let due_never_scheduled = repository
            .upsert_feed(&make_feed("https://h.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        let scheduled = repository
            .upsert_feed(&make_feed("https://i.example.com/feed.xml"))
            .await
            .expect("feed must insert");
        repository
            .record_refresh_success(scheduled.id, None, None, 5000)
            .await
            .expect("update must succeed");

        let due_early = repository.due_feeds(4999).await.expect("due must succeed");
        let due_late = repository.due_feeds(5000).await.expect("due must succeed");

        assert_eq!(due_early.len(), 1);
        assert_eq!(due_early[0].id, due_never_scheduled.id);
        assert_eq!(due_late.len(), 2);
    }

    #[tokio::test]
    async fn rule_crud_round_trip() {
        let repository = memory_repository().await;
        repository
            .create_rule("hide ads", r#"title contains "ad""#, true)
            .await
            .expect("create must succeed");
        repository
            .create_rule("disabled rule", r#"title contains "x""#, false)
            .await
            .expect("create must succeed");

        let all = repository.list_rules(false).await.expect("list must succeed");
        let enabled = repository.list_rules(true).await.expect("list must succeed");

        assert_eq!(all.len(), 2);
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "hide ads");
    }
}
