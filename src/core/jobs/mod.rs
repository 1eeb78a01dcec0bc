//! Background job manager for enrichment work.
//!
//! Jobs move through `pending -> running -> done | pending(retry) | failed`.
//! The worker loop claims due jobs in bounded batches (the claim itself is
//! an atomic pending->running transition in storage), runs them
//! concurrently, and retries failures with jittered exponential backoff.
//! Stopping only gates new claims; in-flight jobs drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::enrich::Enricher;
use crate::core::events::{EventBus, HubEvent};
use crate::core::storage::models::{JobKind, JobRecord, JobStats};
use crate::core::storage::repository::{Repository, StorageError};

#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    pub max_concurrent_jobs: usize,
    pub max_attempts: i64,
    pub retry_base_secs: u64,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatsSnapshot {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
    pub is_processing: bool,
}

#[derive(Clone)]
pub struct JobManager {
    repository: Repository,
    enricher: Arc<dyn Enricher>,
    bus: EventBus,
    config: JobManagerConfig,
    stop_tx: watch::Sender<bool>,
    processing: Arc<AtomicBool>,
}

impl JobManager {
    pub fn new(
        repository: Repository,
        enricher: Arc<dyn Enricher>,
        bus: EventBus,
        config: JobManagerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            repository,
            enricher,
            bus,
            config,
            stop_tx,
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn supports_embeddings(&self) -> bool {
        self.enricher.supports_embeddings()
    }

    /// Idempotent: a pending/running job for the same (article, kind) is
    /// returned unchanged.
    pub async fn enqueue(
        &self,
        article_id: i64,
        kind: JobKind,
    ) -> Result<JobRecord, StorageError> {
        self.repository
            .enqueue_job(article_id, kind, Utc::now().timestamp())
            .await
    }

    pub async fn stats(&self) -> Result<JobStatsSnapshot, StorageError> {
        let JobStats {
            pending,
            running,
            done,
            failed,
        } = self.repository.job_stats().await?;
        Ok(JobStatsSnapshot {
            pending,
            running,
            done,
            failed,
            is_processing: self.processing.load(Ordering::SeqCst),
        })
    }

    /// Spawns the worker loop. Call [`JobManager::stop`] to stop claiming;
    /// the loop exits after the in-flight batch drains.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            info!(
                max_concurrent = manager.config.max_concurrent_jobs,
                "job worker loop started"
            );
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                if let Err(error) = manager.process_batch(Utc::now().timestamp()).await {
                    warn!(%error, "job batch failed at the storage layer");
                }
                tokio::select! {
                    _ = tokio::time::sleep(manager.config.poll_interval) => {}
                    _ = stop_rx.changed() => {}
                }
            }
            info!("job worker loop stopped");
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Claims and runs one batch of jobs due at `now`. Returns how many
    /// jobs were executed.
    pub async fn process_batch(&self, now: i64) -> Result<usize, StorageError> {
        let claimed = self
            .repository
            .claim_due_jobs(now, self.config.max_concurrent_jobs as i64)
            .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        self.processing.store(true, Ordering::SeqCst);
        let count = claimed.len();
        debug!(count, "claimed job batch");
        let runs = claimed.into_iter().map(|job| self.run_job(job));
        futures::future::join_all(runs).await;
        self.processing.store(false, Ordering::SeqCst);
        Ok(count)
    }

    async fn run_job(&self, job: JobRecord) {
        let outcome = self.execute(&job).await;
        let result = match outcome {
            Ok(()) => self.finish_success(&job).await,
            Err(error) => self.finish_failure(&job, &error).await,
        };
        if let Err(error) = result {
            warn!(job_id = job.id, %error, "failed to persist job outcome");
        }
    }

    async fn execute(&self, job: &JobRecord) -> Result<(), String> {
        let kind = job
            .job_kind()
            .ok_or_else(|| format!("unknown job kind `{}`", job.kind))?;
        let article = self
            .repository
            .get_article(job.article_id)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("article {} no longer exists", job.article_id))?;

        match kind {
            JobKind::Extraction => {
                let text = self
                    .enricher
                    .extract_full_text(&article.link)
                    .await
                    .map_err(|error| error.to_string())?;
                self.repository
                    .set_extraction_result(article.id, &text)
                    .await
                    .map_err(|error| error.to_string())
            }
            JobKind::Embedding => {
                let input = article
                    .extracted_content
                    .as_deref()
                    .or(article.content.as_deref())
                    .or(article.summary.as_deref())
                    .unwrap_or(&article.title);
                let vector = self
                    .enricher
                    .embed(input)
                    .await
                    .map_err(|error| error.to_string())?;
                let encoded = serde_json::to_string(&vector).map_err(|error| error.to_string())?;
                self.repository
                    .set_embedding_result(article.id, &encoded)
                    .await
                    .map_err(|error| error.to_string())
            }
        }
    }

    async fn finish_success(&self, job: &JobRecord) -> Result<(), StorageError> {
        self.repository.complete_job(job.id).await?;
        self.bus.publish(HubEvent::JobCompleted {
            job_id: job.id,
            article_id: job.article_id,
            kind: job.kind.clone(),
        });
        Ok(())
    }

    async fn finish_failure(&self, job: &JobRecord, error: &str) -> Result<(), StorageError> {
        let attempts = job.attempts + 1;
        if attempts < self.config.max_attempts {
            let delay = backoff_delay_secs(self.config.retry_base_secs, attempts);
            let next_run_at = Utc::now().timestamp() + delay as i64;
            debug!(job_id = job.id, attempts, delay, "job retry scheduled");
            return self
                .repository
                .retry_job(job.id, attempts, next_run_at, error)
                .await;
        }

        warn!(job_id = job.id, attempts, %error, "job failed terminally");
        self.repository.fail_job(job.id, attempts, error).await?;
        match job.job_kind() {
            Some(JobKind::Extraction) => {
                self.repository
                    .set_extraction_status(job.article_id, "failed")
                    .await?;
            }
            Some(JobKind::Embedding) => {
                self.repository
                    .set_embedding_status(job.article_id, "failed")
                    .await?;
            }
            None => {}
        }
        self.bus.publish(HubEvent::JobFailed {
            job_id: job.id,
            article_id: job.article_id,
            kind: job.kind.clone(),
            error: error.to_string(),
        });
        Ok(())
    }
}

/// Exponential backoff with up to 30% jitter. The jitter band is narrow
/// enough that the delay between attempt n and n+1 never decreases.
fn backoff_delay_secs(base: u64, attempts: i64) -> u64 {
    let exponent = attempts.clamp(0, 16) as u32;
    let raw = base.saturating_mul(1_u64 << exponent);
    let jitter = rand::thread_rng().gen_range(0.0..0.3);
    (raw as f64 * (1.0 + jitter)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enrich::EnrichError;
    use crate::core::storage::models::{NewArticle, NewFeed};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct MockEnricher {
        extraction_failures: AtomicUsize,
        embed_enabled: bool,
    }

    impl MockEnricher {
        fn reliable() -> Self {
            Self {
                extraction_failures: AtomicUsize::new(0),
                embed_enabled: true,
            }
        }

        fn failing(times: usize) -> Self {
            Self {
                extraction_failures: AtomicUsize::new(times),
                embed_enabled: true,
            }
        }
    }

    #[async_trait]
    impl Enricher for MockEnricher {
        async fn extract_full_text(&self, article_url: &str) -> Result<String, EnrichError> {
            let remaining = self.extraction_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.extraction_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(EnrichError::Http(503));
            }
            Ok(format!("extracted text for {article_url}"))
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EnrichError> {
            if !self.embed_enabled {
                return Err(EnrichError::NotConfigured);
            }
            Ok(vec![0.1, 0.2])
        }

        fn supports_embeddings(&self) -> bool {
            self.embed_enabled
        }
    }

    fn test_config() -> JobManagerConfig {
        JobManagerConfig {
            max_concurrent_jobs: 2,
            max_attempts: 3,
            retry_base_secs: 30,
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn setup(enricher: MockEnricher) -> (JobManager, Repository, i64) {
        let repository = Repository::connect("sqlite::memory:")
            .await
            .expect("connect must succeed");
        let feed = repository
            .upsert_feed(&NewFeed {
                url: "https://jobs.example.com/feed.xml".to_string(),
                title: "Jobs Feed".to_string(),
                site_url: None,
                refresh_interval_secs: 1800,
            })
            .await
            .expect("feed must insert");
        let article = repository
            .insert_article_if_new(&NewArticle {
                feed_id: feed.id,
                identity_key: "guid-1".to_string(),
                title: "Target".to_string(),
                link: "https://jobs.example.com/posts/1".to_string(),
                summary: Some("summary".to_string()),
                content: Some("content".to_string()),
                tags: vec![],
                published_at: None,
                reading_time_mins: 1,
            })
            .await
            .expect("insert must succeed")
            .expect("article must be new");
        let manager = JobManager::new(
            repository.clone(),
            Arc::new(enricher),
            EventBus::new(16),
            test_config(),
        );
        (manager, repository, article.id)
    }

    #[tokio::test]
    async fn successful_extraction_marks_job_done_and_stores_text() {
        let (manager, repository, article_id) = setup(MockEnricher::reliable()).await;
        let job = manager
            .enqueue(article_id, JobKind::Extraction)
            .await
            .expect("enqueue must succeed");
        let mut events = manager.bus.subscribe();

        let processed = manager
            .process_batch(Utc::now().timestamp())
            .await
            .expect("batch must succeed");

        assert_eq!(processed, 1);
        let reloaded = repository
            .get_job(job.id)
            .await
            .expect("get must succeed")
            .expect("job must exist");
        assert_eq!(reloaded.status, "done");
        let article = repository
            .get_article(article_id)
            .await
            .expect("get must succeed")
            .expect("article must exist");
        assert_eq!(article.extraction_status, "done");
        assert!(article
            .extracted_content
            .expect("text must be stored")
            .contains("extracted text"));
        assert!(matches!(
            events.try_recv().expect("event must be published"),
            HubEvent::JobCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn embedding_job_stores_vector_json() {
        let (manager, repository, article_id) = setup(MockEnricher::reliable()).await;
        manager
            .enqueue(article_id, JobKind::Embedding)
            .await
            .expect("enqueue must succeed");

        manager
            .process_batch(Utc::now().timestamp())
            .await
            .expect("batch must succeed");

        let article = repository
            .get_article(article_id)
            .await
            .expect("get must succeed")
            .expect("article must exist");
        assert_eq!(article.embedding_status, "done");
        assert_eq!(article.embedding.as_deref(), Some("[0.1,0.2]"));
    }

    #[tokio::test]
    async fn failed_job_retries_with_growing_delay_then_fails_terminally() {
        let (manager, repository, article_id) = setup(MockEnricher::failing(99)).await;
        let job = manager
            .enqueue(article_id, JobKind::Extraction)
            .await
            .expect("enqueue must succeed");
        let mut events = manager.bus.subscribe();

        let mut delays = Vec::new();
        // Attempts 1 and 2 retry; attempt 3 hits max_attempts and is terminal.
        for _ in 0..2 {
            let before = Utc::now().timestamp();
            manager
                .process_batch(i64::MAX)
                .await
                .expect("batch must succeed");
            let reloaded = repository
                .get_job(job.id)
                .await
                .expect("get must succeed")
                .expect("job must exist");
            assert_eq!(reloaded.status, "pending");
            delays.push(reloaded.next_run_at - before);
        }
        assert!(delays[0] >= 60, "first retry delay was {}", delays[0]);
        assert!(delays[1] >= delays[0]);

        manager
            .process_batch(i64::MAX)
            .await
            .expect("batch must succeed");
        let terminal = repository
            .get_job(job.id)
            .await
            .expect("get must succeed")
            .expect("job must exist");
        assert_eq!(terminal.status, "failed");
        assert_eq!(terminal.attempts, 3);
        assert!(terminal
            .last_error
            .expect("error must be recorded")
            .contains("503"));

        // Terminal jobs are never claimed again.
        let after = manager
            .process_batch(i64::MAX)
            .await
            .expect("batch must succeed");
        assert_eq!(after, 0);

        let mut saw_failed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, HubEvent::JobFailed { .. }) {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn stats_reflect_job_table() {
        let (manager, _repository, article_id) = setup(MockEnricher::reliable()).await;
        manager
            .enqueue(article_id, JobKind::Extraction)
            .await
            .expect("enqueue must succeed");

        let before = manager.stats().await.expect("stats must succeed");
        assert_eq!(before.pending, 1);
        assert!(!before.is_processing);

        manager
            .process_batch(Utc::now().timestamp())
            .await
            .expect("batch must succeed");
        let after = manager.stats().await.expect("stats must succeed");
        assert_eq!(after.done, 1);
        assert_eq!(after.pending, 0);
    }

    #[tokio::test]
    async fn worker_loop_stops_on_signal() {
        let (manager, _repository, _article_id) = setup(MockEnricher::reliable()).await;
        let handle = manager.spawn();
        manager.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop promptly")
            .expect("loop task must not panic");
    }

    #[test]
    fn backoff_delay_is_non_decreasing_across_attempts() {
        for attempt in 0..6 {
            let shorter = backoff_delay_secs(30, attempt);
            let longer = backoff_delay_secs(30, attempt + 1);
            assert!(longer >= shorter, "attempt {attempt}: {longer} < {shorter}");
        }
    }
}
