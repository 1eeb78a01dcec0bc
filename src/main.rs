use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedhub::api::{create_router, AppContext};
use feedhub::config::AppConfig;
use feedhub::core::enrich::HttpEnricher;
use feedhub::core::events::EventBus;
use feedhub::core::jobs::{JobManager, JobManagerConfig};
use feedhub::core::refresh::{OrchestratorConfig, RefreshOrchestrator};
use feedhub::core::scheduler::{Scheduler, SchedulerConfig};
use feedhub::core::storage::repository::Repository;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedhub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env());
    info!(port = config.port, "starting feedhub");

    let repository = Repository::connect(&config.database_url).await?;
    let bus = EventBus::default();
    let client = feedhub::core::feed::fetcher::build_client(
        config.fetch_timeout(),
        &AppConfig::user_agent(),
    )?;

    let jobs = JobManager::new(
        repository.clone(),
        Arc::new(HttpEnricher::new(client.clone(), config.embeddings.clone())),
        bus.clone(),
        JobManagerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            max_attempts: config.max_job_attempts,
            retry_base_secs: config.job_retry_base_secs,
            poll_interval: Duration::from_secs(config.job_poll_secs),
        },
    );
    let orchestrator = RefreshOrchestrator::new(
        repository.clone(),
        client.clone(),
        bus.clone(),
        jobs.clone(),
        OrchestratorConfig {
            max_refresh_interval_secs: config.max_refresh_interval_secs as i64,
            max_concurrent_fetches: config.max_concurrent_fetches,
            fetch_pause: Duration::from_millis(config.fetch_pause_ms),
            article_max_age_days: config.article_max_age_days,
        },
    );
    let scheduler = Scheduler::new(
        repository.clone(),
        orchestrator.clone(),
        SchedulerConfig {
            grace: Duration::from_secs(config.scheduler_grace_secs),
            tick: Duration::from_secs(config.scheduler_tick_secs),
        },
    );

    let job_worker = jobs.spawn();
    let scheduler_task = scheduler.spawn();

    let context = AppContext {
        repository,
        bus,
        jobs: jobs.clone(),
        orchestrator,
        client,
        config: config.clone(),
    };
    let app = create_router(context);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop claiming new work; running jobs drain before the tasks exit.
    info!("shutting down");
    scheduler.stop();
    jobs.stop();
    let _ = scheduler_task.await;
    let _ = job_worker.await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
