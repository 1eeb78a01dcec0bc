use std::time::Duration;

/// Runtime configuration, resolved once at startup from `FEEDHUB_*`
/// environment variables (a `.env.local` file is honored when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub refresh_interval_secs: u64,
    pub max_refresh_interval_secs: u64,
    pub max_concurrent_fetches: usize,
    pub fetch_pause_ms: u64,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
    pub max_job_attempts: i64,
    pub job_retry_base_secs: u64,
    pub job_poll_secs: u64,
    pub article_max_age_days: i64,
    pub scheduler_tick_secs: u64,
    pub scheduler_grace_secs: u64,
    pub embeddings: Option<EmbeddingsConfig>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://feedhub.db?mode=rwc".to_string(),
            port: 7300,
            refresh_interval_secs: 1800,
            max_refresh_interval_secs: 86_400,
            max_concurrent_fetches: 4,
            fetch_pause_ms: 250,
            fetch_timeout_secs: 20,
            max_concurrent_jobs: 2,
            max_job_attempts: 3,
            job_retry_base_secs: 30,
            job_poll_secs: 5,
            article_max_age_days: 30,
            scheduler_tick_secs: 60,
            scheduler_grace_secs: 10,
            embeddings: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_string("FEEDHUB_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            port: env_parsed("FEEDHUB_PORT").unwrap_or(defaults.port),
            refresh_interval_secs: env_parsed("FEEDHUB_REFRESH_INTERVAL_SECS")
                .unwrap_or(defaults.refresh_interval_secs),
            max_refresh_interval_secs: env_parsed("FEEDHUB_MAX_REFRESH_INTERVAL_SECS")
                .unwrap_or(defaults.max_refresh_interval_secs),
            max_concurrent_fetches: env_parsed("FEEDHUB_MAX_CONCURRENT_FETCHES")
                .unwrap_or(defaults.max_concurrent_fetches),
            fetch_pause_ms: env_parsed("FEEDHUB_FETCH_PAUSE_MS")
                .unwrap_or(defaults.fetch_pause_ms),
            fetch_timeout_secs: env_parsed("FEEDHUB_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch_timeout_secs),
            max_concurrent_jobs: env_parsed("FEEDHUB_MAX_CONCURRENT_JOBS")
                .unwrap_or(defaults.max_concurrent_jobs),
            max_job_attempts: env_parsed("FEEDHUB_MAX_JOB_ATTEMPTS")
                .unwrap_or(defaults.max_job_attempts),
            job_retry_base_secs: env_parsed("FEEDHUB_JOB_RETRY_BASE_SECS")
                .unwrap_or(defaults.job_retry_base_secs),
            job_poll_secs: env_parsed("FEEDHUB_JOB_POLL_SECS")
                .unwrap_or(defaults.job_poll_secs),
            article_max_age_days: env_parsed("FEEDHUB_ARTICLE_MAX_AGE_DAYS")
                .unwrap_or(defaults.article_max_age_days),
            scheduler_tick_secs: env_parsed("FEEDHUB_SCHEDULER_TICK_SECS")
                .unwrap_or(defaults.scheduler_tick_secs),
            scheduler_grace_secs: env_parsed("FEEDHUB_SCHEDULER_GRACE_SECS")
                .unwrap_or(defaults.scheduler_grace_secs),
            embeddings: embeddings_from_env(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn user_agent() -> String {
        format!("feedhub/{}", env!("CARGO_PKG_VERSION"))
    }
}

fn embeddings_from_env() -> Option<EmbeddingsConfig> {
    let base_url = env_string("FEEDHUB_EMBEDDINGS_BASE_URL")?;
    let api_key = env_string("FEEDHUB_EMBEDDINGS_API_KEY")?;
    let model = env_string("FEEDHUB_EMBEDDINGS_MODEL")?;
    Some(EmbeddingsConfig {
        base_url,
        api_key,
        model,
    })
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert!(config.max_concurrent_fetches >= 1);
        assert!(config.max_refresh_interval_secs >= config.refresh_interval_secs);
        assert!(config.embeddings.is_none());
    }

    #[test]
    fn user_agent_carries_version() {
        assert!(AppConfig::user_agent().starts_with("feedhub/"));
    }
}
