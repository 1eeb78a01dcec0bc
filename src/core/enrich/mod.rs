//! Enrichment providers: full-text extraction and semantic embeddings.
//!
//! Both are external collaborators from the pipeline's point of view, so
//! they sit behind the [`Enricher`] trait and the job manager only sees
//! that seam.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EmbeddingsConfig;

/// Character cap for embedding input, keeps provider payloads bounded.
const EMBED_INPUT_MAX_CHARS: usize = 8000;

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider status {0}")]
    Http(u16),
    #[error("document produced no text")]
    EmptyDocument,
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("embeddings provider is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Fetches the article page and reduces it to readable plain text.
    async fn extract_full_text(&self, article_url: &str) -> Result<String, EnrichError>;

    /// Produces a semantic embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError>;

    fn supports_embeddings(&self) -> bool;
}

pub struct HttpEnricher {
    client: reqwest::Client,
    embeddings: Option<EmbeddingsConfig>,
}

impl HttpEnricher {
    pub fn new(client: reqwest::Client, embeddings: Option<EmbeddingsConfig>) -> Self {
        Self { client, embeddings }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn extract_full_text(&self, article_url: &str) -> Result<String, EnrichError> {
        let response = self.client.get(article_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Http(status.as_u16()));
        }
        let html = response.text().await?;
        let text = html2text::from_read(html.as_bytes(), 80);
        if text.trim().is_empty() {
            return Err(EnrichError::EmptyDocument);
        }
        Ok(text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        let config = self.embeddings.as_ref().ok_or(EnrichError::NotConfigured)?;
        let input: String = text.chars().take(EMBED_INPUT_MAX_CHARS).collect();
        let response = self
            .client
            .post(format!(
                "{}/embeddings",
                config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&config.api_key)
            .json(&serde_json::json!({
                "model": config.model,
                "input": [input],
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Http(status.as_u16()));
        }
        let parsed: EmbeddingsResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| EnrichError::Malformed("empty data array".to_string()))
    }

    fn supports_embeddings(&self) -> bool {
        self.embeddings.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn(app: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), handle)
    }

    #[tokio::test]
    async fn extraction_turns_html_into_text() {
        let app = Router::new().route(
            "/post",
            get(|| async {
                axum::response::Html(
                    "<html><body><h1>Headline</h1><p>Body text here.</p></body></html>",
                )
            }),
        );
        let (base, server_task) = spawn(app).await;
        let enricher = HttpEnricher::new(reqwest::Client::new(), None);

        let text = enricher
            .extract_full_text(&format!("{base}/post"))
            .await
            .expect("extraction should succeed");
        assert!(text.contains("Headline"));
        assert!(text.contains("Body text here."));

        server_task.abort();
    }

    #[tokio::test]
    async fn embed_parses_provider_vector() {
        let app = Router::new().route(
            "/v1/embeddings",
            post(|| async {
                Json(serde_json::json!({
                    "data": [{"embedding": [0.25, -0.5, 1.0]}]
                }))
            }),
        );
        let (base, server_task) = spawn(app).await;
        let enricher = HttpEnricher::new(
            reqwest::Client::new(),
            Some(EmbeddingsConfig {
                base_url: format!("{base}/v1"),
                api_key: "test-key".to_string(),
                model: "test-embed".to_string(),
            }),
        );

        let vector = enricher.embed("hello world").await.expect("embed should succeed");
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
        assert!(enricher.supports_embeddings());

        server_task.abort();
    }

    #[tokio::test]
    async fn embed_without_configuration_is_rejected() {
        let enricher = HttpEnricher::new(reqwest::Client::new(), None);
        let result = enricher.embed("hello").await;
        assert!(matches!(result, Err(EnrichError::NotConfigured)));
        assert!(!enricher.supports_embeddings());
    }
}
