//! HTTP embedding client for an OpenAI-compatible `/embeddings` endpoint.
//! The [`Embedder`] trait is the seam the pipeline and tests depend on.

use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Maps a batch of texts to fixed-dimension vectors, preserving input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Clone)]
pub struct EmbeddingClient {
    http: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    /// Build a client from `EMBEDDINGS_API_URL`, `EMBEDDINGS_API_KEY` and
    /// `EMBEDDINGS_MODEL`. A missing key only fails at request time so the
    /// server can still boot against keyless local endpoints.
    pub fn from_env() -> Result<Self> {
        let api_url = env::var("EMBEDDINGS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_key = env::var("EMBEDDINGS_API_KEY").ok();
        let model = env::var("EMBEDDINGS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            http: Client::new(),
            api_url,
            api_key,
            model,
        })
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.http.post(&self.api_url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.api_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("embedding service returned {status}: {body}");
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embedding response")?;

        let mut rows = parsed.data;
        rows.sort_by_key(|row| row.index);
        if rows.len() != texts.len() {
            bail!(
                "embedding service returned {} vectors for {} inputs",
                rows.len(),
                texts.len()
            );
        }

        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0;
        let mut last_error = None;

        while attempt < MAX_RETRIES {
            attempt += 1;

            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) => {
                    warn!(
                        ?err,
                        attempt,
                        max_retries = MAX_RETRIES,
                        batch = texts.len(),
                        "embedding request failed, will retry"
                    );
                    last_error = Some(err);

                    if attempt < MAX_RETRIES {
                        let delay = INITIAL_RETRY_DELAY_MS * (2_u64.pow(attempt - 1));
                        sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("embedding request failed after {MAX_RETRIES} retries")))
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}
