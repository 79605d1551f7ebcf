use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use docrag_core::config::RagConfig;
use docrag_core::traits::{Embedder, EmbedderStats};

use crate::rate_limit::RateLimiter;

/// Texts per embeddings request.
pub const BATCH_SIZE: usize = 10;

const DEFAULT_DIM: usize = 1024;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
    encoding_format: &'a str,
    truncate: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// OpenAI-compatible `/embeddings` client with batching and a request budget.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model_id: String,
    dim: usize,
    limiter: RateLimiter,
    requests: AtomicU64,
    tokens: AtomicU64,
}

impl HttpEmbedder {
    pub fn new(cfg: &RagConfig) -> docrag_core::Result<Self> {
        cfg.validate_credentials()?;
        let model = cfg.embedding()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.endpoints.timeout_secs))
            .build()
            .map_err(|e| docrag_core::Error::Operation(format!("http client: {e}")))?;
        info!(model = model.model_id, description = model.description, "embedder initialized");
        Ok(Self {
            client,
            url: format!("{}/embeddings", cfg.endpoints.embeddings_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model_id: model.model_id.to_string(),
            dim: model.dimensions.unwrap_or(DEFAULT_DIM),
            limiter: RateLimiter::per_minute(cfg.rate_limit_rpm),
            requests: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
        })
    }

    async fn request(&self, inputs: &[String], input_type: &str) -> Result<Vec<Vec<f32>>> {
        self.limiter.acquire().await;
        self.requests.fetch_add(1, Ordering::Relaxed);

        let body = EmbedRequest {
            input: inputs,
            model: &self.model_id,
            input_type,
            encoding_format: "float",
            truncate: "END",
        };
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call embeddings API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Embeddings API returned {status}: {body}");
        }

        let mut parsed: EmbedResponse = resp.json().await.context("Failed to parse embeddings response")?;
        if parsed.data.len() != inputs.len() {
            bail!("Embeddings API returned {} vectors for {} inputs", parsed.data.len(), inputs.len());
        }
        parsed.data.sort_by_key(|d| d.index);

        // approximate, whitespace words
        let words: usize = inputs.iter().map(|t| t.split_whitespace().count()).sum();
        self.tokens.fetch_add(words as u64, Ordering::Relaxed);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dim(&self) -> usize { self.dim }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.request(&[text.to_string()], "query").await?;
        out.pop().context("No embedding returned")
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batches = texts.len().div_ceil(BATCH_SIZE);
        let mut all = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            all.extend(self.request(batch, "passage").await?);
            debug!(batch = i + 1, batches, size = batch.len(), "embedded batch");
        }
        Ok(all)
    }

    fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            model: self.model_id.clone(),
            total_requests: self.requests.load(Ordering::Relaxed),
            total_tokens_embedded: self.tokens.load(Ordering::Relaxed),
            dimensions: self.dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let body = EmbedRequest {
            input: &input,
            model: "nvidia/nv-embedqa-e5-v5",
            input_type: "passage",
            encoding_format: "float",
            truncate: "END",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["input"], serde_json::json!(["a", "b"]));
        assert_eq!(json["input_type"], "passage");
        assert_eq!(json["truncate"], "END");
    }

    #[test]
    fn requires_api_key() {
        let cfg = RagConfig::default();
        assert!(matches!(HttpEmbedder::new(&cfg), Err(docrag_core::Error::InvalidConfig(_))));
    }

    #[test]
    fn dimensions_follow_model_catalog() {
        let cfg = RagConfig { api_key: "nvapi-test".into(), embedding_model: "bge-m3".into(), ..Default::default() };
        let embedder = HttpEmbedder::new(&cfg).unwrap();
        assert_eq!(embedder.dim(), 1024);
        assert_eq!(embedder.url, "https://integrate.api.nvidia.com/v1/embeddings");
        assert_eq!(embedder.stats().total_requests, 0);
    }
}
