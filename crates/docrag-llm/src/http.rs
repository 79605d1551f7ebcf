//! Hosted reranking and chat-completion clients.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use docrag_core::config::RagConfig;
use docrag_core::traits::{DeltaStream, GenerationService, RerankService};

use crate::sse::content_deltas;

fn build_client(cfg: &RagConfig) -> docrag_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.endpoints.timeout_secs))
        .build()
        .map_err(|e| docrag_core::Error::Operation(format!("http client: {e}")))
}

async fn check_status(resp: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("{api} returned {status}: {body}");
    }
    Ok(resp)
}

// ─── Reranking ───────────────────────────────────────────

#[derive(Serialize)]
struct RerankText<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: RerankText<'a>,
    passages: Vec<RerankText<'a>>,
    truncate: &'a str,
}

#[derive(Deserialize)]
struct RerankResponse {
    rankings: Vec<Ranking>,
}

#[derive(Deserialize)]
struct Ranking {
    index: usize,
    logit: f32,
}

/// Cross-encoder reranking over the hosted retrieval endpoint.
pub struct HttpRerankService {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model_id: String,
}

impl HttpRerankService {
    pub fn new(cfg: &RagConfig) -> docrag_core::Result<Self> {
        cfg.validate_credentials()?;
        let model = cfg.reranking()?;
        // endpoint paths use '_' where model ids use '.'
        let url = format!(
            "{}/{}/reranking",
            cfg.endpoints.rerank_url.trim_end_matches('/'),
            model.model_id.replace('.', "_")
        );
        Ok(Self { client: build_client(cfg)?, url, api_key: cfg.api_key.clone(), model_id: model.model_id.to_string() })
    }
}

#[async_trait]
impl RerankService for HttpRerankService {
    fn model_id(&self) -> &str { &self.model_id }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>> {
        let body = RerankRequest {
            model: &self.model_id,
            query: RerankText { text: query },
            passages: documents.iter().map(|d| RerankText { text: d }).collect(),
            truncate: "END",
        };
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to call rerank API")?;
        let parsed: RerankResponse =
            check_status(resp, "Rerank API").await?.json().await.context("Failed to parse rerank response")?;
        Ok(parsed.rankings.into_iter().map(|r| (r.index, r.logit)).collect())
    }
}

// ─── Chat completions ────────────────────────────────────

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpGenerationService {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model_id: String,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

impl HttpGenerationService {
    pub fn new(cfg: &RagConfig) -> docrag_core::Result<Self> {
        cfg.validate_credentials()?;
        let model = cfg.llm()?;
        Ok(Self {
            client: build_client(cfg)?,
            url: format!("{}/chat/completions", cfg.endpoints.chat_url.trim_end_matches('/')),
            api_key: cfg.api_key.clone(),
            model_id: model.model_id.to_string(),
            temperature: cfg.generator.temperature,
            top_p: cfg.generator.top_p,
            max_tokens: cfg.generator.max_completion_tokens,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model_id,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt, stream))
            .send()
            .await
            .context("Failed to call chat completions API")?;
        check_status(resp, "Chat completions API").await
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    fn model_id(&self) -> &str { &self.model_id }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let parsed: ChatResponse =
            self.send(prompt, false).await?.json().await.context("Failed to parse chat completion")?;
        let choice = parsed.choices.into_iter().next().context("Chat completion returned no choices")?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(&self, prompt: &str) -> Result<DeltaStream> {
        let resp = self.send(prompt, true).await?;
        Ok(content_deltas(resp.bytes_stream()).boxed())
    }
}
