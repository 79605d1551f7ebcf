//! Seams between the retrieval engine and its collaborators.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{Chunk, ScoredChunk, SourceDocument};

/// Converts text into a token count.
pub trait TokenCounter: Send + Sync {
    /// Short identifier shown in stats and logs.
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

/// Turns a path into loaded pages or files.
pub trait DocumentLoader: Send + Sync {
    /// Must fail with `NotFound`, `UnsupportedType` or `EmptyContent` so callers
    /// can report the specific cause.
    fn load(&self, path: &Path) -> crate::error::Result<Vec<SourceDocument>>;
}

/// Usage counters exposed by an embedding service.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EmbedderStats {
    pub model: String,
    pub total_requests: u64,
    pub total_tokens_embedded: u64,
    pub dimensions: usize,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    fn stats(&self) -> EmbedderStats { EmbedderStats { dimensions: self.dim(), ..Default::default() } }
}

/// Persistent similarity index owning the stored copy of every chunk.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection_name(&self) -> &str;
    /// Embed and store chunks; returns the number added.
    async fn add(&self, chunks: &[Chunk]) -> anyhow::Result<usize>;
    /// Best `k` matches, higher score is better.
    async fn similarity_search_with_score(&self, query: &str, k: usize) -> anyhow::Result<Vec<ScoredChunk>>;
    async fn delete_collection(&self) -> anyhow::Result<()>;
    async fn count(&self) -> anyhow::Result<usize>;
    /// Up to `limit` stored chunks, in insertion order where the backend keeps one.
    async fn snapshot(&self, limit: usize) -> anyhow::Result<Vec<Chunk>>;
}

/// Cross-encoder relevance scoring.
#[async_trait]
pub trait RerankService: Send + Sync {
    fn model_id(&self) -> &str;
    /// Returns `(index into documents, relevance score)` pairs in any order.
    async fn rerank(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<(usize, f32)>>;
}

/// Incremental content deltas from a generation service.
pub type DeltaStream = BoxStream<'static, anyhow::Result<String>>;

/// Text generation, whole or streamed.
#[async_trait]
pub trait GenerationService: Send + Sync {
    fn model_id(&self) -> &str;
    async fn invoke(&self, prompt: &str) -> anyhow::Result<String>;
    /// Dropping the returned stream must release the underlying request.
    async fn stream(&self, prompt: &str) -> anyhow::Result<DeltaStream>;
}
