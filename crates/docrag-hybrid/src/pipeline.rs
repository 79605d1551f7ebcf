//! Ingestion and query orchestration.
//!
//! A [`RagPipeline`] is built from a validated [`RagConfig`] plus its
//! collaborators, then brought to `Ready` by [`RagPipeline::initialize`].
//! Ingestion runs load, chunk and index; queries run retrieve, rerank and
//! generate with per-request stage timers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use docrag_core::chunker::Chunker;
use docrag_core::config::RagConfig;
use docrag_core::error::{Error, Result, Stage};
use docrag_core::loader::TextFileLoader;
use docrag_core::metrics::{
    MetricsCollector, MetricsSummary, QueryCounts, QueryMetric, RecentQuery, StageMetric, StageTimers,
};
use docrag_core::traits::{
    DocumentLoader, Embedder, EmbedderStats, GenerationService, RerankService, TokenCounter, VectorStore,
};
use docrag_core::types::{Chunk, ChunkStats, DocumentMetadata, Meta, SourceDocument};
use docrag_embed::{get_default_embedder, load_token_counter};
use docrag_llm::{
    canned_stream, EventStream, GeneratorStats, Generator, HttpGenerationService, HttpRerankService, Reranker,
    RerankerStats, Source,
};
use docrag_vector::open_lance_store;

use crate::retriever::{HybridRetriever, RetrieverSettings, RetrieverStats};

pub const NO_RESULTS_ANSWER: &str = "No relevant information found. Please upload documents first.";
pub const NO_RESULTS_STREAM_ANSWER: &str = "No relevant information found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not yet constructed from a valid config.
    Uninitialized,
    /// Components built; keyword index not loaded.
    Initialized,
    Ready,
}

/// External collaborators of a pipeline.
pub struct PipelineComponents {
    pub loader: Arc<dyn DocumentLoader>,
    pub counter: Arc<dyn TokenCounter>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub rerank: Option<Arc<dyn RerankService>>,
    pub generation: Arc<dyn GenerationService>,
}

impl PipelineComponents {
    /// Hosted services and the LanceDB store described by `cfg`.
    ///
    /// Fails with `InvalidConfig` when the API key is missing.
    pub async fn remote(cfg: &RagConfig) -> Result<Self> {
        let counter = load_token_counter(cfg.chunking.tokenizer_path.as_deref()).into_value();
        let embedder = get_default_embedder(cfg)?;
        let store = open_lance_store(cfg, Arc::clone(&embedder))
            .await
            .map_err(|e| Error::external(Stage::VectorStore, e))?;
        let rerank: Option<Arc<dyn RerankService>> = if cfg.enable_reranking {
            Some(Arc::new(HttpRerankService::new(cfg)?))
        } else {
            None
        };
        let generation: Arc<dyn GenerationService> = Arc::new(HttpGenerationService::new(cfg)?);
        Ok(Self { loader: Arc::new(TextFileLoader::new()), counter, embedder, store: Arc::new(store), rerank, generation })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestTimings {
    pub load_ms: f64,
    pub chunk_ms: f64,
    pub index_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub source_name: String,
    pub chunk_stats: ChunkStats,
    pub timings: IngestTimings,
}

impl IngestReport {
    pub fn message(&self) -> String {
        format!("Processed {} into {} chunks", self.source_name, self.chunk_stats.total_chunks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetrics {
    pub total_ms: f64,
    pub stages: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub chunks_retrieved: usize,
    /// Set when reranking fell back to the retrieval order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ResponseMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub state: PipelineState,
    pub api_key_set: bool,
    pub embedding_model: String,
    pub reranking_model: String,
    pub llm_model: String,
    pub hybrid_search: bool,
    pub reranking_enabled: bool,
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub token_counter: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub embedder: EmbedderStats,
    pub retriever: RetrieverStats,
    pub reranker: RerankerStats,
    pub generator: GeneratorStats,
    pub metrics: Option<MetricsSummary>,
}

pub struct RagPipeline {
    config: RagConfig,
    state: RwLock<PipelineState>,
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    retriever: HybridRetriever,
    reranker: Reranker,
    generator: Generator,
    metrics: MetricsCollector,
}

impl RagPipeline {
    /// Validate `config` and wire the components; the result is `Initialized`.
    pub fn new(config: RagConfig, components: PipelineComponents) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::from_config(&config.chunking, components.counter)?;
        let rerank = if config.enable_reranking { components.rerank } else { None };
        let pipeline = Self {
            state: RwLock::new(PipelineState::Initialized),
            loader: components.loader,
            chunker,
            embedder: components.embedder,
            retriever: HybridRetriever::new(components.store, RetrieverSettings::from_config(&config)),
            reranker: Reranker::new(rerank, config.retriever.top_n),
            generator: Generator::new(components.generation, config.generator.context_chunks),
            metrics: MetricsCollector::new(config.enable_metrics),
            config,
        };
        info!(
            embedding = %pipeline.embedder.stats().model,
            reranking = %pipeline.reranker.stats().model,
            generation = %pipeline.generator.stats().model,
            hybrid = pipeline.config.enable_hybrid_search,
            collection = %pipeline.config.storage.collection_name,
            "pipeline initialized"
        );
        Ok(pipeline)
    }

    /// Build the pipeline over hosted services and the persistent store.
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let components = PipelineComponents::remote(&config).await?;
        Self::new(config, components)
    }

    /// Load the keyword index from the store; the result is `Ready`.
    pub async fn initialize(&self) -> Result<()> {
        let documents =
            self.retriever.rebuild_keyword_index().await.map_err(|e| Error::external(Stage::VectorStore, e))?;
        *self.state.write() = PipelineState::Ready;
        info!(documents, "pipeline ready");
        Ok(())
    }

    pub fn state(&self) -> PipelineState { *self.state.read() }

    pub fn config(&self) -> &RagConfig { &self.config }

    fn ensure_ready(&self) -> Result<()> {
        if self.state() == PipelineState::Ready {
            Ok(())
        } else {
            Err(Error::NotReady("pipeline not initialized, call initialize() first".into()))
        }
    }

    // ─── Ingestion ───────────────────────────────────────────

    /// Load, chunk and index a file or directory.
    pub async fn ingest(&self, path: &Path) -> Result<IngestReport> {
        self.ensure_ready()?;
        let source_name = source_name_of(path);
        let mut timers = self.metrics.scope();

        timers.start_timer("document_load");
        let loader = Arc::clone(&self.loader);
        let owned: PathBuf = path.to_path_buf();
        let documents = tokio::task::spawn_blocking(move || loader.load(&owned))
            .await
            .map_err(|e| Error::Operation(format!("loader task: {e}")))??;
        let load_ms = latency(timers.stop_timer("document_load", 1, documents.len()));

        let mut report = self.index_documents(&mut timers, &documents, &source_name).await?;
        report.timings.load_ms = load_ms;
        info!(source = %source_name, chunks = report.chunk_stats.total_chunks, "ingested");
        Ok(report)
    }

    /// Chunk and index already-loaded documents.
    pub async fn ingest_documents(&self, documents: &[SourceDocument], source_name: &str) -> Result<IngestReport> {
        self.ensure_ready()?;
        if documents.is_empty() {
            return Err(Error::EmptyInput("no documents to ingest".into()));
        }
        let mut timers = self.metrics.scope();
        self.index_documents(&mut timers, documents, source_name).await
    }

    /// Chunk and index raw text as one document.
    pub async fn ingest_text(
        &self,
        text: &str,
        source_name: &str,
        metadata: Option<DocumentMetadata>,
    ) -> Result<IngestReport> {
        self.ensure_ready()?;
        if text.trim().is_empty() {
            return Err(Error::EmptyInput("text cannot be empty".into()));
        }
        let mut timers = self.metrics.scope();

        timers.start_timer("chunking");
        let (chunks, chunk_stats) = self.chunker.chunk_text(text, source_name, metadata);
        let chunk_ms = latency(timers.stop_timer("chunking", 1, chunk_stats.total_chunks));

        let index_ms = self.index_chunks(&mut timers, &chunks).await?;
        Ok(IngestReport {
            source_name: source_name.to_string(),
            chunk_stats,
            timings: IngestTimings { load_ms: 0.0, chunk_ms, index_ms },
        })
    }

    async fn index_documents(
        &self,
        timers: &mut StageTimers,
        documents: &[SourceDocument],
        source_name: &str,
    ) -> Result<IngestReport> {
        timers.start_timer("chunking");
        let (chunks, chunk_stats) = self.chunker.chunk_documents(documents, source_name);
        let chunk_ms = latency(timers.stop_timer("chunking", documents.len(), chunk_stats.total_chunks));
        if chunk_stats.total_chunks == 0 {
            return Err(Error::EmptyContent(format!("{source_name}: documents contain no text")));
        }

        let index_ms = self.index_chunks(timers, &chunks).await?;
        Ok(IngestReport {
            source_name: source_name.to_string(),
            chunk_stats,
            timings: IngestTimings { load_ms: 0.0, chunk_ms, index_ms },
        })
    }

    async fn index_chunks(&self, timers: &mut StageTimers, chunks: &[Chunk]) -> Result<f64> {
        timers.start_timer("indexing");
        let added = self.retriever.add_chunks(chunks).await.map_err(|e| Error::external(Stage::VectorStore, e))?;
        Ok(latency(timers.stop_timer("indexing", chunks.len(), added)))
    }

    // ─── Query ───────────────────────────────────────────────

    /// Retrieve, rerank and generate an answer.
    ///
    /// Retrieval and generation failures are recorded as unsuccessful
    /// queries before being returned.
    pub async fn query(&self, question: &str, top_k: Option<usize>) -> Result<QueryResponse> {
        self.ensure_ready()?;
        if question.trim().is_empty() {
            return Err(Error::EmptyInput("question cannot be empty".into()));
        }
        let mut timers = self.metrics.scope();
        let mut stages: Vec<StageMetric> = Vec::new();

        timers.start_timer("retrieval");
        let retrieved = match self.retriever.retrieve(question, top_k).await {
            Ok(retrieved) => retrieved,
            Err(e) => return Err(self.record_failure(question, stages, Error::external(Stage::Retrieval, e))),
        };
        stages.extend(timers.stop_timer("retrieval", 0, retrieved.len()));
        if retrieved.is_empty() {
            debug!("no chunks retrieved");
            return Ok(QueryResponse {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                chunks_retrieved: 0,
                rerank_fallback: None,
                metrics: None,
            });
        }
        let chunks_retrieved = retrieved.len();

        timers.start_timer("reranking");
        let outcome = self.reranker.rerank(question, retrieved, None).await;
        let rerank_fallback = outcome.reason().map(str::to_string);
        let reranked = outcome.into_value();
        let mut rerank_meta = Meta::new();
        rerank_meta.insert("degraded".into(), json!(rerank_fallback.is_some()));
        stages.extend(timers.stop_timer_with("reranking", chunks_retrieved, reranked.len(), rerank_meta));

        timers.start_timer("generation");
        let answer = match self.generator.generate(question, &reranked).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.record_failure(question, stages, Error::external(Stage::Generation, e))),
        };
        let answer_length = answer.answer.chars().count();
        stages.extend(timers.stop_timer("generation", reranked.len(), answer_length));

        let stage_latencies: BTreeMap<String, f64> = stages.iter().map(|s| (s.stage.clone(), s.latency_ms)).collect();
        let metric = self.metrics.record_query(
            question,
            stages,
            QueryCounts::succeeded(chunks_retrieved, reranked.len(), answer_length),
        );
        Ok(QueryResponse {
            answer: answer.answer,
            sources: answer.sources,
            chunks_retrieved: answer.chunks_retrieved,
            rerank_fallback,
            metrics: Some(ResponseMetrics { total_ms: metric.total_latency_ms, stages: stage_latencies }),
        })
    }

    fn record_failure(&self, question: &str, stages: Vec<StageMetric>, err: Error) -> Error {
        self.metrics.record_query(question, stages, QueryCounts::failed(err.to_string()));
        err
    }

    /// Retrieve and rerank, then stream the generated answer.
    ///
    /// Errors before generation starts are returned directly; generation
    /// failures arrive as the stream's terminal `Error` event.
    pub async fn query_stream(&self, question: &str, top_k: Option<usize>) -> Result<EventStream> {
        self.ensure_ready()?;
        if question.trim().is_empty() {
            return Err(Error::EmptyInput("question cannot be empty".into()));
        }
        let retrieved =
            self.retriever.retrieve(question, top_k).await.map_err(|e| Error::external(Stage::Retrieval, e))?;
        if retrieved.is_empty() {
            return Ok(canned_stream(NO_RESULTS_STREAM_ANSWER));
        }
        let reranked = self.reranker.rerank(question, retrieved, None).await.into_value();
        Ok(self.generator.generate_stream(question, &reranked))
    }

    /// Delete every stored chunk and empty the keyword index.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_ready()?;
        self.retriever.clear().await.map_err(|e| Error::external(Stage::VectorStore, e))?;
        info!(collection = %self.config.storage.collection_name, "collection cleared");
        Ok(())
    }

    // ─── Reporting ───────────────────────────────────────────

    pub fn health(&self) -> HealthReport {
        let state = self.state();
        HealthReport {
            status: if state == PipelineState::Ready { "ok" } else { "not_initialized" },
            state,
            api_key_set: !self.config.api_key.is_empty(),
            embedding_model: self.embedder.stats().model,
            reranking_model: self.reranker.stats().model,
            llm_model: self.generator.stats().model,
            hybrid_search: self.config.enable_hybrid_search,
            reranking_enabled: self.reranker.is_enabled(),
            chunk_size_tokens: self.chunker.chunk_size(),
            chunk_overlap_tokens: self.chunker.chunk_overlap(),
            token_counter: self.chunker.counter_name().to_string(),
        }
    }

    pub async fn collection_stats(&self) -> Result<RetrieverStats> {
        self.retriever.stats().await.map_err(|e| Error::external(Stage::VectorStore, e))
    }

    pub async fn pipeline_stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            embedder: self.embedder.stats(),
            retriever: self.collection_stats().await?,
            reranker: self.reranker.stats(),
            generator: self.generator.stats(),
            metrics: self.metrics.summary(),
        })
    }

    pub fn metrics_summary(&self) -> Option<MetricsSummary> { self.metrics.summary() }

    pub fn recent_queries(&self, n: usize) -> Vec<RecentQuery> { self.metrics.recent_queries(n) }

    pub fn last_query(&self) -> Option<QueryMetric> { self.metrics.last_query() }
}

fn latency(metric: Option<StageMetric>) -> f64 { metric.map_or(0.0, |m| m.latency_ms) }

fn source_name_of(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_is_file_name() {
        assert_eq!(source_name_of(Path::new("/tmp/notes/bio.txt")), "bio.txt");
        assert_eq!(source_name_of(Path::new("notes")), "notes");
    }

    #[test]
    fn ingest_report_message() {
        let report = IngestReport {
            source_name: "bio.txt".into(),
            chunk_stats: ChunkStats { total_chunks: 3, ..Default::default() },
            timings: IngestTimings::default(),
        };
        assert_eq!(report.message(), "Processed bio.txt into 3 chunks");
    }

    #[test]
    fn latency_defaults_to_zero() {
        assert_eq!(latency(None), 0.0);
        assert_eq!(latency(Some(StageMetric::new("retrieval", 12.5))), 12.5);
    }
}
