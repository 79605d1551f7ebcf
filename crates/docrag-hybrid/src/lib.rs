//! Hybrid retrieval and the end-to-end RAG pipeline.

pub mod pipeline;
pub mod retriever;

pub use pipeline::{
    HealthReport, IngestReport, IngestTimings, PipelineComponents, PipelineState, PipelineStats, QueryResponse,
    RagPipeline, ResponseMetrics, NO_RESULTS_ANSWER,
};
pub use retriever::{reciprocal_rank_fusion, HybridRetriever, RetrieverSettings, RetrieverStats};
