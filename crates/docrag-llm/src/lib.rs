//! Reranking and answer generation: the hosted-model stages of the query path.

pub mod generate;
pub mod http;
pub mod prompts;
pub mod rerank;
pub mod sse;

pub use generate::{canned_stream, EventStream, GeneratedAnswer, GenerationEvent, Generator, GeneratorStats, Source};
pub use http::{HttpGenerationService, HttpRerankService};
pub use rerank::{Reranker, RerankerStats};
