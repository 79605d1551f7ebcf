//! Grounded answer generation over retrieved chunks.
//!
//! [`Generator::generate_stream`] yields content deltas, then one
//! `Sources` event, then `Done`. Any failure ends the stream with a single
//! `Error` event instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use docrag_core::traits::{DeltaStream, GenerationService};
use docrag_core::types::{Meta, ScoredChunk};

use crate::prompts::{fill, STUDY_ASSISTANT_PROMPT};

/// Characters of chunk content kept in a reported source.
pub const SOURCE_PREVIEW_CHARS: usize = 500;

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub content: String,
    pub metadata: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub chunks_retrieved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GenerationEvent {
    ContentDelta(String),
    Sources { sources: Vec<Source>, chunks_retrieved: usize },
    Done,
    Error(String),
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool { matches!(self, GenerationEvent::Done | GenerationEvent::Error(_)) }

    /// Server-sent-events frame for this event.
    pub fn to_sse(&self) -> String {
        let data = match self {
            GenerationEvent::ContentDelta(content) => json!({ "content": content }).to_string(),
            GenerationEvent::Sources { sources, chunks_retrieved } => {
                json!({ "sources": sources, "chunks_retrieved": chunks_retrieved }).to_string()
            }
            GenerationEvent::Done => "[DONE]".to_string(),
            GenerationEvent::Error(message) => json!({ "error": message }).to_string(),
        };
        format!("data: {data}\n\n")
    }
}

pub type EventStream = BoxStream<'static, GenerationEvent>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorStats {
    pub model: String,
    pub total_generations: u64,
}

pub struct Generator {
    service: Arc<dyn GenerationService>,
    context_chunks: usize,
    generations: Arc<AtomicU64>,
}

impl Generator {
    pub fn new(service: Arc<dyn GenerationService>, context_chunks: usize) -> Self {
        Self { service, context_chunks, generations: Arc::new(AtomicU64::new(0)) }
    }

    /// Numbered context blocks for the top chunks.
    pub fn build_context(&self, results: &[ScoredChunk]) -> String {
        results
            .iter()
            .take(self.context_chunks)
            .enumerate()
            .map(|(i, r)| {
                let meta = &r.chunk.metadata;
                format!(
                    "[Document {} | Source: {}, Page: {}, Chunk: {}]\n{}",
                    i + 1,
                    r.chunk.source_label(),
                    meta.page,
                    meta.chunk_id,
                    r.chunk.content
                )
            })
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    pub fn build_prompt(&self, query: &str, results: &[ScoredChunk]) -> String {
        fill(STUDY_ASSISTANT_PROMPT, &self.build_context(results), query)
    }

    pub async fn generate(&self, query: &str, results: &[ScoredChunk]) -> Result<GeneratedAnswer> {
        let prompt = self.build_prompt(query, results);
        let answer = self.service.invoke(&prompt).await?;
        self.generations.fetch_add(1, Ordering::Relaxed);
        debug!(answer_len = answer.len(), "generated");
        Ok(GeneratedAnswer { answer, sources: format_sources(results), chunks_retrieved: results.len() })
    }

    /// Streamed variant of [`Generator::generate`]. Dropping the stream
    /// drops the upstream response body.
    pub fn generate_stream(&self, query: &str, results: &[ScoredChunk]) -> EventStream {
        let state = StreamState::Connect {
            service: Arc::clone(&self.service),
            prompt: self.build_prompt(query, results),
            tail: Tail {
                sources: format_sources(results),
                chunks_retrieved: results.len(),
                generations: Arc::clone(&self.generations),
            },
        };
        stream::unfold(state, |mut state| async move {
            loop {
                state = match state {
                    StreamState::Connect { service, prompt, tail } => match service.stream(&prompt).await {
                        Ok(deltas) => StreamState::Streaming { deltas, tail },
                        Err(e) => return Some((stream_error(&e), StreamState::Finished)),
                    },
                    StreamState::Streaming { mut deltas, tail } => match deltas.next().await {
                        Some(Ok(delta)) if delta.is_empty() => StreamState::Streaming { deltas, tail },
                        Some(Ok(delta)) => {
                            return Some((GenerationEvent::ContentDelta(delta), StreamState::Streaming { deltas, tail }))
                        }
                        Some(Err(e)) => return Some((stream_error(&e), StreamState::Finished)),
                        None => {
                            tail.generations.fetch_add(1, Ordering::Relaxed);
                            let event =
                                GenerationEvent::Sources { sources: tail.sources, chunks_retrieved: tail.chunks_retrieved };
                            return Some((event, StreamState::Done));
                        }
                    },
                    StreamState::Done => return Some((GenerationEvent::Done, StreamState::Finished)),
                    StreamState::Finished => return None,
                }
            }
        })
        .boxed()
    }

    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            model: self.service.model_id().to_string(),
            total_generations: self.generations.load(Ordering::Relaxed),
        }
    }
}

struct Tail {
    sources: Vec<Source>,
    chunks_retrieved: usize,
    generations: Arc<AtomicU64>,
}

enum StreamState {
    Connect { service: Arc<dyn GenerationService>, prompt: String, tail: Tail },
    Streaming { deltas: DeltaStream, tail: Tail },
    Done,
    Finished,
}

fn stream_error(err: &anyhow::Error) -> GenerationEvent {
    warn!(error = %format!("{err:#}"), "generation stream failed");
    GenerationEvent::Error(format!("{err:#}"))
}

/// A complete stream for a fixed answer with no sources.
pub fn canned_stream(answer: &str) -> EventStream {
    stream::iter([
        GenerationEvent::ContentDelta(answer.to_string()),
        GenerationEvent::Sources { sources: Vec::new(), chunks_retrieved: 0 },
        GenerationEvent::Done,
    ])
    .boxed()
}

/// Sources for reporting: truncated content plus all metadata and the score.
pub fn format_sources(results: &[ScoredChunk]) -> Vec<Source> {
    results
        .iter()
        .map(|r| {
            let content = &r.chunk.content;
            let content = match content.char_indices().nth(SOURCE_PREVIEW_CHARS) {
                Some((end, _)) => format!("{}...", &content[..end]),
                None => content.clone(),
            };
            let mut metadata = match serde_json::to_value(&r.chunk.metadata) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => Meta::new(),
            };
            metadata.insert("retrieval_score".into(), json!(r.score));
            Source { content, metadata }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_core::types::{Chunk, ChunkMetadata};

    struct Echo;

    #[async_trait]
    impl GenerationService for Echo {
        fn model_id(&self) -> &str { "echo" }
        async fn invoke(&self, prompt: &str) -> Result<String> { Ok(prompt.len().to_string()) }
        async fn stream(&self, _prompt: &str) -> Result<DeltaStream> { anyhow::bail!("unused") }
    }

    fn chunk(text: &str, source: &str, page: u32, id: usize) -> ScoredChunk {
        let meta = ChunkMetadata { source_name: source.into(), page, chunk_id: id, chunk_index: id, ..Default::default() };
        ScoredChunk::new(Chunk::new(text, meta), 0.5)
    }

    #[test]
    fn context_headers_and_limit() {
        let generator = Generator::new(Arc::new(Echo), 2);
        let results = vec![chunk("alpha", "a.txt", 1, 0), chunk("beta", "b.txt", 2, 7), chunk("gamma", "c.txt", 3, 1)];
        let context = generator.build_context(&results);
        assert_eq!(
            context,
            "[Document 1 | Source: a.txt, Page: 1, Chunk: 0]\nalpha\n\n---\n\n[Document 2 | Source: b.txt, Page: 2, Chunk: 7]\nbeta"
        );
    }

    #[test]
    fn missing_source_name_falls_back() {
        let generator = Generator::new(Arc::new(Echo), 5);
        let results = vec![ScoredChunk::new(Chunk::new("x", ChunkMetadata::default()), 1.0)];
        assert!(generator.build_context(&results).starts_with("[Document 1 | Source: Unknown, Page: 0, Chunk: 0]"));
    }

    #[test]
    fn sources_truncate_and_carry_score() {
        let long = "x".repeat(600);
        let sources = format_sources(&[chunk(&long, "a.txt", 4, 2), chunk("short", "b.txt", 1, 0)]);
        assert_eq!(sources[0].content.chars().count(), SOURCE_PREVIEW_CHARS + 3);
        assert!(sources[0].content.ends_with("..."));
        assert_eq!(sources[0].metadata["page"], 4);
        assert_eq!(sources[0].metadata["source_name"], "a.txt");
        assert_eq!(sources[0].metadata["retrieval_score"], 0.5);
        assert_eq!(sources[1].content, "short");
    }

    #[test]
    fn sse_frames() {
        assert_eq!(GenerationEvent::ContentDelta("hi".into()).to_sse(), "data: {\"content\":\"hi\"}\n\n");
        assert_eq!(GenerationEvent::Done.to_sse(), "data: [DONE]\n\n");
        assert_eq!(GenerationEvent::Error("boom".into()).to_sse(), "data: {\"error\":\"boom\"}\n\n");
        let frame = GenerationEvent::Sources { sources: Vec::new(), chunks_retrieved: 0 }.to_sse();
        assert!(frame.contains("\"chunks_retrieved\":0"));
    }

    #[tokio::test]
    async fn generate_counts() {
        let generator = Generator::new(Arc::new(Echo), 5);
        let answer = generator.generate("q", &[chunk("alpha", "a.txt", 1, 0)]).await.unwrap();
        assert_eq!(answer.chunks_retrieved, 1);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(generator.stats(), GeneratorStats { model: "echo".into(), total_generations: 1 });
    }

    #[tokio::test]
    async fn canned_stream_is_complete() {
        let events: Vec<GenerationEvent> = canned_stream("nothing").collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], GenerationEvent::ContentDelta("nothing".into()));
        assert!(events[2].is_terminal());
    }
}
