//! Domain types shared by the chunker, the indexes and the query path.

use serde::{Deserialize, Serialize};

/// Open extension map for source-specific metadata.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Characters of content used as a chunk's identity when fusing ranked lists.
pub const FUSION_KEY_CHARS: usize = 200;

/// Metadata keys owned by the chunker; never copied from source extras.
pub const RESERVED_KEYS: &[&str] = &[
    "chunk_id",
    "chunk_index",
    "total_chunks",
    "chunk_size_tokens",
    "source_name",
    "page",
    "preview",
    "source",
];

/// Metadata attached by a loader to each loaded page or file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Meta,
}

/// Raw loader output, before chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl SourceDocument {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self { content: content.into(), metadata }
    }
}

/// Metadata of a produced chunk.
///
/// - `chunk_id`/`chunk_index`: position within the chunking batch (identical)
/// - `total_chunks`: size of that batch
/// - `chunk_size_tokens`: token count of the content, same counter as the splitter
/// - `page`/`source`: inherited from the source document
/// - `preview`: first 150 characters with newlines collapsed
/// - `extra`: every other source field, verbatim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_size_tokens: usize,
    pub source_name: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Meta,
}

/// The unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self { content: content.into(), metadata }
    }

    /// Identity used by rank fusion: the first 200 characters of content.
    pub fn fusion_key(&self) -> &str {
        match self.content.char_indices().nth(FUSION_KEY_CHARS) {
            Some((end, _)) => &self.content[..end],
            None => &self.content,
        }
    }

    /// Source label for prompts and reports.
    pub fn source_label(&self) -> &str {
        if !self.metadata.source_name.is_empty() {
            return &self.metadata.source_name;
        }
        self.metadata.source.as_deref().unwrap_or("Unknown")
    }
}

/// A chunk with a stage-specific score. Scores from different stages are
/// on unrelated scales and must not be compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl ScoredChunk {
    pub fn new(chunk: Chunk, score: f32) -> Self { Self { chunk, score } }
}

/// Aggregate statistics of one chunking call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub avg_tokens_per_chunk: f64,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub total_tokens: usize,
    pub source_pages: usize,
}

/// Result of an operation that may have fallen back to a degraded path.
///
/// Hard failures are reported through the surrounding `Result`; this type
/// only distinguishes the normal path from a recovered one.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn is_degraded(&self) -> bool { matches!(self, Outcome::Degraded { .. }) }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Success(value) | Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }
}
